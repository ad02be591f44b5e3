//! One-time load of a markdown file into a shared document.

use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

use super::document::SharedDocument;
use super::markdown::MarkdownConverter;
use super::name::DocumentName;
use crate::content::split_front_matter;

#[derive(Debug, Error)]
pub enum HydrationError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HydrationOutcome {
    /// The document already had content; nothing was loaded
    AlreadyHydrated,
    Hydrated { blocks: usize },
    /// The file converted to no content
    Empty,
    /// The file could not be read; the document stays empty
    ReadFailed,
}

fn read_markdown(name: &DocumentName) -> Result<String, HydrationError> {
    let raw = std::fs::read_to_string(name.path()).map_err(|source| HydrationError::Read {
        path: name.path().to_path_buf(),
        source,
    })?;
    if name.is_task() {
        let (_, body) = split_front_matter(&raw);
        return Ok(body.to_string());
    }
    Ok(raw)
}

/// Populate `doc` from the file behind `name`, unless it already has content
pub fn hydrate(
    name: &DocumentName,
    doc: &SharedDocument,
    converter: &dyn MarkdownConverter,
) -> HydrationOutcome {
    if !doc.is_empty() {
        return HydrationOutcome::AlreadyHydrated;
    }

    let markdown = match read_markdown(name) {
        Ok(markdown) => markdown,
        Err(e) => {
            warn!(document = %name, error = %e, "Failed to load document");
            return HydrationOutcome::ReadFailed;
        }
    };

    let structured = converter.to_structured(&markdown);
    if structured.is_empty() {
        return HydrationOutcome::Empty;
    }

    doc.merge(&structured);
    info!(document = %name, nodes = doc.len(), "Loaded document");
    HydrationOutcome::Hydrated {
        blocks: structured.blocks.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::markdown::CommonMarkConverter;
    use tempfile::TempDir;

    fn name_for(dir: &TempDir, file: &str, task: bool) -> DocumentName {
        let path = dir.path().join(file);
        let raw = if task {
            format!("task:{}", path.display())
        } else {
            path.display().to_string()
        };
        DocumentName::parse(&raw).unwrap()
    }

    #[test]
    fn test_hydrates_once() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Doc\nBody").unwrap();
        let name = name_for(&dir, "a.md", false);
        let doc = SharedDocument::new();

        assert_eq!(
            hydrate(&name, &doc, &CommonMarkConverter),
            HydrationOutcome::Hydrated { blocks: 2 }
        );
        assert_eq!(hydrate(&name, &doc, &CommonMarkConverter), HydrationOutcome::AlreadyHydrated);
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn test_task_front_matter_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("t.mdx"),
            "---\ntitle: Secret Title\nstatus: todo\n---\n\nTask body\n",
        )
        .unwrap();
        let doc = SharedDocument::new();

        hydrate(&name_for(&dir, "t.mdx", true), &doc, &CommonMarkConverter);
        let xml = doc.to_xml();
        assert!(xml.contains("Task body"));
        assert!(!xml.contains("Secret Title"));
        assert!(!xml.contains("status"));
    }

    #[test]
    fn test_missing_file_leaves_document_empty() {
        let dir = TempDir::new().unwrap();
        let doc = SharedDocument::new();
        assert_eq!(
            hydrate(&name_for(&dir, "gone.md", false), &doc, &CommonMarkConverter),
            HydrationOutcome::ReadFailed
        );
        assert!(doc.is_empty());
    }

    #[test]
    fn test_blank_file_is_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("blank.md"), "\n").unwrap();
        let doc = SharedDocument::new();
        assert_eq!(
            hydrate(&name_for(&dir, "blank.md", false), &doc, &CommonMarkConverter),
            HydrationOutcome::Empty
        );
    }
}
