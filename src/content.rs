//! Content layout inside a repository.
//!
//! Every repository keeps its editable files under one content directory
//! (`.quire/` by default). Tasks live in `<content>/tasks/` and carry a YAML
//! front-matter header; documents are plain markdown anywhere else in the
//! content directory.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::ContentConfig;

/// Markdown extensions the pipeline and the collaboration server recognize
pub const MARKDOWN_EXTENSIONS: [&str; 2] = ["md", "mdx"];

/// Kind of content file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Task,
    Doc,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Doc => "doc",
        }
    }
}

/// Where content lives relative to a repository root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLayout {
    dir: String,
    tasks_dir: String,
}

impl ContentLayout {
    pub fn new(dir: impl Into<String>, tasks_dir: impl Into<String>) -> Self {
        Self {
            dir: trim_slashes(&dir.into()),
            tasks_dir: trim_slashes(&tasks_dir.into()),
        }
    }

    pub fn from_config(config: &ContentConfig) -> Self {
        Self::new(config.dir.clone(), config.tasks_dir.clone())
    }

    /// Content directory relative to the repository root
    pub fn dir(&self) -> &str {
        &self.dir
    }

    /// Repository-relative prefix of the task directory, with trailing slash
    pub fn tasks_prefix(&self) -> String {
        format!("{}/{}/", self.dir, self.tasks_dir)
    }

    /// Classify a repository-relative path
    pub fn kind_of(&self, relative_path: &str) -> ContentKind {
        if relative_path.starts_with(&self.tasks_prefix()) {
            ContentKind::Task
        } else {
            ContentKind::Doc
        }
    }

    /// Whether the commit pipeline may stage this path.
    ///
    /// Everything under the task directory is eligible. Elsewhere only
    /// markdown files are.
    pub fn is_eligible(&self, relative_path: &str) -> bool {
        match self.kind_of(relative_path) {
            ContentKind::Task => true,
            ContentKind::Doc => is_markdown(relative_path),
        }
    }
}

impl Default for ContentLayout {
    fn default() -> Self {
        Self::from_config(&ContentConfig::default())
    }
}

fn trim_slashes(s: &str) -> String {
    s.trim_matches('/').to_string()
}

pub fn is_markdown(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            MARKDOWN_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Split a YAML front-matter header from the body.
///
/// Returns `(Some(header), body)` when `raw` opens with a `---` line that is
/// closed by a later `---` (or `...`) line; otherwise `(None, raw)`.
pub fn split_front_matter(raw: &str) -> (Option<&str>, &str) {
    let rest = match raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))
    {
        Some(rest) => rest,
        None => return (None, raw),
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == "---" || trimmed == "..." {
            let header = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(header), body);
        }
        offset += line.len();
    }

    (None, raw)
}

/// Task metadata stored in front matter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
}

impl TaskMeta {
    /// Parse the front matter of a task file; malformed headers yield `None`
    pub fn parse(raw: &str) -> Option<Self> {
        let (header, _) = split_front_matter(raw);
        match serde_yaml::from_str::<TaskMeta>(header?) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::debug!("Ignoring malformed front matter: {}", e);
                None
            }
        }
    }
}

/// Turn a file slug like `release-notes` into `Release Notes`
pub fn slug_to_title(slug: &str) -> String {
    slug.split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Display title for a changed file.
///
/// Tasks use their front-matter `title` when the file is readable; everything
/// else falls back to the title-cased file stem.
pub fn resolve_title(repo_root: &Path, relative_path: &str, kind: ContentKind) -> String {
    if kind == ContentKind::Task {
        let title = std::fs::read_to_string(repo_root.join(relative_path))
            .ok()
            .and_then(|raw| TaskMeta::parse(&raw))
            .and_then(|meta| meta.title)
            .filter(|t| !t.trim().is_empty());
        if let Some(title) = title {
            return title;
        }
    }

    let stem = Path::new(relative_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(relative_path);
    slug_to_title(stem)
}
