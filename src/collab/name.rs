//! Document names and access control.
//!
//! A document name is the absolute path of a markdown file, or `task:`
//! followed by one for task files whose front matter must be skipped.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use super::SessionError;

pub const TASK_PREFIX: &str = "task:";

/// A validated document name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentName {
    raw: String,
    path: PathBuf,
    is_task: bool,
}

impl DocumentName {
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let invalid = || SessionError::InvalidDocumentName(raw.to_string());

        let (is_task, path) = match raw.strip_prefix(TASK_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        if path.trim().is_empty() {
            return Err(invalid());
        }

        let path = Path::new(path);
        if !path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
            return Err(invalid());
        }

        Ok(Self {
            raw: raw.to_string(),
            path: path.to_path_buf(),
            is_task,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// File backing the document
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_task(&self) -> bool {
        self.is_task
    }
}

impl fmt::Display for DocumentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Directories documents may be opened from
#[derive(Debug, Clone, Default)]
pub struct DocumentAccess {
    /// `None` allows any absolute path; an empty list allows nothing
    roots: Option<Vec<PathBuf>>,
}

impl DocumentAccess {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn restricted_to(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: Some(roots.into_iter().map(|root| resolve(&root)).collect()),
        }
    }

    /// Symlinks are followed, so a link inside a root that points elsewhere
    /// is denied
    pub fn check(&self, name: &DocumentName) -> Result<(), SessionError> {
        let allowed = match &self.roots {
            None => true,
            Some(roots) => {
                let target = resolve(name.path());
                roots.iter().any(|root| target.starts_with(root))
            }
        };
        if allowed {
            Ok(())
        } else {
            Err(SessionError::AccessDenied(name.to_string()))
        }
    }
}

/// Resolve symlinks in the longest existing prefix of `path`
fn resolve(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut missing: Vec<&OsStr> = Vec::new();
    loop {
        if let Ok(real) = existing.canonicalize() {
            return missing.iter().rev().fold(real, |acc, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(part)) => {
                missing.push(part);
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_doc_and_task_names() {
        let doc = DocumentName::parse("/srv/repo/.quire/docs/a.md").unwrap();
        assert!(!doc.is_task());
        assert_eq!(doc.path(), Path::new("/srv/repo/.quire/docs/a.md"));

        let task = DocumentName::parse("task:/srv/repo/.quire/tasks/t.mdx").unwrap();
        assert!(task.is_task());
        assert_eq!(task.path(), Path::new("/srv/repo/.quire/tasks/t.mdx"));
        assert_eq!(task.to_string(), "task:/srv/repo/.quire/tasks/t.mdx");
    }

    #[test]
    fn test_rejects_relative_and_traversal() {
        for raw in ["", "task:", "docs/a.md", "task:docs/a.md", "/srv/repo/../etc/passwd"] {
            assert!(
                matches!(DocumentName::parse(raw), Err(SessionError::InvalidDocumentName(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_access_roots() {
        let name = DocumentName::parse("/srv/repo/.quire/docs/a.md").unwrap();
        assert!(DocumentAccess::unrestricted().check(&name).is_ok());
        assert!(DocumentAccess::restricted_to([PathBuf::from("/srv/repo")]).check(&name).is_ok());

        let denied = DocumentAccess::restricted_to([PathBuf::from("/srv/other")]).check(&name);
        assert!(matches!(denied, Err(SessionError::AccessDenied(_))));
        // Prefix matching is per path component
        let sibling = DocumentName::parse("/srv/repo2/a.md").unwrap();
        assert!(DocumentAccess::restricted_to([PathBuf::from("/srv/repo")])
            .check(&sibling)
            .is_err());
        // No served repositories means no documents
        assert!(DocumentAccess::restricted_to(Vec::new()).check(&name).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_resolved_before_checking_roots() {
        use std::os::unix::fs::symlink;

        let served = tempfile::TempDir::new().unwrap();
        let outside = tempfile::TempDir::new().unwrap();
        let secret = outside.path().join("secret.md");
        std::fs::write(&secret, "secret").unwrap();
        let docs = served.path().join(".quire/docs");
        std::fs::create_dir_all(&docs).unwrap();
        symlink(&secret, docs.join("escape.md")).unwrap();
        symlink(outside.path(), docs.join("linked")).unwrap();
        std::fs::write(docs.join("plain.md"), "ok").unwrap();

        let access = DocumentAccess::restricted_to([served.path().to_path_buf()]);
        let check = |path: PathBuf| access.check(&DocumentName::parse(&path.to_string_lossy()).unwrap());

        assert!(matches!(check(docs.join("escape.md")), Err(SessionError::AccessDenied(_))));
        assert!(check(docs.join("linked/secret.md")).is_err());
        assert!(check(docs.join("linked/not-yet.md")).is_err());
        assert!(check(docs.join("plain.md")).is_ok());
        // Files that do not exist yet still resolve through their parent
        assert!(check(docs.join("new/draft.md")).is_ok());

        // A root given through a symlink still admits its real files
        let alias = outside.path().join("alias");
        symlink(served.path(), &alias).unwrap();
        let via_alias = DocumentAccess::restricted_to([alias]);
        let name = DocumentName::parse(&docs.join("plain.md").to_string_lossy()).unwrap();
        assert!(via_alias.check(&name).is_ok());
    }
}
