use std::io;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub mod github;
pub mod local;
pub mod memory;

pub use github::GitHubSource;
pub use local::LocalSource;
pub use memory::MemorySource;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Dir,
    File,
}

/// One child of a listed directory. `path` is relative to the source root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceEntry {
    pub name: String,
    pub kind: EntryKind,
    pub path: String,
}

impl SourceEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            path: path.into(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Not a file: {0}")]
    NotAFile(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("GitHub API error ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("unexpected response for {path}: {message}")]
    Decode { path: String, message: String },
}

/// Read access to a mirrored folder tree.
///
/// Every path is `/`-separated and relative to the source root; the empty
/// string names the root itself.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Short human-readable description used in log lines.
    fn describe(&self) -> String;

    async fn list_children(&self, path: &str) -> Result<Vec<SourceEntry>, SourceError>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SourceError>;

    /// File content decoded as UTF-8, replacing invalid sequences.
    async fn read_text(&self, path: &str) -> Result<String, SourceError> {
        let bytes = self.read_file(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Size in bytes when it can be learned without reading the file.
    async fn file_size(&self, _path: &str) -> Result<Option<u64>, SourceError> {
        Ok(None)
    }
}

/// Path of `name` inside `parent`, where an empty parent is the root.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Last `/`-separated segment of a path.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').find(|s| !s.is_empty()).unwrap_or(path)
}

/// Non-empty segments of a source path.
pub(crate) fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_relative_to_root() {
        assert_eq!(join_path("", "a.md"), "a.md");
        assert_eq!(join_path("docs/sub", "a.md"), "docs/sub/a.md");
    }

    #[test]
    fn base_name_ignores_trailing_slash() {
        assert_eq!(base_name("docs/sub/a.md"), "a.md");
        assert_eq!(base_name("a.md"), "a.md");
        assert_eq!(base_name("docs/"), "docs");
    }
}
