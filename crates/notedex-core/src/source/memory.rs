use std::collections::{BTreeMap, BTreeSet, HashSet};

use async_trait::async_trait;

use super::{EntryKind, SourceAdapter, SourceEntry, SourceError, base_name, join_path, segments};

/// In-memory folder tree, with injectable failures for exercising recovery paths.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    failing_lists: HashSet<String>,
    failing_reads: HashSet<String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, creating its parent directories.
    pub fn with_file(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        let normalized = segments(path).collect::<Vec<_>>();
        for depth in 1..normalized.len() {
            self.dirs.insert(normalized[..depth].join("/"));
        }
        self.files.insert(normalized.join("/"), content.into());
        self
    }

    /// Make listing `path` fail as an unreachable remote would.
    pub fn with_failing_list(mut self, path: &str) -> Self {
        self.failing_lists.insert(path.to_string());
        self
    }

    /// Make reading `path` fail.
    pub fn with_failing_read(mut self, path: &str) -> Self {
        self.failing_reads.insert(path.to_string());
        self
    }

    fn parent_of(path: &str) -> &str {
        path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
    }
}

#[async_trait]
impl SourceAdapter for MemorySource {
    fn describe(&self) -> String {
        format!("memory:{} files", self.files.len())
    }

    async fn list_children(&self, path: &str) -> Result<Vec<SourceEntry>, SourceError> {
        let path = segments(path).collect::<Vec<_>>().join("/");
        if self.failing_lists.contains(&path) {
            return Err(SourceError::Http {
                status: 503,
                message: format!("listing {path} unavailable"),
            });
        }
        if !path.is_empty() && !self.dirs.contains(&path) {
            return Err(SourceError::DirectoryNotFound(path));
        }

        let dirs = self
            .dirs
            .iter()
            .filter(|dir| Self::parent_of(dir) == path)
            .map(|dir| SourceEntry::new(base_name(dir), EntryKind::Dir, join_path(&path, base_name(dir))));
        let files = self
            .files
            .keys()
            .filter(|file| Self::parent_of(file) == path)
            .map(|file| SourceEntry::new(base_name(file), EntryKind::File, file.clone()));

        let mut entries: Vec<SourceEntry> = dirs.chain(files).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        if self.failing_reads.contains(path) {
            return Err(SourceError::Http {
                status: 500,
                message: format!("reading {path} failed"),
            });
        }
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| SourceError::FileNotFound(path.to_string()))
    }

    async fn file_size(&self, path: &str) -> Result<Option<u64>, SourceError> {
        Ok(self.files.get(path).map(|content| content.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_nested_entries() {
        let source = MemorySource::new()
            .with_file("a.md", "a")
            .with_file("sub/b.md", "b")
            .with_file("sub/deep/c.md", "c");

        let root = source.list_children("").await.unwrap();
        assert_eq!(
            root,
            vec![
                SourceEntry::new("a.md", EntryKind::File, "a.md"),
                SourceEntry::new("sub", EntryKind::Dir, "sub"),
            ]
        );
        let sub = source.list_children("sub").await.unwrap();
        assert_eq!(
            sub,
            vec![
                SourceEntry::new("b.md", EntryKind::File, "sub/b.md"),
                SourceEntry::new("deep", EntryKind::Dir, "sub/deep"),
            ]
        );
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let source = MemorySource::new()
            .with_file("sub/b.md", "b")
            .with_failing_list("sub")
            .with_failing_read("sub/b.md");
        assert!(source.list_children("sub").await.is_err());
        assert!(source.read_file("sub/b.md").await.is_err());
        assert!(matches!(
            source.list_children("missing").await,
            Err(SourceError::DirectoryNotFound(_))
        ));
    }
}
