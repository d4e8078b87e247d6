use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{EntryKind, SourceAdapter, SourceEntry, SourceError, join_path, segments};

/// Directories never listed: VCS metadata, dependency caches and build output.
const SKIP_DIRS: [&str; 8] = [
    ".git",
    "node_modules",
    "__pycache__",
    ".next",
    "dist",
    "build",
    ".venv",
    "venv",
];

/// Serves a folder tree from local disk.
#[derive(Clone, Debug)]
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, SourceError> {
        let mut resolved = self.root.clone();
        for segment in segments(path) {
            if segment == ".." || segment == "." {
                return Err(SourceError::InvalidPath(path.to_string()));
            }
            resolved.push(segment);
        }
        Ok(resolved)
    }
}

fn is_skipped_dir(name: &str) -> bool {
    name.starts_with('.') || SKIP_DIRS.contains(&name)
}

fn io_error(path: &str, source: io::Error) -> SourceError {
    SourceError::Io {
        path: path.to_string(),
        source,
    }
}

#[async_trait]
impl SourceAdapter for LocalSource {
    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn list_children(&self, path: &str) -> Result<Vec<SourceEntry>, SourceError> {
        let dir = self.resolve(path)?;
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(SourceError::DirectoryNotFound(path.to_string())),
        }

        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|err| io_error(path, err))?;
        let parent = segments(path).collect::<Vec<_>>().join("/");
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|err| io_error(path, err))? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(path = %entry.path().display(), "skipping entry with non UTF-8 name");
                continue;
            };
            let is_dir = entry
                .file_type()
                .await
                .map(|ft| ft.is_dir())
                .unwrap_or(false);
            if is_dir && is_skipped_dir(&name) {
                continue;
            }
            let kind = if is_dir { EntryKind::Dir } else { EntryKind::File };
            let child_path = join_path(&parent, &name);
            entries.push(SourceEntry::new(name, kind, child_path));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        let file = self.resolve(path)?;
        match tokio::fs::metadata(&file).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(SourceError::FileNotFound(path.to_string())),
        }
        tokio::fs::read(&file)
            .await
            .map_err(|err| io_error(path, err))
    }

    async fn file_size(&self, path: &str) -> Result<Option<u64>, SourceError> {
        let file = self.resolve(path)?;
        let meta = tokio::fs::metadata(&file)
            .await
            .map_err(|err| io_error(path, err))?;
        Ok(Some(meta.len()))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn lists_children_with_relative_paths() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("docs/sub")).unwrap();
        fs::write(temp.path().join("readme.md"), "root").unwrap();
        fs::write(temp.path().join("docs/guide.md"), "guide").unwrap();

        let source = LocalSource::new(temp.path());
        let root = source.list_children("").await.unwrap();
        assert_eq!(
            root,
            vec![
                SourceEntry::new("docs", EntryKind::Dir, "docs"),
                SourceEntry::new("readme.md", EntryKind::File, "readme.md"),
            ]
        );

        let docs = source.list_children("docs").await.unwrap();
        assert_eq!(
            docs,
            vec![
                SourceEntry::new("guide.md", EntryKind::File, "docs/guide.md"),
                SourceEntry::new("sub", EntryKind::Dir, "docs/sub"),
            ]
        );
    }

    #[tokio::test]
    async fn skips_hidden_and_dependency_directories() {
        let temp = tempdir().unwrap();
        for dir in [".git", "node_modules", ".obsidian", "notes"] {
            fs::create_dir_all(temp.path().join(dir)).unwrap();
        }
        fs::write(temp.path().join(".env"), "KEY=1").unwrap();

        let source = LocalSource::new(temp.path());
        let names: Vec<String> = source
            .list_children("")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![".env".to_string(), "notes".to_string()]);
    }

    #[tokio::test]
    async fn missing_paths_are_reported() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("a.md"), "x").unwrap();
        let source = LocalSource::new(temp.path());

        assert!(matches!(
            source.list_children("nope").await,
            Err(SourceError::DirectoryNotFound(_))
        ));
        assert!(matches!(
            source.list_children("a.md").await,
            Err(SourceError::DirectoryNotFound(_))
        ));
        assert!(matches!(
            source.read_file("nope.md").await,
            Err(SourceError::FileNotFound(_))
        ));
        assert!(matches!(
            source.read_file("../etc/passwd").await,
            Err(SourceError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn reads_content_and_size() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("docs")).unwrap();
        fs::write(temp.path().join("docs/a.md"), "hello").unwrap();
        let source = LocalSource::new(temp.path());

        assert_eq!(source.read_text("docs/a.md").await.unwrap(), "hello");
        assert_eq!(source.file_size("docs/a.md").await.unwrap(), Some(5));
    }
}
