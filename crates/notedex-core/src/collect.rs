use std::collections::HashSet;

use notedex_indexer::Document;

use crate::source::SourceAdapter;
use crate::tree::{TreeEntry, TreeNode, extension_of};

pub const DEFAULT_MAX_FILE_SIZE: u64 = 500 * 1024;

pub const DEFAULT_INDEX_EXTENSIONS: &[&str] = &[
    "md", "txt", "cpp", "c", "py", "java", "js", "ts", "json", "html", "css", "yaml", "yml",
];

#[derive(Clone, Debug)]
pub struct CollectOptions {
    /// Extensions eligible for indexing; `None` indexes every leaf.
    pub extensions: Option<HashSet<String>>,
    pub max_file_size: u64,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            extensions: Some(
                DEFAULT_INDEX_EXTENSIONS
                    .iter()
                    .map(|ext| ext.to_string())
                    .collect(),
            ),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl CollectOptions {
    pub fn is_indexable(&self, name: &str) -> bool {
        match &self.extensions {
            Some(allowed) => extension_of(name).is_some_and(|ext| allowed.contains(&ext)),
            None => true,
        }
    }
}

/// A file found in the tree, with the folder path accumulated on the way down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Leaf<'a> {
    pub name: &'a str,
    pub folder: String,
    pub path: &'a str,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub indexed: usize,
    pub skipped_extension: usize,
    pub skipped_size: usize,
    pub failed: usize,
}

impl CollectStats {
    pub fn skipped(&self) -> usize {
        self.skipped_extension + self.skipped_size + self.failed
    }
}

/// Flatten a tree into its file leaves in depth-first order.
pub fn leaves(tree: &TreeNode) -> Vec<Leaf<'_>> {
    let mut out = Vec::new();
    push_leaves(tree, "", &mut out);
    out
}

fn push_leaves<'a>(node: &'a TreeNode, folder: &str, out: &mut Vec<Leaf<'a>>) {
    for (name, entry) in node {
        match entry {
            TreeEntry::Directory(children) => {
                let child_folder = if folder.is_empty() {
                    name.clone()
                } else {
                    format!("{folder}/{name}")
                };
                push_leaves(children, &child_folder, out);
            }
            TreeEntry::File(path) => out.push(Leaf {
                name,
                folder: folder.to_string(),
                path,
            }),
        }
    }
}

/// Fetch every indexable leaf of `tree`.
///
/// Fetches run one at a time. A file that cannot be read is logged and left
/// out; it never aborts the pass.
pub async fn collect_documents(
    source: &dyn SourceAdapter,
    tree: &TreeNode,
    options: &CollectOptions,
) -> (Vec<Document>, CollectStats) {
    let mut documents = Vec::new();
    let mut stats = CollectStats::default();

    for leaf in leaves(tree) {
        if !options.is_indexable(leaf.name) {
            tracing::debug!(path = %leaf.path, "skipping non-indexable extension");
            stats.skipped_extension += 1;
            continue;
        }

        match source.file_size(leaf.path).await {
            Ok(Some(size)) if size > options.max_file_size => {
                tracing::debug!(path = %leaf.path, size, "skipping oversized file");
                stats.skipped_size += 1;
                continue;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(operation = "stat", path = %leaf.path, error = %err, "failed to stat file");
                stats.failed += 1;
                continue;
            }
        }

        let content = match source.read_text(leaf.path).await {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(operation = "read", path = %leaf.path, error = %err, "failed to read file; skipping");
                stats.failed += 1;
                continue;
            }
        };
        // Adapters that cannot report a size up front are checked after the fetch.
        if content.len() as u64 > options.max_file_size {
            tracing::debug!(path = %leaf.path, size = content.len(), "skipping oversized file");
            stats.skipped_size += 1;
            continue;
        }

        documents.push(Document::new(leaf.path, leaf.name, leaf.folder, content));
        stats.indexed += 1;
    }

    (documents, stats)
}
