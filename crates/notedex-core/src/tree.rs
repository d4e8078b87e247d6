//! Recursive mirror of the source's folder structure.
//!
//! Walking is best effort: a directory that cannot be listed becomes an empty
//! subtree and the rest of the walk continues.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;

use crate::source::{SourceAdapter, SourceEntry, SourceError};

/// Children of one directory, keyed by name.
pub type TreeNode = BTreeMap<String, TreeEntry>;

/// A directory's subtree or a file's source-relative path.
///
/// Serializes as a nested object whose leaves are path strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TreeEntry {
    Directory(TreeNode),
    File(String),
}

#[derive(Clone, Debug, Default)]
pub struct TreeOptions {
    /// When set, only files with one of these (lowercase) extensions are attached.
    pub extensions: Option<HashSet<String>>,
}

impl TreeOptions {
    fn accepts(&self, name: &str) -> bool {
        match &self.extensions {
            Some(allowed) => extension_of(name).is_some_and(|ext| allowed.contains(&ext)),
            None => true,
        }
    }
}

/// Lowercased extension of a file name, if it has one.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

/// Build the tree under `root`, degrading any unlistable directory (the root included)
/// to an empty node.
pub async fn build_tree(source: &dyn SourceAdapter, root: &str, options: &TreeOptions) -> TreeNode {
    walk(source, root.to_string(), options).await
}

/// Like [`build_tree`], but a failure to list `root` itself is returned to the caller.
pub async fn try_build_tree(
    source: &dyn SourceAdapter,
    root: &str,
    options: &TreeOptions,
) -> Result<TreeNode, SourceError> {
    let entries = source.list_children(root).await?;
    Ok(attach_children(source, entries, options).await)
}

fn walk<'a>(
    source: &'a dyn SourceAdapter,
    path: String,
    options: &'a TreeOptions,
) -> BoxFuture<'a, TreeNode> {
    async move {
        match source.list_children(&path).await {
            Ok(entries) => attach_children(source, entries, options).await,
            Err(err) => {
                tracing::warn!(
                    operation = "list",
                    path = %path,
                    error = %err,
                    "failed to list directory; treating subtree as empty"
                );
                TreeNode::new()
            }
        }
    }
    .boxed()
}

async fn attach_children(
    source: &dyn SourceAdapter,
    entries: Vec<SourceEntry>,
    options: &TreeOptions,
) -> TreeNode {
    let mut node = TreeNode::new();
    for entry in entries {
        if entry.name.is_empty() || entry.name.contains('/') || entry.path.is_empty() {
            tracing::warn!(
                name = %entry.name,
                path = %entry.path,
                "skipping malformed directory entry"
            );
            continue;
        }
        if entry.is_dir() {
            let subtree = walk(source, entry.path.clone(), options).await;
            node.insert(entry.name, TreeEntry::Directory(subtree));
        } else if options.accepts(&entry.name) {
            node.insert(entry.name, TreeEntry::File(entry.path));
        }
    }
    node
}
