use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use notedex_indexer::{Document, DocumentIndex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::collect::{CollectOptions, collect_documents};
use crate::search::{RankedIndex, SearchError};
use crate::source::SourceAdapter;
use crate::telemetry;
use crate::tree::{TreeOptions, build_tree};

/// A built index together with the exact documents it was built from.
pub struct IndexSnapshot {
    index: Box<dyn RankedIndex>,
    documents: Vec<Document>,
    by_id: HashMap<String, usize>,
}

impl IndexSnapshot {
    pub fn new(index: impl RankedIndex + 'static, documents: Vec<Document>) -> Self {
        let mut by_id = HashMap::with_capacity(documents.len());
        for (position, document) in documents.iter().enumerate() {
            by_id.entry(document.id.clone()).or_insert(position);
        }
        Self {
            index: Box::new(index),
            documents,
            by_id,
        }
    }

    pub fn index(&self) -> &dyn RankedIndex {
        self.index.as_ref()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.by_id.get(id).map(|&position| &self.documents[position])
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

pub enum IndexStatus {
    Building,
    Ready(Arc<IndexSnapshot>),
    Failed(String),
}

impl IndexStatus {
    pub fn label(&self) -> &'static str {
        match self {
            IndexStatus::Building => "building",
            IndexStatus::Ready(_) => "ready",
            IndexStatus::Failed(_) => "failed",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct BuildOptions {
    pub tree: TreeOptions,
    pub collect: CollectOptions,
}

/// Process-wide index state. Readers take one snapshot per request; a build
/// replaces the snapshot in a single step once it is complete.
#[derive(Clone)]
pub struct IndexState {
    inner: Arc<StateInner>,
}

struct StateInner {
    status: watch::Sender<IndexStatus>,
    building: AtomicBool,
}

/// Held for the duration of one build; releases the build slot when dropped.
pub struct BuildGuard {
    inner: Arc<StateInner>,
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        self.inner.building.store(false, Ordering::Release);
    }
}

impl Default for IndexState {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexState {
    pub fn new() -> Self {
        let (status, _) = watch::channel(IndexStatus::Building);
        Self {
            inner: Arc::new(StateInner {
                status,
                building: AtomicBool::new(false),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<IndexStatus> {
        self.inner.status.subscribe()
    }

    /// Current status label and the number of documents being served.
    pub fn health(&self) -> (&'static str, usize) {
        let status = self.inner.status.borrow();
        let documents = match &*status {
            IndexStatus::Ready(snapshot) => snapshot.len(),
            _ => 0,
        };
        (status.label(), documents)
    }

    pub fn is_building(&self) -> bool {
        self.inner.building.load(Ordering::Acquire)
    }

    /// The snapshot queries should run against.
    pub fn snapshot(&self) -> Result<Arc<IndexSnapshot>, SearchError> {
        match &*self.inner.status.borrow() {
            IndexStatus::Ready(snapshot) => Ok(Arc::clone(snapshot)),
            IndexStatus::Building => Err(SearchError::IndexNotReady),
            IndexStatus::Failed(message) => Err(SearchError::IndexUnavailable(message.clone())),
        }
    }

    pub fn publish(&self, snapshot: IndexSnapshot) {
        self.inner
            .status
            .send_replace(IndexStatus::Ready(Arc::new(snapshot)));
    }

    /// Record a build failure. A snapshot that is already being served is kept.
    pub fn mark_failed(&self, message: String) {
        self.inner.status.send_if_modified(|status| {
            if matches!(status, IndexStatus::Ready(_)) {
                tracing::warn!(error = %message, "rebuild failed; keeping previous snapshot");
                return false;
            }
            *status = IndexStatus::Failed(message);
            true
        });
    }

    /// Claim the build slot, or `None` while another build is running.
    pub fn try_begin_build(&self) -> Option<BuildGuard> {
        self.inner
            .building
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(BuildGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Start a background build unless one is already running.
    pub fn spawn_build(
        &self,
        source: Arc<dyn SourceAdapter>,
        options: Arc<BuildOptions>,
    ) -> Option<JoinHandle<()>> {
        let guard = self.try_begin_build()?;
        let state = self.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            state.build_and_publish(source.as_ref(), &options).await;
        }))
    }

    /// Build a fresh snapshot and publish it, or record the failure.
    pub async fn build_and_publish(&self, source: &dyn SourceAdapter, options: &BuildOptions) -> bool {
        match build_snapshot(source, options).await {
            Ok(snapshot) => {
                self.publish(snapshot);
                true
            }
            Err(err) => {
                let message = format!("{err:#}");
                tracing::error!(source = %source.describe(), error = %message, "index build failed");
                self.mark_failed(message);
                false
            }
        }
    }
}

/// Walk the source, collect its documents, and index them.
///
/// Unreadable subtrees and files only shrink the result; an error here means
/// the index itself could not be constructed.
pub async fn build_snapshot(source: &dyn SourceAdapter, options: &BuildOptions) -> Result<IndexSnapshot> {
    let started = Instant::now();
    tracing::info!(source = %source.describe(), "index build started");

    let tree = build_tree(source, "", &options.tree).await;
    let (documents, stats) = collect_documents(source, &tree, &options.collect).await;
    let documents = dedupe_documents(documents);

    let (index, documents) = tokio::task::spawn_blocking(move || {
        DocumentIndex::build(&documents).map(|index| (index, documents))
    })
    .await
    .context("index build task failed")??;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    telemetry::record_build(elapsed_ms, stats.indexed, stats.skipped());
    tracing::info!(
        documents = documents.len(),
        skipped = stats.skipped(),
        elapsed_ms,
        "index build finished"
    );

    Ok(IndexSnapshot::new(index, documents))
}

/// Drop documents whose id was already seen, keeping the first.
pub fn dedupe_documents(documents: Vec<Document>) -> Vec<Document> {
    let mut seen = HashSet::new();
    documents
        .into_iter()
        .filter(|document| {
            let fresh = seen.insert(document.id.clone());
            if !fresh {
                tracing::warn!(id = %document.id, "duplicate document id dropped");
            }
            fresh
        })
        .collect()
}
