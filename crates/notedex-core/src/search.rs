//! Query engine: ranked index retrieval merged with direct substring matches.

use std::collections::HashSet;
use std::time::Instant;

use notedex_indexer::{Document, DocumentIndex, QueryError, RankedHit};
use serde::Serialize;
use thiserror::Error;

use crate::snippet::{DEFAULT_SNIPPET_LENGTH, snippet};
use crate::source::base_name;
use crate::state::IndexSnapshot;
use crate::telemetry;

/// Score given to documents found only by substring containment.
pub const DIRECT_MATCH_SCORE: f32 = 1.5;

pub const DEFAULT_MAX_RESULTS: usize = 50;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Missing search query")]
    MissingQuery,
    #[error("Index not ready")]
    IndexNotReady,
    #[error("index build failed: {0}")]
    IndexUnavailable(String),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("search task failed: {0}")]
    Task(String),
}

/// One entry of a search response.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub filename: String,
    pub folder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_path: Option<String>,
    pub snippet: String,
    pub score: f32,
}

/// Anything that can rank document references for a query string.
pub trait RankedIndex: Send + Sync {
    fn ranked(&self, query: &str) -> Result<Vec<RankedHit>, QueryError>;
}

impl RankedIndex for DocumentIndex {
    fn ranked(&self, query: &str) -> Result<Vec<RankedHit>, QueryError> {
        self.search(query)
    }
}

/// Reject absent or blank queries, returning the query trimmed.
pub fn validate_query(query: Option<&str>) -> Result<&str, SearchError> {
    match query.map(str::trim) {
        Some(query) if !query.is_empty() => Ok(query),
        _ => Err(SearchError::MissingQuery),
    }
}

/// Append a trailing wildcard to every term that has none.
pub fn rewrite_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| {
            if term.contains('*') {
                term.to_string()
            } else {
                format!("{term}*")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Query strings tried in order until one parses and executes.
pub fn query_attempts(query: &str) -> [String; 3] {
    let raw = query.trim();
    [
        rewrite_query(raw),
        raw.to_string(),
        raw.split_whitespace().collect::<Vec<_>>().join(" "),
    ]
}

/// Ranked hits from the first query form the index accepts.
pub fn primary_matches(index: &dyn RankedIndex, query: &str) -> Result<Vec<RankedHit>, SearchError> {
    let mut last_error = None;
    for (stage, attempt) in query_attempts(query).iter().enumerate() {
        match index.ranked(attempt) {
            Ok(hits) => return Ok(hits),
            Err(err) => {
                tracing::debug!(stage, query = %attempt, error = %err, "query form rejected; trying next");
                last_error = Some(err);
            }
        }
    }
    let err = last_error.unwrap_or_else(|| QueryError::Execution("no query attempted".to_string()));
    tracing::warn!(query = %query, error = %err, "every query form failed");
    Err(err.into())
}

/// Case-insensitive folder scope: the folder itself and everything below it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FolderFilter {
    folder: String,
    prefix: String,
}

impl FolderFilter {
    /// `None` for an absent or blank filter.
    pub fn new(folder: Option<&str>) -> Option<Self> {
        let folder = folder.map(str::trim).filter(|f| !f.is_empty())?.to_lowercase();
        let prefix = format!("{folder}/");
        Some(Self { folder, prefix })
    }

    pub fn matches(&self, document: &Document) -> bool {
        let folder = document.folder.to_lowercase();
        folder == self.folder
            || folder.starts_with(&self.prefix)
            || document.full_path.to_lowercase().starts_with(&self.prefix)
    }
}

/// Documents whose filename, content, folder or full path contains `query`.
pub fn secondary_matches(
    documents: &[Document],
    query: &str,
    filter: Option<&FolderFilter>,
) -> Vec<RankedHit> {
    let needle = query.trim().to_lowercase();
    documents
        .iter()
        .filter(|doc| filter.is_none_or(|f| f.matches(doc)))
        .filter(|doc| {
            doc.filename.to_lowercase().contains(&needle)
                || doc.content.to_lowercase().contains(&needle)
                || doc.folder.to_lowercase().contains(&needle)
                || doc.full_path.to_lowercase().contains(&needle)
        })
        .map(|doc| RankedHit::new(doc.id.clone(), DIRECT_MATCH_SCORE))
        .collect()
}

/// Union of both hit lists by reference; a primary hit always wins.
pub fn merge_by_id(primary: Vec<RankedHit>, secondary: Vec<RankedHit>) -> Vec<RankedHit> {
    let mut seen = HashSet::new();
    primary
        .into_iter()
        .chain(secondary)
        .filter(|hit| seen.insert(hit.reference.clone()))
        .collect()
}

/// Run a query against one snapshot.
pub fn search(
    snapshot: &IndexSnapshot,
    query: &str,
    folder: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchResult>, SearchError> {
    let started = Instant::now();
    let outcome = run(snapshot, query, folder, limit);
    telemetry::record_search(started.elapsed().as_millis() as u64, outcome.is_ok());
    outcome
}

fn run(
    snapshot: &IndexSnapshot,
    query: &str,
    folder: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchResult>, SearchError> {
    let trimmed = validate_query(Some(query))?;
    let filter = FolderFilter::new(folder);

    let primary = primary_matches(snapshot.index(), trimmed)?;
    let secondary = secondary_matches(snapshot.documents(), trimmed, filter.as_ref());
    let mut merged = merge_by_id(primary, secondary);

    if let Some(filter) = &filter {
        merged.retain(|hit| {
            snapshot
                .document(&hit.reference)
                .is_some_and(|doc| filter.matches(doc))
        });
    }

    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged.truncate(limit);

    Ok(merged
        .into_iter()
        .map(|hit| enrich(snapshot, hit, query))
        .collect())
}

fn enrich(snapshot: &IndexSnapshot, hit: RankedHit, query: &str) -> SearchResult {
    match snapshot.document(&hit.reference) {
        Some(doc) => SearchResult {
            id: hit.reference,
            filename: doc.filename.clone(),
            folder: doc.folder.clone(),
            full_path: Some(doc.full_path.clone()),
            snippet: snippet(&doc.content, query, DEFAULT_SNIPPET_LENGTH),
            score: hit.score,
        },
        None => {
            tracing::warn!(reference = %hit.reference, "index hit has no stored document");
            SearchResult {
                filename: base_name(&hit.reference).to_string(),
                id: hit.reference,
                folder: String::new(),
                full_path: None,
                snippet: String::new(),
                score: hit.score,
            }
        }
    }
}
