//! One-shot commands that run the pipeline once and return its output.

use anyhow::{Context, Result};

use crate::cli::{LogFormat, SearchArgs, TreeArgs};
use crate::config::SourceConfig;
use crate::search::{self, SearchResult};
use crate::state::{BuildOptions, build_snapshot};
use crate::telemetry;
use crate::tree::{self, TreeNode};

/// Walk the configured source and return its folder tree.
pub async fn tree(args: TreeArgs) -> Result<TreeNode> {
    telemetry::init_logging(LogFormat::Text);
    let source = SourceConfig::from_args(&args.source).into_adapter()?;
    let options = BuildOptions::from_args(&args.index);
    tree::try_build_tree(source.as_ref(), "", &options.tree)
        .await
        .with_context(|| format!("failed to scan {}", source.describe()))
}

/// Build the index in the foreground and run a single query against it.
pub async fn search(args: SearchArgs) -> Result<Vec<SearchResult>> {
    telemetry::init_logging(LogFormat::Text);
    let source = SourceConfig::from_args(&args.source).into_adapter()?;
    let options = BuildOptions::from_args(&args.index);
    let snapshot = build_snapshot(source.as_ref(), &options).await?;

    let limit = usize::max(1, args.max_results);
    let results = tokio::task::spawn_blocking(move || {
        search::search(&snapshot, &args.query, args.folder.as_deref(), limit)
    })
    .await
    .context("search task failed")??;
    Ok(results)
}
