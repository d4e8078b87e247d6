use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;

use crate::cli::ServeArgs;
use crate::config::SourceConfig;
use crate::state::{BuildOptions, IndexState};

use super::http::{self, AppState};

/// Configuration applied when launching the notedex service.
#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub http_addr: SocketAddr,
    pub max_results: usize,
    pub source: SourceConfig,
    pub build: BuildOptions,
}

impl ServeConfig {
    /// Build a runtime configuration from the CLI arguments.
    pub fn try_from_args(args: ServeArgs) -> Result<Self> {
        let mut http_addr = args.addr;
        if let Some(port) = args.port {
            http_addr.set_port(port);
        }

        Ok(Self {
            http_addr,
            max_results: usize::max(1, args.max_results),
            source: SourceConfig::from_args(&args.source),
            build: BuildOptions::from_args(&args.index),
        })
    }
}

/// Top-level service runner: kicks off the initial index build and serves HTTP meanwhile.
pub struct NotedexServer {
    config: ServeConfig,
}

impl NotedexServer {
    pub fn new(config: ServeConfig) -> Self {
        Self { config }
    }

    /// Run until a shutdown signal is received.
    pub async fn run(self) -> Result<()> {
        let ServeConfig {
            http_addr,
            max_results,
            source,
            build,
        } = self.config;

        let source = source.into_adapter()?;
        tracing::info!(source = %source.describe(), "source selected");

        let index = IndexState::new();
        let build = Arc::new(build);
        // Queries answer "index not ready" until this first build publishes.
        index.spawn_build(Arc::clone(&source), Arc::clone(&build));

        http::serve(
            http_addr,
            AppState {
                source,
                index,
                build,
                max_results,
            },
        )
        .await
    }
}
