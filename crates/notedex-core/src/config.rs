use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cli::{IndexArgs, SourceArgs};
use crate::collect::CollectOptions;
use crate::source::{GitHubSource, LocalSource, SourceAdapter};
use crate::state::BuildOptions;
use crate::tree::TreeOptions;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitHubConfig {
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub token: Option<String>,
}

/// Which backing store the source adapter reads from, fixed at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceConfig {
    Local { root: PathBuf },
    GitHub(GitHubConfig),
}

impl SourceConfig {
    /// Select the source from CLI/environment values.
    ///
    /// Misconfiguration is logged rather than fatal: the service still starts and
    /// the broken source surfaces as per-request errors and an empty index.
    pub fn from_args(args: &SourceArgs) -> Self {
        if args.use_local {
            if let Some(root) = args.local_path.clone() {
                if !root.is_dir() {
                    tracing::error!(
                        path = %root.display(),
                        "LOCAL_PATH must point to an existing folder"
                    );
                }
                return SourceConfig::Local { root };
            }
            tracing::error!("USE_LOCAL is set but LOCAL_PATH is not; falling back to GitHub");
        }

        let owner = non_empty(args.github_owner.as_deref());
        let repo = non_empty(args.github_repo.as_deref());
        let token = non_empty(args.github_token.as_deref());
        if owner.is_none() || repo.is_none() || token.is_none() {
            tracing::error!(
                "missing one of required settings: GITHUB_OWNER, GITHUB_REPO, GITHUB_TOKEN"
            );
        }

        SourceConfig::GitHub(GitHubConfig {
            api_base: args.github_api.clone(),
            owner: owner.unwrap_or_default(),
            repo: repo.unwrap_or_default(),
            branch: args.branch.clone(),
            token,
        })
    }

    pub fn into_adapter(self) -> Result<Arc<dyn SourceAdapter>> {
        let adapter: Arc<dyn SourceAdapter> = match self {
            SourceConfig::Local { root } => Arc::new(LocalSource::new(root)),
            SourceConfig::GitHub(config) => {
                Arc::new(GitHubSource::new(config).context("failed to create GitHub client")?)
            }
        };
        Ok(adapter)
    }
}

impl BuildOptions {
    pub fn from_args(args: &IndexArgs) -> Self {
        let tree_extensions = normalize_extensions(&args.tree_extensions);
        let index_extensions = normalize_extensions(&args.index_extensions);
        BuildOptions {
            tree: TreeOptions {
                extensions: (!tree_extensions.is_empty()).then_some(tree_extensions),
            },
            collect: CollectOptions {
                extensions: (!index_extensions.is_empty()).then_some(index_extensions),
                max_file_size: args.max_file_size,
            },
        }
    }
}

fn normalize_extensions(values: &[String]) -> HashSet<String> {
    values
        .iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_mode_requires_a_path() {
        let args = SourceArgs {
            use_local: true,
            local_path: Some(PathBuf::from("/srv/notes")),
            ..SourceArgs::default()
        };
        assert_eq!(
            SourceConfig::from_args(&args),
            SourceConfig::Local {
                root: PathBuf::from("/srv/notes")
            }
        );

        let args = SourceArgs {
            use_local: true,
            branch: "main".to_string(),
            ..SourceArgs::default()
        };
        assert!(matches!(
            SourceConfig::from_args(&args),
            SourceConfig::GitHub(_)
        ));
    }

    #[test]
    fn github_mode_trims_credentials() {
        let args = SourceArgs {
            github_owner: Some("octo".to_string()),
            github_repo: Some("notes".to_string()),
            github_token: Some("  ".to_string()),
            branch: "dev".to_string(),
            github_api: "https://api.github.com".to_string(),
            ..SourceArgs::default()
        };
        let SourceConfig::GitHub(config) = SourceConfig::from_args(&args) else {
            panic!("expected github");
        };
        assert_eq!(config.owner, "octo");
        assert_eq!(config.branch, "dev");
        assert_eq!(config.token, None);
    }

    #[test]
    fn build_options_normalize_extensions() {
        let args = IndexArgs {
            max_file_size: 10,
            index_extensions: vec![".MD".to_string(), "txt".to_string(), " ".to_string()],
            tree_extensions: Vec::new(),
        };
        let options = BuildOptions::from_args(&args);
        assert!(options.tree.extensions.is_none());
        let exts = options.collect.extensions.unwrap();
        assert!(exts.contains("md") && exts.contains("txt"));
        assert_eq!(exts.len(), 2);
        assert_eq!(options.collect.max_file_size, 10);
    }
}
