use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

/// Top-level CLI definition for notedex.
#[derive(Parser, Debug)]
#[command(name = "notedex")]
#[command(about = "Mirror a notes tree from GitHub or disk and serve full-text search over it", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the browsing and search HTTP API.
    Serve(ServeArgs),
    /// Print the recursive folder tree as JSON.
    Tree(TreeArgs),
    /// Build the index once and print ranked results for a query as JSON.
    Search(SearchArgs),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Where documents come from. Local mode wins when enabled and a path is set.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Serve from a local directory instead of GitHub (true/1/yes).
    #[arg(
        long,
        env = "USE_LOCAL",
        value_parser = parse_flag,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    pub use_local: bool,

    /// Root directory served in local mode.
    #[arg(long, env = "LOCAL_PATH")]
    pub local_path: Option<PathBuf>,

    /// Owner of the GitHub repository.
    #[arg(long, env = "GITHUB_OWNER")]
    pub github_owner: Option<String>,

    /// Name of the GitHub repository.
    #[arg(long, env = "GITHUB_REPO")]
    pub github_repo: Option<String>,

    /// Branch or ref to read from.
    #[arg(long, env = "DEFAULT_BRANCH", default_value = "main")]
    pub branch: String,

    /// Access token sent as a bearer authorization header.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Base URL of the GitHub REST API.
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub github_api: String,
}

/// Knobs for tree walking and document collection.
#[derive(clap::Args, Debug, Clone)]
pub struct IndexArgs {
    /// Files larger than this many bytes are not indexed.
    #[arg(long, env = "MAX_INDEX_FILE_SIZE", default_value_t = 500 * 1024)]
    pub max_file_size: u64,

    /// Extensions eligible for indexing (comma separated).
    #[arg(
        long,
        env = "INDEX_EXTENSIONS",
        value_delimiter = ',',
        default_values = ["md", "txt", "cpp", "c", "py", "java", "js", "ts", "json", "html", "css", "yaml", "yml"]
    )]
    pub index_extensions: Vec<String>,

    /// Only attach files with these extensions to the tree (comma separated; empty keeps all).
    #[arg(long, env = "TREE_EXTENSIONS", value_delimiter = ',')]
    pub tree_extensions: Vec<String>,
}

/// Arguments for the `serve` subcommand.
#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub index: IndexArgs,

    /// Address for the HTTP listener.
    #[arg(long, env = "NOTEDEX_ADDR", default_value = "0.0.0.0:5000")]
    pub addr: SocketAddr,

    /// Overrides the listener port only.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Maximum number of search results returned per query.
    #[arg(long, default_value_t = 50)]
    pub max_results: usize,

    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

/// Arguments for the `tree` subcommand.
#[derive(clap::Args, Debug)]
pub struct TreeArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub index: IndexArgs,
}

/// Arguments for the `search` subcommand.
#[derive(clap::Args, Debug)]
pub struct SearchArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub index: IndexArgs,

    /// Free-text query.
    #[arg(long, short)]
    pub query: String,

    /// Restrict results to this folder and its subfolders.
    #[arg(long)]
    pub folder: Option<String>,

    /// Maximum number of results.
    #[arg(long, default_value_t = 50)]
    pub max_results: usize,
}

/// Truthy values are `true`, `1` and `yes` in any case; everything else is false.
fn parse_flag(value: &str) -> Result<bool, String> {
    Ok(matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    ))
}
