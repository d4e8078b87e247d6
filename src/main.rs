use anyhow::Result;
use clap::Parser;

use notedex_core::cli::{Cli, Commands};
use notedex_core::{commands, service};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => {
            service::serve(args).await?;
        }
        Commands::Tree(args) => {
            let tree = commands::tree(args).await?;
            let json = serde_json::to_string_pretty(&tree)?;
            println!("{json}");
        }
        Commands::Search(args) => {
            let results = commands::search(args).await?;
            let json = serde_json::to_string_pretty(&results)?;
            println!("{json}");
        }
    }
    Ok(())
}
