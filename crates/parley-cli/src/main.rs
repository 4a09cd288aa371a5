use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Parley CLI - two-party staged conflict resolution", long_about = None)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk two partners through a complete empathy exchange
    Simulate {
        /// Persist the store to this TOML snapshot
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Print the final views as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let service = commands::config::service(cli.config);

    match cli.command {
        Commands::Simulate { snapshot, json } => {
            commands::simulate::run(&service, snapshot, json).await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show(&service)?,
            ConfigAction::Path => commands::config::path(&service)?,
        },
    }

    Ok(())
}
