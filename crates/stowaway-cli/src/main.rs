//! stowaway CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;
use stowaway_cache::Codec;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;


use commands::Commands;
use config::Overrides;

#[derive(Parser)]
#[command(name = "stowaway")]
#[command(author, version, about = "Save and restore CI artifact caches", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache service URL, or file:// for a local directory store
    #[arg(long, global = true)]
    cache_url: Option<String>,

    /// Cache service bearer token
    #[arg(long, global = true)]
    token: Option<String>,

    /// Workspace root archives are rooted at
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Parent directory for scratch files
    #[arg(long, global = true)]
    temp_dir: Option<PathBuf>,

    /// Built-in codec: zstd, gzip, lz4 or tar
    #[arg(long, global = true)]
    codec: Option<Codec>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let overrides = Overrides {
        cache_url: cli.cache_url,
        token: cli.token,
        workspace: cli.workspace,
        temp_dir: cli.temp_dir,
        codec: cli.codec,
    };
    let config = config::load(cli.config.as_deref(), overrides)?;
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Commands::Restore(args) => handlers::restore(config, &args, &mut stdout).await?,
        Commands::Save(args) => handlers::save(config, &args, &mut stdout).await?,
        Commands::List(args) => handlers::list(&config, &args, &mut stdout).await?,
        Commands::Config => handlers::show_config(&config, &mut stdout)?,
    }

    Ok(())
}
