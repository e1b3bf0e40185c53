//! taskforge — generate regression-oracle task instances from bug-fix
//! pull requests.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use taskforge_core::ForgeConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// taskforge — regression-oracle task generator
#[derive(Parser, Debug)]
#[command(name = "taskforge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate task instances from pull requests
    Generate(commands::generate::GenerateArgs),

    /// Split a diff file into test and fix patches
    Split(commands::split::SplitArgs),

    /// Screen an oracle script without running it
    Screen(commands::screen::ScreenArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = match &cli.config {
        Some(path) => ForgeConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ForgeConfig::default(),
    };

    match cli.command {
        Commands::Generate(args) => commands::generate::run(args, config).await,
        Commands::Split(args) => commands::split::run(&args, &config),
        Commands::Screen(args) => commands::screen::run(&args, &config),
    }
}
