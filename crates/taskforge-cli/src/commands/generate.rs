//! `taskforge generate` — run the full pipeline for one or more pull
//! requests.
//!
//! The proposing actor is external by design; this command drives the
//! session with a handcrafted oracle script, which exercises the whole
//! screening/validation machinery and is the standard way to validate a
//! script written by any outside agent.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use taskforge_core::{
    ForgeConfig, GitHubFetcher, Pipeline, Proposer, ScriptedProposer,
};
use tracing::info;

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Repository (owner/repo)
    #[arg(long)]
    pub repo: String,

    /// Pull request numbers
    #[arg(long, required = true, num_args = 1..)]
    pub prs: Vec<u64>,

    /// Output directory (overrides config)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// GitHub token (falls back to GITHUB_TOKEN)
    #[arg(long)]
    pub github_token: Option<String>,

    /// Oracle script submitted by the driving actor
    #[arg(long)]
    pub oracle_script: PathBuf,
}

pub async fn run(args: GenerateArgs, mut config: ForgeConfig) -> Result<()> {
    if let Some(dir) = args.output_dir {
        config.output.dir = dir;
    }

    let script = std::fs::read_to_string(&args.oracle_script)
        .with_context(|| format!("reading oracle script {}", args.oracle_script.display()))?;

    let fetcher = match args.github_token {
        Some(token) => GitHubFetcher::new(Some(token)),
        None => GitHubFetcher::from_env(),
    };

    let pipeline = Pipeline::new(config, Box::new(fetcher));
    let mut factory = || -> Box<dyn Proposer> {
        Box::new(ScriptedProposer::submit_once(script.clone()))
    };

    let summary = pipeline
        .generate_batch(&args.repo, &args.prs, &mut factory)
        .await?;

    for entry in &summary.entries {
        let status = if entry.ok { "ok" } else { "failed" };
        println!("{} {}: {}", status, entry.instance_id, entry.detail);
    }
    info!(
        generated = summary.generated,
        attempted = summary.entries.len(),
        "generation finished"
    );

    if summary.generated == 0 {
        bail!("no tasks were generated");
    }
    Ok(())
}
