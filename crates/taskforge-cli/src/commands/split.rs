//! `taskforge split` — classify a diff file and emit the two patches.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use taskforge_core::diff::{ChangeSet, split};
use taskforge_core::ForgeConfig;

#[derive(Args, Debug)]
pub struct SplitArgs {
    /// Unified diff file to split
    #[arg(long)]
    pub diff: PathBuf,

    /// Directory to write test.patch and fix.patch into
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn run(args: &SplitArgs, config: &ForgeConfig) -> Result<()> {
    let text = std::fs::read_to_string(&args.diff)
        .with_context(|| format!("reading diff {}", args.diff.display()))?;
    let changeset = ChangeSet::parse(&text).context("parsing diff")?;
    let result = split(&changeset, &config.classify_policy()).context("splitting diff")?;

    println!("test files ({}):", result.test.len());
    for path in result.test.paths() {
        println!("  {path}");
    }
    println!("fix files ({}):", result.fix.len());
    for path in result.fix.paths() {
        println!("  {path}");
    }
    if !result.ignored.is_empty() {
        println!("ignored ({}):", result.ignored.len());
        for path in &result.ignored {
            println!("  {path}");
        }
    }

    if let Some(out) = &args.out {
        std::fs::create_dir_all(out)?;
        std::fs::write(out.join("test.patch"), result.test.to_patch())?;
        std::fs::write(out.join("fix.patch"), result.fix.to_patch())?;
        println!("patches written to {}", out.display());
    }
    Ok(())
}
