//! `taskforge screen` — statically screen an oracle script.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use taskforge_core::ForgeConfig;

#[derive(Args, Debug)]
pub struct ScreenArgs {
    /// Oracle script file to screen
    #[arg(long)]
    pub script: PathBuf,
}

pub fn run(args: &ScreenArgs, config: &ForgeConfig) -> Result<()> {
    let script = std::fs::read_to_string(&args.script)
        .with_context(|| format!("reading script {}", args.script.display()))?;

    match config.hacking_screen().screen(&script) {
        Ok(()) => {
            println!("accepted: script invokes a recognized test runner");
            Ok(())
        }
        Err(rejection) => bail!("{rejection}"),
    }
}
