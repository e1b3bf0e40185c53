//! CLI subcommands.

pub mod generate;
pub mod screen;
pub mod split;
