//! docforest CLI: batch conversion of a markup corpus into relational CSV.
//!
//! Reads a manifest of `(bucket, key)` references, fetches and normalizes each
//! document, and exports files, nodes, attributes, node-attribute and
//! node-parent relations.

mod commands;
mod progress;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
