//! webextract CLI: structured extraction from web pages.
//!
//! Expands seed URLs, fetches and normalizes their content, and asks an LLM
//! to extract structured data from it, keeping a local job history and
//! credit ledger.

mod commands;

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
