//! paperbrief CLI: structured Traditional-Chinese summaries of arXiv papers.
//!
//! Fetches paper metadata, runs the staged summarization pipeline and
//! writes a Markdown report next to the printed summary.

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
