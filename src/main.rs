//! pdfren-update entry point
//!
//! Parses the command line, runs the command and renders failures with a
//! suggestion. Exits with status 1 on any error.

use anyhow::Result;
use clap::Parser;
use pdfren_updater::cli;
use pdfren_updater::core::error::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            user_friendly_error(e).display();
            std::process::exit(1);
        }
    }
}
