//! `check` command.

use super::CommandContext;
use crate::utils::progress::ProgressBar;
use anyhow::Result;
use clap::Args;
use colored::Colorize;

/// Ask the registry whether a newer release exists.
#[derive(Args, Debug)]
pub struct CheckCommand {
    /// Ignore the check interval and query the registry now
    #[arg(short, long)]
    pub force: bool,
}

impl CheckCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let spinner = ProgressBar::new_spinner("Checking for updates...");
        let check = ctx.pipeline.check_for_updates(self.force).await;
        spinner.finish_and_clear();

        if let Some(error) = check.error {
            return Err(error.into());
        }

        match &check.remote_version {
            Some(remote) if check.has_update => {
                println!(
                    "{}",
                    format!("Update available: {} -> {remote}", check.local_version).green()
                );
                println!("Run `pdfren-update upgrade` to install it");
            }
            Some(_) => {
                println!(
                    "{}",
                    format!("You are on the latest version ({})", check.local_version).green()
                );
            }
            None => {
                println!(
                    "Version {} was checked recently. Use {} to check again now.",
                    check.local_version,
                    "--force".bold()
                );
            }
        }
        Ok(())
    }
}
