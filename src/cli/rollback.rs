//! `rollback` command.

use super::CommandContext;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tracing::warn;

/// Restore the most recent backup.
#[derive(Args, Debug)]
pub struct RollbackCommand {}

impl RollbackCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        println!("{}", "Rolling back to previous version...".yellow());
        let backup = ctx.pipeline.rollback().await?;

        if let Err(e) = ctx.settings_file.record_version(&backup.source_version).await {
            warn!("Restored version not recorded in settings: {e:#}");
        }

        println!(
            "{}",
            format!("Rolled back to version {}", backup.source_version).green()
        );
        println!("Restored from {}", backup.path.display());
        Ok(())
    }
}
