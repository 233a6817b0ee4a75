//! `backups` command.

use super::CommandContext;
use anyhow::Result;
use clap::Args;
use colored::Colorize;

/// List stored backups.
#[derive(Args, Debug)]
pub struct BackupsCommand {}

impl BackupsCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let store = ctx.pipeline.backups();
        let backups = store.list().await?;

        if backups.is_empty() {
            println!("No backups in {}", store.dir().display());
            return Ok(());
        }

        println!("{}", format!("Backups in {}:", store.dir().display()).bold());
        for backup in &backups {
            let health = if store.verify(backup).await {
                "ok".green()
            } else {
                "damaged".red()
            };
            println!(
                "  {}  v{:<10} {:>12} bytes  [{health}]",
                backup.created_at.format("%Y-%m-%d %H:%M:%S"),
                backup.source_version.to_string(),
                backup.size_bytes
            );
        }
        Ok(())
    }
}
