//! `status` command.

use super::CommandContext;
use crate::upgrade::{InstallState, StatusReport};
use anyhow::Result;
use clap::Args;
use colored::Colorize;

/// Show update status.
#[derive(Args, Debug)]
pub struct StatusCommand {
    /// Print the status as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let status = ctx.pipeline.status();
        if self.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }

        let settings = ctx.pipeline.settings();
        println!("{} {}", "Installed version:".bold(), status.local_version);
        println!("{} {}", "Install path:".bold(), settings.install_path.display());
        println!("{} {}", "Repository:".bold(), ctx.pipeline.releases().repository());
        println!("{} {}", "Last check:".bold(), describe_last_check(&status));
        if let Some(remote) = &status.remote_version {
            println!("{} {remote}", "Latest known:".bold());
        }

        let backups = ctx.pipeline.backups().list().await?;
        println!("{} {}", "Backups:".bold(), backups.len());

        if status.install_state == InstallState::Indeterminate {
            println!("{}", "The last install could not be rolled back; reinstall the application.".red());
        }
        if let Some(error) = &status.last_error {
            println!("{} {}", "Last error:".bold(), error.red());
        }
        Ok(())
    }
}

fn describe_last_check(status: &StatusReport) -> String {
    match status.last_check {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "never".to_string(),
    }
}
