//! `upgrade` command: check, download and install.

use super::CommandContext;
use super::download::fetch_with_progress;
use crate::upgrade::SwapOutcome;
use crate::version::Version;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tracing::warn;

/// Download and install a release.
#[derive(Args, Debug)]
pub struct UpgradeCommand {
    /// Version to install (default: the latest release)
    #[arg(value_name = "VERSION")]
    pub version: Option<String>,

    /// Install without restarting the application
    #[arg(long)]
    pub no_restart: bool,

    /// PID of the running application; a deferred swap waits for it to exit
    #[arg(long, value_name = "PID")]
    pub wait_pid: Option<u32>,
}

impl UpgradeCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let pipeline = &ctx.pipeline;
        let local = pipeline.session().local_version;

        let target = match self.version.as_deref().map(Version::parse).transpose()? {
            Some(version) if version == local => {
                println!("{}", format!("Version {local} is already installed").green());
                return Ok(());
            }
            Some(version) => version,
            None => {
                println!("{}", "Checking for updates...".cyan());
                let check = pipeline.check_for_updates(true).await;
                if let Some(error) = check.error {
                    return Err(error.into());
                }
                match check.remote_version {
                    Some(remote) if check.has_update => remote,
                    _ => {
                        println!("{}", format!("Already on the latest version ({local})").green());
                        return Ok(());
                    }
                }
            }
        };

        println!("{}", format!("Upgrading {local} -> {target}...").cyan());
        let download = fetch_with_progress(ctx, Some(&target)).await?;

        println!("{}", "Backing up and installing...".cyan());
        let report = pipeline.install_update(download).await?;

        if let Err(e) = ctx.settings_file.record_version(&report.version).await {
            warn!("Installed version not recorded in settings: {e:#}");
        }

        match &report.outcome {
            SwapOutcome::Replaced => {
                println!("{}", format!("Upgraded to version {}", report.version).green());
            }
            SwapOutcome::Deferred { helper } if !report.restarted => {
                println!(
                    "{}",
                    format!("Version {} is staged and will be installed on exit", report.version).green()
                );
                println!("Run {} after closing the application to finish", helper.display());
            }
            SwapOutcome::Deferred { .. } => {
                println!("{}", format!("Finishing upgrade to {}...", report.version).green());
            }
        }
        println!("Backup of {} kept at {}", report.backup.source_version, report.backup.path.display());
        Ok(())
    }
}
