//! `download` command.

use super::CommandContext;
use crate::upgrade::DownloadResult;
use crate::utils::progress::ProgressBar;
use crate::version::Version;
use anyhow::Result;
use clap::Args;
use colored::Colorize;

/// Download and verify a release without installing it.
#[derive(Args, Debug)]
pub struct DownloadCommand {
    /// Version to download (default: the latest release)
    #[arg(value_name = "VERSION")]
    pub version: Option<String>,
}

impl DownloadCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let version = self.version.as_deref().map(Version::parse).transpose()?;
        let download = fetch_with_progress(ctx, version.as_ref()).await?;
        println!(
            "{}",
            format!("Downloaded version {} ({} bytes)", download.version, download.size_bytes).green()
        );
        println!("Staged at {}", download.local_path.display());
        println!("SHA-256 {}", download.checksum.dimmed());
        Ok(())
    }
}

/// Downloads `version` (or the latest) behind a progress bar.
pub(super) async fn fetch_with_progress(
    ctx: &CommandContext,
    version: Option<&Version>,
) -> Result<DownloadResult> {
    let bar = ProgressBar::new_download();
    bar.set_message("Downloading");
    let progress = {
        let bar = bar.clone();
        move |received: u64, total: u64| bar.update(received, total)
    };

    match ctx.pipeline.download_update(version, Some(&progress)).await {
        Ok(download) => {
            bar.finish_and_clear();
            Ok(download)
        }
        Err(e) => {
            bar.finish_and_clear();
            Err(e.into())
        }
    }
}
