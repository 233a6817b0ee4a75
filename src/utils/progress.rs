//! Progress indicators for the command line front end.
//!
//! Thin wrappers over `indicatif` with the updater's styling. Bars are
//! hidden when `PDFREN_NO_PROGRESS` is set or `--no-progress` was passed,
//! which keeps CI logs clean.
//!
//! ```rust
//! use pdfren_updater::utils::progress::ProgressBar;
//!
//! let bar = ProgressBar::new_download();
//! bar.update(512, 1024);
//! bar.finish_with_message("done");
//! ```

use indicatif::{ProgressBar as IndicatifBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static FORCE_HIDDEN: AtomicBool = AtomicBool::new(false);

/// Hide every progress indicator created after this call.
pub fn disable_progress() {
    FORCE_HIDDEN.store(true, Ordering::Relaxed);
}

fn is_progress_disabled() -> bool {
    FORCE_HIDDEN.load(Ordering::Relaxed) || std::env::var("PDFREN_NO_PROGRESS").is_ok()
}

/// A progress bar or spinner with consistent styling.
#[derive(Clone)]
pub struct ProgressBar {
    inner: IndicatifBar,
}

impl ProgressBar {
    /// A byte-counting bar for artifact downloads.
    ///
    /// The length is unknown until the first [`update`](Self::update); an
    /// unknown total keeps the bar in spinner mode.
    pub fn new_download() -> Self {
        let bar = if is_progress_disabled() {
            IndicatifBar::hidden()
        } else {
            let bar = IndicatifBar::new_spinner();
            bar.set_style(spinner_style());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        Self { inner: bar }
    }

    /// A spinner for work of unknown duration.
    pub fn new_spinner(msg: impl Into<String>) -> Self {
        let this = Self::new_download();
        this.inner.set_message(msg.into());
        this
    }

    /// Report `received` of `total` bytes; `total == 0` means unknown.
    pub fn update(&self, received: u64, total: u64) {
        if total > 0 && self.inner.length() != Some(total) {
            self.inner.set_length(total);
            self.inner.set_style(download_style());
        }
        self.inner.set_position(received);
    }

    /// Sets the message shown next to the bar.
    pub fn set_message(&self, msg: impl Into<String>) {
        self.inner.set_message(msg.into());
    }

    /// Finish and leave a final message.
    pub fn finish_with_message(&self, msg: impl Into<String>) {
        self.inner.finish_with_message(msg.into());
    }

    /// Finish and remove the bar from the terminal.
    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }
}

fn download_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{msg:.bold.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸━")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg} {bytes}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
}
