//! Error handling for the updater
//!
//! The error system follows two rules:
//! 1. **Strongly-typed kinds** so the pipeline can decide what to retry,
//!    what to roll back, and what is fatal
//! 2. **Plain-language messages** so the host application can display an
//!    error without interpreting its kind
//!
//! # Error Kinds
//!
//! | Kind | Raised by | Retried | Rolls back |
//! |------|-----------|---------|------------|
//! | [`UpdateError::Network`] | registry / artifact transport | yes, bounded | no |
//! | [`UpdateError::Registry`] | malformed or failed registry answer | no | no |
//! | [`UpdateError::VersionParse`] | tag parsing | no | no |
//! | [`UpdateError::Integrity`] | size / checksum mismatch | no | no |
//! | [`UpdateError::Backup`] | snapshot / restore | no | no (aborts first) |
//! | [`UpdateError::Install`] | validation / swap | no | yes, once swapping began |
//! | [`UpdateError::Rollback`] | restore after a failed install | no | installation indeterminate |
//!
//! [`ErrorContext`] wraps any error with a suggestion and renders it for a
//! terminal.

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// What happened to the previous installation after an install failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStatus {
    /// The failure happened before anything destructive, nothing to restore.
    NotNeeded,
    /// The pre-update artifact was put back in place.
    Restored,
}

impl fmt::Display for RestoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotNeeded => Ok(()),
            Self::Restored => write!(f, " (previous version restored)"),
        }
    }
}

/// The error type for every update operation.
///
/// Variants carry owned strings instead of source errors so a value can be
/// cloned into the session record and handed back from repeated checks.
#[derive(Error, Debug, Clone)]
pub enum UpdateError {
    /// Transport failure: DNS, connect, timeout, reset, or a transient
    /// server-side status.
    #[error("Network error during {operation}: {reason}")]
    Network {
        /// What was being attempted (e.g. "fetch latest release")
        operation: String,
        /// Underlying cause
        reason: String,
    },

    /// The release registry answered with an error or a malformed document.
    #[error("Release registry error: {reason}")]
    Registry {
        /// Status code or parse failure description
        reason: String,
        /// HTTP status, when the registry answered at all
        status: Option<u16>,
    },

    /// A version string or release tag is not `MAJOR.MINOR[.PATCH]`.
    #[error("Invalid version '{input}': {reason}")]
    VersionParse {
        /// The rejected input
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// A downloaded artifact does not match its advertised size or checksum.
    #[error("Integrity check failed for {artifact}: expected {expected}, got {actual}")]
    Integrity {
        /// Artifact being verified
        artifact: String,
        /// Advertised size or checksum
        expected: String,
        /// Observed size or checksum
        actual: String,
    },

    /// Snapshot or restore of the installed artifact failed.
    #[error("Backup error during {operation}: {reason}")]
    Backup {
        /// "snapshot", "restore", "prune", ...
        operation: String,
        /// Underlying cause
        reason: String,
    },

    /// Validation of the staged artifact or the swap itself failed.
    #[error("Installation failed: {reason}{restore}")]
    Install {
        /// Underlying cause
        reason: String,
        /// Whether the pre-update artifact was restored afterwards
        restore: RestoreStatus,
    },

    /// Restoring after a failed install also failed. The installation is
    /// in an unknown state.
    #[error("Rollback failed after install error ({original}): {rollback}")]
    Rollback {
        /// The install error that triggered the rollback
        original: Box<UpdateError>,
        /// The error raised by the restore itself
        rollback: Box<UpdateError>,
    },

    /// A download or install is already running in this pipeline.
    #[error("Another update operation is already in progress")]
    SessionBusy,

    /// A required item does not exist (backup, release, downloadable asset).
    #[error("{what} not found")]
    NotFound {
        /// Description of the missing item
        what: String,
    },

    /// Settings failed validation.
    #[error("Invalid update settings: {reason}")]
    Config {
        /// All validation failures joined with "; "
        reason: String,
    },
}

impl UpdateError {
    /// Build a [`UpdateError::Network`] from an operation label and a cause.
    pub fn network(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Network {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a [`UpdateError::Registry`] without a status code.
    pub fn registry(reason: impl Into<String>) -> Self {
        Self::Registry {
            reason: reason.into(),
            status: None,
        }
    }

    /// Build a [`UpdateError::Backup`].
    pub fn backup(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Backup {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a [`UpdateError::Install`] that has not been rolled back.
    pub fn install(reason: impl fmt::Display) -> Self {
        Self::Install {
            reason: reason.to_string(),
            restore: RestoreStatus::NotNeeded,
        }
    }

    /// Build a [`UpdateError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound {
            what: what.into(),
        }
    }

    /// Whether a fresh attempt of the same operation could succeed.
    ///
    /// Only transport-level failures are transient. Integrity failures of a
    /// fully transferred file are content problems and are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Whether this error leaves the installation in an unknown state.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Self::Rollback { .. })
    }

    /// The underlying reason without the kind prefix.
    fn cause(&self) -> String {
        match self {
            Self::Network { reason, .. }
            | Self::Registry { reason, .. }
            | Self::Backup { reason, .. }
            | Self::Install { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }

    /// Plain-language summary for direct display by the host application.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network { .. } => {
                "Could not reach the update server. Check your network connection and try again."
                    .to_string()
            }
            Self::Registry { status: Some(403 | 429), reason } if reason.contains("rate limit") => {
                "The update server is rate limiting requests. Please try again later.".to_string()
            }
            Self::Registry { status: Some(404), .. } => {
                "The release repository or the requested release does not exist.".to_string()
            }
            Self::Registry { .. } => {
                "The update server returned an unexpected response. Please try again later."
                    .to_string()
            }
            Self::VersionParse { input, .. } => {
                format!("The version '{input}' is not a valid version number.")
            }
            Self::Integrity { .. } => {
                "The downloaded update is damaged or incomplete and was discarded.".to_string()
            }
            Self::Backup { .. } => {
                "Could not back up the current version, so the update was not applied. \
                 Make sure there is enough disk space."
                    .to_string()
            }
            Self::Install { reason, restore: RestoreStatus::Restored } => format!(
                "The update could not be installed ({reason}). The previous version was restored."
            ),
            Self::Install { reason, .. } => format!("The update could not be installed ({reason})."),
            Self::Rollback { original, rollback } => format!(
                "The update failed ({}) and the previous version could not be restored ({}). \
                 Please reinstall the application.",
                original.cause(),
                rollback.cause()
            ),
            Self::SessionBusy => "An update is already in progress.".to_string(),
            Self::NotFound { what } => format!("No {what} was found."),
            Self::Config { reason } => format!("The update settings are invalid: {reason}"),
        }
    }
}

/// An error together with optional suggestion and details for display.
///
/// # Examples
///
/// ```rust
/// use pdfren_updater::core::{ErrorContext, UpdateError};
///
/// let ctx = ErrorContext::new(UpdateError::SessionBusy)
///     .with_suggestion("Wait for the running update to finish");
/// assert!(ctx.to_string().contains("already in progress"));
/// ```
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: UpdateError,
    /// What the user can do about it
    pub suggestion: Option<String>,
    /// Extra technical detail
    pub details: Option<String>,
}

impl ErrorContext {
    /// Wrap an error with no suggestion or details.
    #[must_use]
    pub const fn new(error: UpdateError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Attach a suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach technical details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr with colors.
    pub fn display(&self) {
        eprintln!("{} {}", "error:".red().bold(), self.error.user_message());
        eprintln!("  {}", self.error.to_string().dimmed());

        if let Some(details) = &self.details {
            eprintln!("{} {}", "details:".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{} {}", "suggestion:".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error.user_message())?;
        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Turn an arbitrary error into an [`ErrorContext`] with a suggestion.
///
/// Errors that are already [`UpdateError`]s keep their kind; anything else
/// (config file problems, CLI glue) becomes an [`UpdateError::Config`].
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let details = format!("{error:#}");
    let update_error = match error.downcast::<UpdateError>() {
        Ok(e) => e,
        Err(other) => UpdateError::Config {
            reason: other.to_string(),
        },
    };

    let suggestion = match &update_error {
        UpdateError::Network { .. } => "Check your internet connection or proxy settings",
        UpdateError::Registry { status: Some(403 | 429), .. } => {
            "Set GITHUB_TOKEN to raise the API rate limit"
        }
        UpdateError::Registry { .. } => "Verify the repository owner and name in the settings",
        UpdateError::VersionParse { .. } => "Use a version like 1.2.3 or v1.2.3",
        UpdateError::Integrity { .. } => "Run the download again",
        UpdateError::Backup { .. } => "Free some disk space and check permissions on the backup directory",
        UpdateError::Install { .. } => "Close other instances of the application and retry",
        UpdateError::Rollback { .. } => "Run 'pdfren-update rollback' or reinstall the application",
        UpdateError::SessionBusy => "Wait for the running update to finish",
        UpdateError::NotFound { .. } => "Run 'pdfren-update check --force' to refresh release information",
        UpdateError::Config { .. } => "Check the settings file passed with --config",
    };

    ErrorContext::new(update_error).with_suggestion(suggestion).with_details(details)
}
