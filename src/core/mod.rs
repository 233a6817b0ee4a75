//! Core types shared by every part of the updater.
//!
//! The error model lives here: [`UpdateError`] is the single error type of
//! the update engine, and [`ErrorContext`] turns one into something a
//! terminal user can act on.
//!
//! ```rust
//! use pdfren_updater::core::{UpdateError, user_friendly_error};
//!
//! let ctx = user_friendly_error(anyhow::Error::new(UpdateError::network("check", "timed out")));
//! assert!(ctx.error.is_transient());
//! ```

pub mod error;

pub use error::{ErrorContext, RestoreStatus, UpdateError, user_friendly_error};

/// Result alias used by every update operation.
pub type Result<T, E = UpdateError> = std::result::Result<T, E>;
