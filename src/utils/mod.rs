//! Cross-platform utilities and helpers
//!
//! - [`backoff`] - Exponential delays between retry attempts
//! - [`fs`] - Atomic writes and durable copies
//! - [`platform`] - Executable headers, data directories, path expansion
//! - [`progress`] - Progress bars for downloads

pub mod backoff;
pub mod fs;
pub mod platform;
pub mod progress;

pub use fs::{atomic_write, durable_copy, ensure_dir, safe_write};
pub use platform::{is_windows, resolve_path};
pub use progress::ProgressBar;
