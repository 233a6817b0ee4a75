//! Integration test suite for pdfren-updater
//!
//! End-to-end scenarios against a local mock registry and a temporary
//! install tree. Nothing here touches the real network or the user's data
//! directory.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **pipeline**: check, download, install, rollback and retention through
//!   the facade
//! - **registry**: release client and fetcher behavior at the HTTP boundary
//! - **cli**: the `pdfren-update` binary

mod support;

mod cli;
mod pipeline;
mod registry;
