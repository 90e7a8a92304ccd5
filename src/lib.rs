//! Patient Identity Merge & Rollback Engine.
//!
//! Consolidates duplicate patient identities into a single surviving
//! record while keeping enough state to reverse the operation later with
//! full fidelity: pre-operation snapshots of both identity graphs,
//! per-collection migration outcomes, and an append-only merge ledger.
//!
//! Entry points live in [`engine`]: `merge_patients`, `unmerge_patients`,
//! and the ledger query façade. Identity *matching* is out of scope: the
//! engine consumes a candidate id and score it did not compute.

pub mod config;
pub mod db;
pub mod engine;
pub mod models;

use tracing_subscriber::EnvFilter;

/// Initialize tracing for binaries embedding the engine.
///
/// Respects `RUST_LOG`; falls back to the crate default filter. Library
/// code never installs a subscriber on its own.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!(
        "{} v{} starting",
        config::ENGINE_NAME,
        config::ENGINE_VERSION
    );
}
