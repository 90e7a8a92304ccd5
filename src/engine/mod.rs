//! Patient identity merge and rollback engine.
//!
//! The orchestrator functions in this module tree are the only public
//! mutation entry points. Every public operation converts internal errors
//! to [`EngineError`] at its own boundary and logs the full operation
//! context; nothing here retries automatically. Partial migration failure
//! is not a top-level error: the ledger row records the true mixed
//! outcome and callers inspect `data_migrations` to detect it.

pub mod migrate;
pub mod orchestrator;
pub mod queries;
pub mod reconcile;
pub mod snapshot;

pub use migrate::{migrate_collections, rollback_migrations};
pub use orchestrator::{merge_patients, unmerge_patients};
pub use queries::{
    get_merge_history, get_merge_history_by_id, get_merge_stats, get_reversible_merges,
    verify_merge, HistoryQuery, StatsQuery,
};
pub use reconcile::{reconcile_profiles, ReconcileOutcome};
pub use snapshot::take_snapshot;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::DataMigration;

/// Engine failure taxonomy. Stable codes via [`EngineError::code`].
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl EngineError {
    /// Stable machine-readable code for API layers.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::Database(DatabaseError::NotFound { .. }) => "NOT_FOUND",
            EngineError::Database(_) => "DATABASE_ERROR",
            EngineError::OperationFailed(_) => "OPERATION_FAILED",
            EngineError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }
}

/// Request to consolidate a duplicate pair into one surviving identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    pub surviving_patient_id: Uuid,
    pub deprecated_patient_id: Uuid,
    pub tenant_id: String,
    pub performed_by: String,
    pub reason: String,
    /// Provenance from the matching service; consumed, never computed.
    pub match_candidate_id: Option<Uuid>,
    pub match_score: Option<f64>,
    pub rules_applied: Vec<String>,
}

/// Request to reverse a prior merge, exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmergeRequest {
    pub merge_history_id: Uuid,
    pub performed_by: String,
    pub reason: String,
}

/// Result of a completed merge or unmerge operation.
///
/// A hard failure is an `Err(EngineError)`; an `Ok` carrying `failed`
/// entries inside `data_migrations` is a partial success the caller must
/// surface as a warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub merge_history_id: Uuid,
    pub merge_batch_id: Uuid,
    pub surviving_patient_id: Uuid,
    pub deprecated_patient_id: Uuid,
    pub data_migrations: Vec<DataMigration>,
}
