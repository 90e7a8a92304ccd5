use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::MergeOperation;
use super::migration::DataMigration;
use super::patient::PatientProfile;
use super::snapshot::ProfileSnapshot;

/// One ledger entry: the complete, append-only record of a merge or
/// unmerge operation.
///
/// Written once per operation. The only later mutations permitted are the
/// rollback stamp (exactly once, which also clears `is_reversible`) and
/// the verification stamp. Rows are never deleted; this is the compliance
/// record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeHistoryRecord {
    pub id: Uuid,
    /// Groups every side effect of one operation.
    pub merge_batch_id: Uuid,
    pub operation: MergeOperation,
    pub surviving_patient_id: Uuid,
    pub deprecated_patient_id: Uuid,
    pub tenant_id: String,
    /// Pre-operation snapshot of the surviving identity; the restoration
    /// source for a later rollback.
    pub surviving_snapshot: ProfileSnapshot,
    /// Pre-operation snapshot of the deprecated identity.
    pub deprecated_snapshot: ProfileSnapshot,
    /// Surviving profile after reconciliation, when the operation wrote one.
    pub post_merge_profile: Option<PatientProfile>,
    pub data_migrations: Vec<DataMigration>,
    /// Provenance of the decision: consumed from the matching service,
    /// never computed here.
    pub match_candidate_id: Option<Uuid>,
    pub match_score: Option<f64>,
    pub rules_applied: Vec<String>,
    pub reason: String,
    pub performed_by: String,
    pub performed_at: NaiveDateTime,
    pub verified_at: Option<NaiveDateTime>,
    pub verified_by: Option<String>,
    pub verification_notes: Option<String>,
    pub is_reversible: bool,
    pub rolled_back: bool,
    pub rolled_back_at: Option<NaiveDateTime>,
    pub rolled_back_by: Option<String>,
    pub rollback_reason: Option<String>,
    /// Batch id of the unmerge operation that reversed this record.
    pub rollback_batch_id: Option<Uuid>,
}

/// Aggregated ledger counts for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeStats {
    pub total_merges: i64,
    pub total_unmerges: i64,
    /// Merges with no human sign-off recorded yet.
    pub pending_verification: i64,
    pub merges_this_month: i64,
    pub average_merge_score: Option<f64>,
}
