use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::CandidateStatus;

/// An externally produced suggestion that two identities are duplicates.
///
/// The matching service creates these with a score; the merge engine only
/// flips the status to `merged` on a forward merge and back to `pending`
/// on an unmerge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub id: Uuid,
    pub tenant_id: String,
    pub patient_id: Uuid,
    pub candidate_patient_id: Uuid,
    pub score: f64,
    pub status: CandidateStatus,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
