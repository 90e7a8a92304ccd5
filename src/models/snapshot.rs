use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::patient::PatientProfile;

/// A bounded sample of one dependent collection at snapshot time.
///
/// `rows` holds at most `config::SNAPSHOT_SAMPLE_CAP` of the most recent
/// rows, serialized as raw JSON objects so the snapshot survives schema
/// drift in the clinical tables. A read failure degrades the sample to
/// empty and sets `degraded` instead of failing the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSample {
    pub collection: String,
    pub rows: Vec<serde_json::Value>,
    #[serde(default)]
    pub degraded: bool,
}

/// Point-in-time copy of a patient's profile plus dependent-data samples.
///
/// Immutable once created: a snapshot is owned by the merge history record
/// that captured it and is the restoration source for a later rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub patient_id: Uuid,
    pub tenant_id: String,
    pub active: bool,
    pub profile: PatientProfile,
    pub collections: Vec<CollectionSample>,
    pub taken_at: NaiveDateTime,
}

impl ProfileSnapshot {
    /// Sample for a named collection, if it was captured.
    pub fn collection(&self, name: &str) -> Option<&CollectionSample> {
        self.collections.iter().find(|c| c.collection == name)
    }
}
