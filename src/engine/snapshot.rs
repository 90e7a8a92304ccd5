//! Snapshot store: bounded point-in-time copies of a patient's profile
//! and dependent data, captured before either side of a merge is mutated.

use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use super::EngineError;
use crate::config::{DEPENDENT_COLLECTIONS, SNAPSHOT_SAMPLE_CAP};
use crate::db::repository;
use crate::models::{CollectionSample, ProfileSnapshot};

/// Capture the profile and up to [`SNAPSHOT_SAMPLE_CAP`] rows of each
/// registered dependent collection for one identity.
///
/// Read-only. A missing profile row is `NotFound`; a failed dependent
/// read degrades that collection to an empty, flagged sample instead of
/// aborting; dependent data is best-effort provenance, the profile is
/// the part rollback correctness depends on.
pub fn take_snapshot(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<ProfileSnapshot, EngineError> {
    let patient = repository::get_patient(conn, patient_id)?.ok_or_else(|| {
        EngineError::NotFound {
            entity_type: "patient".into(),
            id: patient_id.to_string(),
        }
    })?;

    let mut collections = Vec::with_capacity(DEPENDENT_COLLECTIONS.len());
    for spec in DEPENDENT_COLLECTIONS {
        match repository::sample_rows(conn, spec, patient_id, SNAPSHOT_SAMPLE_CAP) {
            Ok(rows) => collections.push(CollectionSample {
                collection: spec.table.to_string(),
                rows,
                degraded: false,
            }),
            Err(e) => {
                tracing::warn!(
                    collection = spec.table,
                    patient_id = %patient_id,
                    error = %e,
                    "dependent sample read failed; degrading to empty"
                );
                collections.push(CollectionSample {
                    collection: spec.table.to_string(),
                    rows: vec![],
                    degraded: true,
                });
            }
        }
    }

    Ok(ProfileSnapshot {
        patient_id: patient.id,
        tenant_id: patient.tenant_id,
        active: patient.active,
        profile: patient.profile,
        collections,
        taken_at: Utc::now().naive_utc(),
    })
}
