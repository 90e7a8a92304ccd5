use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{ts_from_sql, ts_to_sql, uuid_from_sql};
use crate::db::DatabaseError;
use crate::models::{CandidateStatus, MatchCandidate};

pub fn insert_match_candidate(
    conn: &Connection,
    candidate: &MatchCandidate,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO match_candidates (id, tenant_id, patient_id, candidate_patient_id, score,
             status, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            candidate.id.to_string(),
            candidate.tenant_id,
            candidate.patient_id.to_string(),
            candidate.candidate_patient_id.to_string(),
            candidate.score,
            candidate.status.as_str(),
            candidate.notes,
            ts_to_sql(&candidate.created_at),
            ts_to_sql(&candidate.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_match_candidate(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<MatchCandidate>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, tenant_id, patient_id, candidate_patient_id, score, status, notes,
                created_at, updated_at
         FROM match_candidates WHERE id = ?1",
        params![id.to_string()],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        },
    );

    match result {
        Ok((id, tenant_id, patient_id, candidate_patient_id, score, status, notes, created, updated)) => {
            Ok(Some(MatchCandidate {
                id: uuid_from_sql(&id)?,
                tenant_id,
                patient_id: uuid_from_sql(&patient_id)?,
                candidate_patient_id: uuid_from_sql(&candidate_patient_id)?,
                score,
                status: CandidateStatus::from_str(&status)?,
                notes,
                created_at: ts_from_sql(&created),
                updated_at: ts_from_sql(&updated),
            }))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Flip a candidate to `merged` after a successful forward merge.
pub fn mark_candidate_merged(
    conn: &Connection,
    id: &Uuid,
    at: &NaiveDateTime,
) -> Result<usize, DatabaseError> {
    let updated = conn.execute(
        "UPDATE match_candidates SET status = 'merged', updated_at = ?2 WHERE id = ?1",
        params![id.to_string(), ts_to_sql(at)],
    )?;
    Ok(updated)
}

/// Return a candidate to `pending` after an unmerge, noting why.
pub fn reset_candidate_pending(
    conn: &Connection,
    id: &Uuid,
    note: &str,
    at: &NaiveDateTime,
) -> Result<usize, DatabaseError> {
    let updated = conn.execute(
        "UPDATE match_candidates SET status = 'pending', notes = ?3, updated_at = ?2
         WHERE id = ?1",
        params![id.to_string(), ts_to_sql(at), note],
    )?;
    Ok(updated)
}
