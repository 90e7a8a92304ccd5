//! Read-only views over the merge ledger, plus the verification stamp.

use chrono::{Datelike, NaiveDateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use super::EngineError;
use crate::db::repository;
use crate::models::{MergeHistoryRecord, MergeStats};

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Options for [`get_merge_history`].
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub include_rolled_back: bool,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: None,
            // Audit views want the full picture by default
            include_rolled_back: true,
        }
    }
}

/// Date window for [`get_merge_stats`].
#[derive(Debug, Clone, Default)]
pub struct StatsQuery {
    pub from_date: Option<NaiveDateTime>,
    pub to_date: Option<NaiveDateTime>,
}

/// Ledger entries where the patient appears on either side, newest first.
pub fn get_merge_history(
    conn: &Connection,
    patient_id: &Uuid,
    query: &HistoryQuery,
) -> Result<Vec<MergeHistoryRecord>, EngineError> {
    let records = repository::history_for_patient(
        conn,
        patient_id,
        query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
        query.include_rolled_back,
    )?;
    Ok(records)
}

pub fn get_merge_history_by_id(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<MergeHistoryRecord>, EngineError> {
    Ok(repository::get_merge_history(conn, id)?)
}

/// Record human sign-off on a merge. Metadata only: reversibility and the
/// rollback fields are untouched.
pub fn verify_merge(
    conn: &Connection,
    merge_history_id: &Uuid,
    verified_by: &str,
    notes: Option<&str>,
) -> Result<MergeHistoryRecord, EngineError> {
    let now = Utc::now().naive_utc();
    let updated = repository::stamp_verification(conn, merge_history_id, verified_by, notes, &now)?;
    if updated == 0 {
        return Err(EngineError::NotFound {
            entity_type: "merge_history".into(),
            id: merge_history_id.to_string(),
        });
    }
    tracing::info!(merge_history_id = %merge_history_id, "merge verified");

    repository::get_merge_history(conn, merge_history_id)?.ok_or_else(|| EngineError::NotFound {
        entity_type: "merge_history".into(),
        id: merge_history_id.to_string(),
    })
}

/// Aggregate merge activity for one tenant. The optional window bounds
/// every count except `merges_this_month`, which always means the current
/// calendar month.
pub fn get_merge_stats(
    conn: &Connection,
    tenant_id: &str,
    query: &StatsQuery,
) -> Result<MergeStats, EngineError> {
    let today = Utc::now().date_naive();
    let month_start = today
        .with_day(1)
        .unwrap_or(today)
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default();

    let stats = repository::merge_stats(
        conn,
        tenant_id,
        query.from_date.as_ref(),
        query.to_date.as_ref(),
        &month_start,
    )?;
    Ok(stats)
}

/// Merges that can still be undone for one tenant, newest first.
pub fn get_reversible_merges(
    conn: &Connection,
    tenant_id: &str,
    limit: Option<u32>,
) -> Result<Vec<MergeHistoryRecord>, EngineError> {
    let records =
        repository::reversible_merges(conn, tenant_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))?;
    Ok(records)
}
