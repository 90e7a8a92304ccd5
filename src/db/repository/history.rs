use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{ts_from_sql, ts_to_sql, uuid_from_sql};
use crate::db::DatabaseError;
use crate::models::{MergeHistoryRecord, MergeOperation, MergeStats};

const HISTORY_COLUMNS: &str = "id, merge_batch_id, operation, surviving_patient_id, \
     deprecated_patient_id, tenant_id, surviving_snapshot, deprecated_snapshot, \
     post_merge_profile, data_migrations, match_candidate_id, match_score, rules_applied, \
     reason, performed_by, performed_at, verified_at, verified_by, verification_notes, \
     is_reversible, rolled_back, rolled_back_at, rolled_back_by, rollback_reason, \
     rollback_batch_id";

pub fn insert_merge_history(
    conn: &Connection,
    record: &MergeHistoryRecord,
) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "INSERT INTO merge_history ({HISTORY_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)"
        ),
        params![
            record.id.to_string(),
            record.merge_batch_id.to_string(),
            record.operation.as_str(),
            record.surviving_patient_id.to_string(),
            record.deprecated_patient_id.to_string(),
            record.tenant_id,
            to_json(&record.surviving_snapshot)?,
            to_json(&record.deprecated_snapshot)?,
            record
                .post_merge_profile
                .as_ref()
                .map(to_json)
                .transpose()?,
            to_json(&record.data_migrations)?,
            record.match_candidate_id.map(|id| id.to_string()),
            record.match_score,
            to_json(&record.rules_applied)?,
            record.reason,
            record.performed_by,
            ts_to_sql(&record.performed_at),
            record.verified_at.as_ref().map(ts_to_sql),
            record.verified_by,
            record.verification_notes,
            record.is_reversible as i32,
            record.rolled_back as i32,
            record.rolled_back_at.as_ref().map(ts_to_sql),
            record.rolled_back_by,
            record.rollback_reason,
            record.rollback_batch_id.map(|id| id.to_string()),
        ],
    )?;
    Ok(())
}

pub fn get_merge_history(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<MergeHistoryRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {HISTORY_COLUMNS} FROM merge_history WHERE id = ?1"
    ))?;
    let result = stmt.query_row(params![id.to_string()], map_history_row);
    match result {
        Ok(row) => Ok(Some(history_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// All ledger entries where the patient appears on either side, newest
/// first.
pub fn history_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
    limit: u32,
    include_rolled_back: bool,
) -> Result<Vec<MergeHistoryRecord>, DatabaseError> {
    let rolled_back_clause = if include_rolled_back {
        ""
    } else {
        "AND rolled_back = 0"
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {HISTORY_COLUMNS} FROM merge_history
         WHERE (surviving_patient_id = ?1 OR deprecated_patient_id = ?1) {rolled_back_clause}
         ORDER BY performed_at DESC, id DESC LIMIT ?2"
    ))?;
    let rows = stmt
        .query_map(params![patient_id.to_string(), limit], map_history_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(history_from_row).collect()
}

/// Merges that can still be undone: reversible and not yet rolled back.
pub fn reversible_merges(
    conn: &Connection,
    tenant_id: &str,
    limit: u32,
) -> Result<Vec<MergeHistoryRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {HISTORY_COLUMNS} FROM merge_history
         WHERE tenant_id = ?1 AND operation = 'merge'
           AND is_reversible = 1 AND rolled_back = 0
         ORDER BY performed_at DESC, id DESC LIMIT ?2"
    ))?;
    let rows = stmt
        .query_map(params![tenant_id, limit], map_history_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(history_from_row).collect()
}

/// Whether the identity is already the deprecated side of a live (not
/// rolled back) merge. The orchestrator refuses to reuse such an identity.
pub fn has_active_merge_for_deprecated(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM merge_history
         WHERE operation = 'merge' AND deprecated_patient_id = ?1 AND rolled_back = 0",
        params![patient_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Stamp the rollback fields on a ledger entry, exactly once.
///
/// The `rolled_back = 0` guard makes the stamp conditional; a second
/// attempt updates zero rows and the caller fails the operation. Clearing
/// `is_reversible` in the same statement enforces the no-re-reversal
/// invariant.
pub fn stamp_rollback(
    conn: &Connection,
    id: &Uuid,
    rolled_back_by: &str,
    rollback_reason: &str,
    rollback_batch_id: &Uuid,
    at: &NaiveDateTime,
) -> Result<usize, DatabaseError> {
    let updated = conn.execute(
        "UPDATE merge_history SET
             rolled_back = 1, is_reversible = 0, rolled_back_at = ?2, rolled_back_by = ?3,
             rollback_reason = ?4, rollback_batch_id = ?5
         WHERE id = ?1 AND rolled_back = 0",
        params![
            id.to_string(),
            ts_to_sql(at),
            rolled_back_by,
            rollback_reason,
            rollback_batch_id.to_string(),
        ],
    )?;
    Ok(updated)
}

/// Record human sign-off on a merge. Pure metadata: reversibility is not
/// affected.
pub fn stamp_verification(
    conn: &Connection,
    id: &Uuid,
    verified_by: &str,
    notes: Option<&str>,
    at: &NaiveDateTime,
) -> Result<usize, DatabaseError> {
    let updated = conn.execute(
        "UPDATE merge_history SET verified_at = ?2, verified_by = ?3, verification_notes = ?4
         WHERE id = ?1",
        params![id.to_string(), ts_to_sql(at), verified_by, notes],
    )?;
    Ok(updated)
}

/// Aggregate ledger counts for a tenant over an optional date window.
/// `month_start` bounds the merges-this-month count independently of the
/// window.
pub fn merge_stats(
    conn: &Connection,
    tenant_id: &str,
    from: Option<&NaiveDateTime>,
    to: Option<&NaiveDateTime>,
    month_start: &NaiveDateTime,
) -> Result<MergeStats, DatabaseError> {
    let from_sql = from.map(ts_to_sql).unwrap_or_else(|| "0000-01-01 00:00:00".into());
    let to_sql = to.map(ts_to_sql).unwrap_or_else(|| "9999-12-31 23:59:59".into());

    conn.query_row(
        "SELECT
             SUM(CASE WHEN operation = 'merge' THEN 1 ELSE 0 END),
             SUM(CASE WHEN operation = 'unmerge' THEN 1 ELSE 0 END),
             SUM(CASE WHEN operation = 'merge' AND verified_at IS NULL THEN 1 ELSE 0 END),
             SUM(CASE WHEN operation = 'merge' AND performed_at >= ?4 THEN 1 ELSE 0 END),
             AVG(CASE WHEN operation = 'merge' THEN match_score END)
         FROM merge_history
         WHERE tenant_id = ?1 AND performed_at >= ?2 AND performed_at <= ?3",
        params![tenant_id, from_sql, to_sql, ts_to_sql(month_start)],
        |row| {
            Ok(MergeStats {
                total_merges: row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                total_unmerges: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                pending_verification: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                merges_this_month: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                average_merge_score: row.get::<_, Option<f64>>(4)?,
            })
        },
    )
    .map_err(Into::into)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::InvalidPayload(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: &str,
) -> Result<T, DatabaseError> {
    serde_json::from_str(value)
        .map_err(|e| DatabaseError::InvalidPayload(format!("merge_history.{column}: {e}")))
}

struct HistoryRow {
    id: String,
    merge_batch_id: String,
    operation: String,
    surviving_patient_id: String,
    deprecated_patient_id: String,
    tenant_id: String,
    surviving_snapshot: String,
    deprecated_snapshot: String,
    post_merge_profile: Option<String>,
    data_migrations: String,
    match_candidate_id: Option<String>,
    match_score: Option<f64>,
    rules_applied: String,
    reason: String,
    performed_by: String,
    performed_at: String,
    verified_at: Option<String>,
    verified_by: Option<String>,
    verification_notes: Option<String>,
    is_reversible: i32,
    rolled_back: i32,
    rolled_back_at: Option<String>,
    rolled_back_by: Option<String>,
    rollback_reason: Option<String>,
    rollback_batch_id: Option<String>,
}

fn map_history_row(row: &rusqlite::Row<'_>) -> Result<HistoryRow, rusqlite::Error> {
    Ok(HistoryRow {
        id: row.get(0)?,
        merge_batch_id: row.get(1)?,
        operation: row.get(2)?,
        surviving_patient_id: row.get(3)?,
        deprecated_patient_id: row.get(4)?,
        tenant_id: row.get(5)?,
        surviving_snapshot: row.get(6)?,
        deprecated_snapshot: row.get(7)?,
        post_merge_profile: row.get(8)?,
        data_migrations: row.get(9)?,
        match_candidate_id: row.get(10)?,
        match_score: row.get(11)?,
        rules_applied: row.get(12)?,
        reason: row.get(13)?,
        performed_by: row.get(14)?,
        performed_at: row.get(15)?,
        verified_at: row.get(16)?,
        verified_by: row.get(17)?,
        verification_notes: row.get(18)?,
        is_reversible: row.get(19)?,
        rolled_back: row.get(20)?,
        rolled_back_at: row.get(21)?,
        rolled_back_by: row.get(22)?,
        rollback_reason: row.get(23)?,
        rollback_batch_id: row.get(24)?,
    })
}

fn history_from_row(row: HistoryRow) -> Result<MergeHistoryRecord, DatabaseError> {
    Ok(MergeHistoryRecord {
        id: uuid_from_sql(&row.id)?,
        merge_batch_id: uuid_from_sql(&row.merge_batch_id)?,
        operation: MergeOperation::from_str(&row.operation)?,
        surviving_patient_id: uuid_from_sql(&row.surviving_patient_id)?,
        deprecated_patient_id: uuid_from_sql(&row.deprecated_patient_id)?,
        tenant_id: row.tenant_id,
        surviving_snapshot: from_json("surviving_snapshot", &row.surviving_snapshot)?,
        deprecated_snapshot: from_json("deprecated_snapshot", &row.deprecated_snapshot)?,
        post_merge_profile: row
            .post_merge_profile
            .as_deref()
            .map(|s| from_json("post_merge_profile", s))
            .transpose()?,
        data_migrations: from_json("data_migrations", &row.data_migrations)?,
        match_candidate_id: row
            .match_candidate_id
            .as_deref()
            .map(uuid_from_sql)
            .transpose()?,
        match_score: row.match_score,
        rules_applied: from_json("rules_applied", &row.rules_applied)?,
        reason: row.reason,
        performed_by: row.performed_by,
        performed_at: ts_from_sql(&row.performed_at),
        verified_at: row.verified_at.as_deref().map(ts_from_sql),
        verified_by: row.verified_by,
        verification_notes: row.verification_notes,
        is_reversible: row.is_reversible != 0,
        rolled_back: row.rolled_back != 0,
        rolled_back_at: row.rolled_back_at.as_deref().map(ts_from_sql),
        rolled_back_by: row.rolled_back_by,
        rollback_reason: row.rollback_reason,
        rollback_batch_id: row
            .rollback_batch_id
            .as_deref()
            .map(uuid_from_sql)
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::{DataMigration, PatientProfile, ProfileSnapshot};
    use chrono::NaiveDate;

    fn ts(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 5, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn make_snapshot(patient_id: Uuid) -> ProfileSnapshot {
        ProfileSnapshot {
            patient_id,
            tenant_id: "tenant-a".into(),
            active: true,
            profile: PatientProfile {
                phone: Some("555-0100".into()),
                ..Default::default()
            },
            collections: vec![],
            taken_at: ts(1, 8),
        }
    }

    fn make_record(
        surviving: Uuid,
        deprecated: Uuid,
        performed_at: NaiveDateTime,
    ) -> MergeHistoryRecord {
        MergeHistoryRecord {
            id: Uuid::new_v4(),
            merge_batch_id: Uuid::new_v4(),
            operation: MergeOperation::Merge,
            surviving_patient_id: surviving,
            deprecated_patient_id: deprecated,
            tenant_id: "tenant-a".into(),
            surviving_snapshot: make_snapshot(surviving),
            deprecated_snapshot: make_snapshot(deprecated),
            post_merge_profile: Some(PatientProfile {
                phone: Some("555-0100".into()),
                ..Default::default()
            }),
            data_migrations: vec![DataMigration::completed("encounters", vec!["e1".into()])],
            match_candidate_id: None,
            match_score: Some(0.93),
            rules_applied: vec!["fill_null".into()],
            reason: "duplicate registration".into(),
            performed_by: "user-7".into(),
            performed_at,
            verified_at: None,
            verified_by: None,
            verification_notes: None,
            is_reversible: true,
            rolled_back: false,
            rolled_back_at: None,
            rolled_back_by: None,
            rollback_reason: None,
            rollback_batch_id: None,
        }
    }

    #[test]
    fn insert_and_round_trip_record() {
        let conn = open_memory_database().unwrap();
        let record = make_record(Uuid::new_v4(), Uuid::new_v4(), ts(2, 10));
        insert_merge_history(&conn, &record).unwrap();

        let fetched = get_merge_history(&conn, &record.id).unwrap().unwrap();
        assert_eq!(fetched.operation, MergeOperation::Merge);
        assert_eq!(fetched.merge_batch_id, record.merge_batch_id);
        assert_eq!(
            fetched.surviving_snapshot.profile.phone.as_deref(),
            Some("555-0100")
        );
        assert_eq!(fetched.data_migrations.len(), 1);
        assert_eq!(fetched.data_migrations[0].collection, "encounters");
        assert_eq!(fetched.match_score, Some(0.93));
        assert!(fetched.is_reversible);
        assert!(!fetched.rolled_back);
    }

    #[test]
    fn get_missing_record_is_none() {
        let conn = open_memory_database().unwrap();
        assert!(get_merge_history(&conn, &Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn history_for_patient_covers_both_sides_newest_first() {
        let conn = open_memory_database().unwrap();
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let p3 = Uuid::new_v4();

        let older = make_record(p1, p2, ts(3, 9));
        let newer = make_record(p3, p1, ts(4, 9));
        let unrelated = make_record(p2, p3, ts(5, 9));
        insert_merge_history(&conn, &older).unwrap();
        insert_merge_history(&conn, &newer).unwrap();
        insert_merge_history(&conn, &unrelated).unwrap();

        let records = history_for_patient(&conn, &p1, 50, true).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, newer.id);
        assert_eq!(records[1].id, older.id);
    }

    #[test]
    fn history_filter_excludes_rolled_back() {
        let conn = open_memory_database().unwrap();
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();

        let mut rolled = make_record(p1, p2, ts(3, 9));
        rolled.rolled_back = true;
        rolled.is_reversible = false;
        rolled.rolled_back_at = Some(ts(4, 9));
        rolled.rolled_back_by = Some("user-9".into());
        rolled.rollback_reason = Some("wrong pair".into());
        rolled.rollback_batch_id = Some(Uuid::new_v4());
        insert_merge_history(&conn, &rolled).unwrap();

        let live = make_record(p1, p2, ts(5, 9));
        insert_merge_history(&conn, &live).unwrap();

        let visible = history_for_patient(&conn, &p1, 50, false).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, live.id);

        let all = history_for_patient(&conn, &p1, 50, true).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn reversible_merges_excludes_rolled_back_and_unmerges() {
        let conn = open_memory_database().unwrap();

        let reversible = make_record(Uuid::new_v4(), Uuid::new_v4(), ts(2, 9));
        insert_merge_history(&conn, &reversible).unwrap();

        let mut rolled = make_record(Uuid::new_v4(), Uuid::new_v4(), ts(3, 9));
        rolled.rolled_back = true;
        rolled.is_reversible = false;
        insert_merge_history(&conn, &rolled).unwrap();

        let mut unmerge = make_record(Uuid::new_v4(), Uuid::new_v4(), ts(4, 9));
        unmerge.operation = MergeOperation::Unmerge;
        unmerge.is_reversible = false;
        insert_merge_history(&conn, &unmerge).unwrap();

        let records = reversible_merges(&conn, "tenant-a", 50).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, reversible.id);
    }

    #[test]
    fn deprecated_reuse_guard_sees_live_merge_only() {
        let conn = open_memory_database().unwrap();
        let deprecated = Uuid::new_v4();

        assert!(!has_active_merge_for_deprecated(&conn, &deprecated).unwrap());

        let record = make_record(Uuid::new_v4(), deprecated, ts(2, 9));
        insert_merge_history(&conn, &record).unwrap();
        assert!(has_active_merge_for_deprecated(&conn, &deprecated).unwrap());

        stamp_rollback(
            &conn,
            &record.id,
            "user-9",
            "bad merge",
            &Uuid::new_v4(),
            &ts(3, 9),
        )
        .unwrap();
        assert!(!has_active_merge_for_deprecated(&conn, &deprecated).unwrap());
    }

    #[test]
    fn rollback_stamp_applies_exactly_once() {
        let conn = open_memory_database().unwrap();
        let record = make_record(Uuid::new_v4(), Uuid::new_v4(), ts(2, 9));
        insert_merge_history(&conn, &record).unwrap();

        let batch = Uuid::new_v4();
        let first = stamp_rollback(&conn, &record.id, "user-9", "bad merge", &batch, &ts(3, 9))
            .unwrap();
        assert_eq!(first, 1);

        let fetched = get_merge_history(&conn, &record.id).unwrap().unwrap();
        assert!(fetched.rolled_back);
        assert!(!fetched.is_reversible);
        assert_eq!(fetched.rollback_batch_id, Some(batch));
        assert_eq!(fetched.rolled_back_by.as_deref(), Some("user-9"));
        assert_eq!(fetched.rollback_reason.as_deref(), Some("bad merge"));

        let second =
            stamp_rollback(&conn, &record.id, "user-9", "again", &Uuid::new_v4(), &ts(4, 9))
                .unwrap();
        assert_eq!(second, 0, "rollback stamp must not apply twice");

        // The first stamp's fields are untouched by the refused second attempt
        let fetched = get_merge_history(&conn, &record.id).unwrap().unwrap();
        assert_eq!(fetched.rollback_reason.as_deref(), Some("bad merge"));
        assert_eq!(fetched.rollback_batch_id, Some(batch));
    }

    #[test]
    fn verification_stamp_does_not_touch_reversibility() {
        let conn = open_memory_database().unwrap();
        let record = make_record(Uuid::new_v4(), Uuid::new_v4(), ts(2, 9));
        insert_merge_history(&conn, &record).unwrap();

        let updated =
            stamp_verification(&conn, &record.id, "auditor-1", Some("looks right"), &ts(3, 9))
                .unwrap();
        assert_eq!(updated, 1);

        let fetched = get_merge_history(&conn, &record.id).unwrap().unwrap();
        assert_eq!(fetched.verified_by.as_deref(), Some("auditor-1"));
        assert_eq!(fetched.verification_notes.as_deref(), Some("looks right"));
        assert!(fetched.verified_at.is_some());
        assert!(fetched.is_reversible);
    }

    #[test]
    fn stats_aggregate_by_tenant_and_window() {
        let conn = open_memory_database().unwrap();

        let mut merged = make_record(Uuid::new_v4(), Uuid::new_v4(), ts(2, 9));
        merged.match_score = Some(0.8);
        insert_merge_history(&conn, &merged).unwrap();

        let mut verified = make_record(Uuid::new_v4(), Uuid::new_v4(), ts(3, 9));
        verified.match_score = Some(0.6);
        verified.verified_at = Some(ts(4, 9));
        verified.verified_by = Some("auditor-1".into());
        insert_merge_history(&conn, &verified).unwrap();

        let mut unmerge = make_record(Uuid::new_v4(), Uuid::new_v4(), ts(5, 9));
        unmerge.operation = MergeOperation::Unmerge;
        unmerge.is_reversible = false;
        unmerge.match_score = None;
        insert_merge_history(&conn, &unmerge).unwrap();

        let mut other_tenant = make_record(Uuid::new_v4(), Uuid::new_v4(), ts(6, 9));
        other_tenant.tenant_id = "tenant-b".into();
        insert_merge_history(&conn, &other_tenant).unwrap();

        let month_start = NaiveDate::from_ymd_opt(2025, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let stats = merge_stats(&conn, "tenant-a", None, None, &month_start).unwrap();
        assert_eq!(stats.total_merges, 2);
        assert_eq!(stats.total_unmerges, 1);
        assert_eq!(stats.pending_verification, 1);
        assert_eq!(stats.merges_this_month, 2);
        let avg = stats.average_merge_score.unwrap();
        assert!((avg - 0.7).abs() < 1e-9);

        // Window narrows the counts
        let stats = merge_stats(&conn, "tenant-a", Some(&ts(3, 0)), Some(&ts(4, 0)), &month_start)
            .unwrap();
        assert_eq!(stats.total_merges, 1);
        assert_eq!(stats.total_unmerges, 0);

        let empty = merge_stats(&conn, "tenant-zz", None, None, &month_start).unwrap();
        assert_eq!(empty.total_merges, 0);
        assert!(empty.average_merge_score.is_none());
    }
}
