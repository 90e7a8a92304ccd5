use rusqlite::Connection;

use crate::db::DatabaseError;

/// A single consistency issue detected by the checker.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConsistencyIssue {
    pub category: String,
    pub severity: String,
    pub description: String,
    pub record_id: Option<String>,
}

/// Result of a consistency check over the merge ledger and identity rows.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConsistencyReport {
    pub issues: Vec<ConsistencyIssue>,
    pub records_checked: i64,
}

/// Run a full consistency check across the merge ledger.
///
/// Detects:
/// - Identities still active while deprecated by a live merge
/// - Rolled-back records missing rollback metadata
/// - Rolled-back or unmerge records still flagged reversible
/// - Rollback links pointing at no unmerge entry
pub fn check_merge_consistency(conn: &Connection) -> Result<ConsistencyReport, DatabaseError> {
    let mut issues = Vec::new();

    let records_checked: i64 =
        conn.query_row("SELECT COUNT(*) FROM merge_history", [], |row| row.get(0))?;

    // 1. Deprecated side of a live merge should be inactive
    let mut stmt = conn.prepare(
        "SELECT h.id FROM merge_history h
         JOIN patients p ON p.id = h.deprecated_patient_id
         WHERE h.operation = 'merge' AND h.rolled_back = 0 AND p.active = 1",
    )?;
    let rows: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();
    drop(stmt);
    for id in rows {
        issues.push(ConsistencyIssue {
            category: "deprecated_still_active".into(),
            severity: "high".into(),
            description: "Deprecated side of a live merge is still an active identity".into(),
            record_id: Some(id),
        });
    }

    // 2. Rollback stamp must be complete
    let mut stmt = conn.prepare(
        "SELECT id FROM merge_history
         WHERE rolled_back = 1
           AND (rolled_back_at IS NULL OR rolled_back_by IS NULL
                OR rollback_reason IS NULL OR rollback_batch_id IS NULL)",
    )?;
    let rows: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();
    drop(stmt);
    for id in rows {
        issues.push(ConsistencyIssue {
            category: "incomplete_rollback_stamp".into(),
            severity: "high".into(),
            description: "Rolled-back record is missing rollback metadata".into(),
            record_id: Some(id),
        });
    }

    // 3. rolled_back and is_reversible are mutually exclusive; an unmerge
    //    is never reversible
    let mut stmt = conn.prepare(
        "SELECT id FROM merge_history
         WHERE is_reversible = 1 AND (rolled_back = 1 OR operation = 'unmerge')",
    )?;
    let rows: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();
    drop(stmt);
    for id in rows {
        issues.push(ConsistencyIssue {
            category: "invalid_reversibility".into(),
            severity: "high".into(),
            description: "Record flagged reversible despite rollback or unmerge operation".into(),
            record_id: Some(id),
        });
    }

    // 4. A rollback link must resolve to an unmerge ledger entry
    let mut stmt = conn.prepare(
        "SELECT h.id FROM merge_history h
         WHERE h.rollback_batch_id IS NOT NULL
           AND NOT EXISTS (
               SELECT 1 FROM merge_history u
               WHERE u.merge_batch_id = h.rollback_batch_id AND u.operation = 'unmerge')",
    )?;
    let rows: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();
    drop(stmt);
    for id in rows {
        issues.push(ConsistencyIssue {
            category: "dangling_rollback_link".into(),
            severity: "medium".into(),
            description: "rollback_batch_id points at no unmerge ledger entry".into(),
            record_id: Some(id),
        });
    }

    Ok(ConsistencyReport {
        issues,
        records_checked,
    })
}
