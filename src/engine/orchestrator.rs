//! Merge orchestrator: sequences the forward merge and the single-shot
//! unmerge, and owns the engine's public failure semantics.
//!
//! There is no compensation on failure. If snapshotting succeeds and the
//! migration step partially fails, the operation still proceeds to the
//! ledger write: partial completion is the true state of the world and
//! must be auditable rather than hidden. Nothing is retried.

use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use super::migrate::{migrate_collections, rollback_migrations};
use super::reconcile::reconcile_profiles;
use super::snapshot::take_snapshot;
use super::{EngineError, MergeOutcome, MergeRequest, UnmergeRequest};
use crate::db::repository;
use crate::models::{MergeHistoryRecord, MergeOperation, MigrationStatus};

/// Consolidate the deprecated identity into the surviving one.
///
/// Steps, in order: precondition checks → snapshot both identities →
/// reconcile profile fields onto the surviving identity → migrate
/// dependent collections → deactivate the deprecated identity → mark the
/// match candidate merged → write the ledger record with
/// `is_reversible = true`.
pub fn merge_patients(
    conn: &Connection,
    request: &MergeRequest,
) -> Result<MergeOutcome, EngineError> {
    let merge_batch_id = Uuid::new_v4();
    tracing::info!(
        merge_batch_id = %merge_batch_id,
        surviving_patient_id = %request.surviving_patient_id,
        deprecated_patient_id = %request.deprecated_patient_id,
        tenant_id = %request.tenant_id,
        "starting patient merge"
    );

    match execute_merge(conn, request, merge_batch_id) {
        Ok(outcome) => {
            let failed = outcome
                .data_migrations
                .iter()
                .filter(|m| m.status == MigrationStatus::Failed)
                .count();
            if failed > 0 {
                tracing::warn!(
                    merge_batch_id = %merge_batch_id,
                    merge_history_id = %outcome.merge_history_id,
                    failed_collections = failed,
                    "merge completed with partial migration failure"
                );
            } else {
                tracing::info!(
                    merge_batch_id = %merge_batch_id,
                    merge_history_id = %outcome.merge_history_id,
                    "merge completed"
                );
            }
            Ok(outcome)
        }
        Err(e) => {
            tracing::error!(
                operation = "merge",
                merge_batch_id = %merge_batch_id,
                surviving_patient_id = %request.surviving_patient_id,
                deprecated_patient_id = %request.deprecated_patient_id,
                error = %e,
                "merge failed"
            );
            Err(e)
        }
    }
}

fn execute_merge(
    conn: &Connection,
    request: &MergeRequest,
    merge_batch_id: Uuid,
) -> Result<MergeOutcome, EngineError> {
    if request.surviving_patient_id == request.deprecated_patient_id {
        return Err(EngineError::OperationFailed(
            "cannot merge an identity into itself".into(),
        ));
    }

    let surviving = repository::get_patient(conn, &request.surviving_patient_id)?.ok_or_else(
        || EngineError::NotFound {
            entity_type: "patient".into(),
            id: request.surviving_patient_id.to_string(),
        },
    )?;
    let deprecated = repository::get_patient(conn, &request.deprecated_patient_id)?.ok_or_else(
        || EngineError::NotFound {
            entity_type: "patient".into(),
            id: request.deprecated_patient_id.to_string(),
        },
    )?;

    if surviving.tenant_id != request.tenant_id || deprecated.tenant_id != request.tenant_id {
        return Err(EngineError::OperationFailed(
            "identities do not belong to the requesting tenant".into(),
        ));
    }
    if !surviving.active {
        return Err(EngineError::OperationFailed(
            "surviving identity is not active".into(),
        ));
    }
    if !deprecated.active {
        return Err(EngineError::OperationFailed(
            "deprecated identity is not active".into(),
        ));
    }
    if repository::has_active_merge_for_deprecated(conn, &deprecated.id)? {
        return Err(EngineError::OperationFailed(
            "identity is already the deprecated side of an active merge".into(),
        ));
    }

    let surviving_snapshot = take_snapshot(conn, &surviving.id)?;
    let deprecated_snapshot = take_snapshot(conn, &deprecated.id)?;

    let reconciled = reconcile_profiles(&surviving.profile, &deprecated_snapshot.profile);
    if !reconciled.is_unchanged() {
        repository::update_profile(conn, &surviving.id, &reconciled.profile)?;
        tracing::debug!(
            surviving_patient_id = %surviving.id,
            changed_fields = ?reconciled.changed_fields,
            "profile reconciled"
        );
    }

    let data_migrations = migrate_collections(conn, &surviving.id, &deprecated.id);

    let now = Utc::now().naive_utc();
    repository::deactivate_patient(
        conn,
        &deprecated.id,
        &format!("merged into {}", surviving.id),
        &now,
    )?;

    if let Some(candidate_id) = request.match_candidate_id {
        if repository::mark_candidate_merged(conn, &candidate_id, &now)? == 0 {
            tracing::warn!(
                match_candidate_id = %candidate_id,
                "match candidate not found; provenance not stamped"
            );
        }
    }

    let record = MergeHistoryRecord {
        id: Uuid::new_v4(),
        merge_batch_id,
        operation: MergeOperation::Merge,
        surviving_patient_id: surviving.id,
        deprecated_patient_id: deprecated.id,
        tenant_id: request.tenant_id.clone(),
        surviving_snapshot,
        deprecated_snapshot,
        post_merge_profile: Some(reconciled.profile),
        data_migrations: data_migrations.clone(),
        match_candidate_id: request.match_candidate_id,
        match_score: request.match_score,
        rules_applied: request.rules_applied.clone(),
        reason: request.reason.clone(),
        performed_by: request.performed_by.clone(),
        performed_at: now,
        verified_at: None,
        verified_by: None,
        verification_notes: None,
        is_reversible: true,
        rolled_back: false,
        rolled_back_at: None,
        rolled_back_by: None,
        rollback_reason: None,
        rollback_batch_id: None,
    };
    repository::insert_merge_history(conn, &record)?;

    Ok(MergeOutcome {
        merge_history_id: record.id,
        merge_batch_id,
        surviving_patient_id: surviving.id,
        deprecated_patient_id: deprecated.id,
        data_migrations,
    })
}

/// Reverse a prior merge, exactly once.
///
/// Preconditions are checked against the ledger record before any
/// mutation: the record must be a reversible, not-yet-rolled-back merge,
/// or the call fails fast with no state change. The reversal then
/// reactivates the deprecated identity, replays completed migrations
/// back, restores the surviving profile from the pre-merge snapshot,
/// stamps the original record, and writes a new `unmerge` ledger entry
/// that can never itself be undone.
pub fn unmerge_patients(
    conn: &Connection,
    request: &UnmergeRequest,
) -> Result<MergeOutcome, EngineError> {
    tracing::info!(
        merge_history_id = %request.merge_history_id,
        "starting merge reversal"
    );

    match execute_unmerge(conn, request) {
        Ok(outcome) => {
            tracing::info!(
                merge_batch_id = %outcome.merge_batch_id,
                merge_history_id = %outcome.merge_history_id,
                "merge reversal completed"
            );
            Ok(outcome)
        }
        Err(e) => {
            tracing::error!(
                operation = "unmerge",
                merge_history_id = %request.merge_history_id,
                error = %e,
                "merge reversal failed"
            );
            Err(e)
        }
    }
}

fn execute_unmerge(
    conn: &Connection,
    request: &UnmergeRequest,
) -> Result<MergeOutcome, EngineError> {
    let record = repository::get_merge_history(conn, &request.merge_history_id)?.ok_or_else(
        || EngineError::NotFound {
            entity_type: "merge_history".into(),
            id: request.merge_history_id.to_string(),
        },
    )?;

    if record.operation != MergeOperation::Merge {
        return Err(EngineError::OperationFailed(format!(
            "only merge operations can be reversed, found {}",
            record.operation.as_str()
        )));
    }
    if record.rolled_back {
        return Err(EngineError::OperationFailed(
            "merge has already been rolled back".into(),
        ));
    }
    if !record.is_reversible {
        return Err(EngineError::OperationFailed(
            "merge is not reversible".into(),
        ));
    }

    let rollback_batch_id = Uuid::new_v4();

    // Pre-reversal snapshots feed the unmerge ledger entry
    let surviving_snapshot = take_snapshot(conn, &record.surviving_patient_id)?;
    let deprecated_snapshot = take_snapshot(conn, &record.deprecated_patient_id)?;

    repository::reactivate_patient(conn, &record.deprecated_patient_id)?;

    let reversal_migrations =
        rollback_migrations(conn, &record.data_migrations, &record.deprecated_patient_id);

    // Profile-only restore from the pre-merge snapshot; identity and
    // lifecycle columns are out of reach of update_profile by design of
    // that statement.
    repository::update_profile(
        conn,
        &record.surviving_patient_id,
        &record.surviving_snapshot.profile,
    )?;

    let now = Utc::now().naive_utc();
    let stamped = repository::stamp_rollback(
        conn,
        &record.id,
        &request.performed_by,
        &request.reason,
        &rollback_batch_id,
        &now,
    )?;
    if stamped == 0 {
        // A concurrent reversal won the stamp
        return Err(EngineError::OperationFailed(
            "merge has already been rolled back".into(),
        ));
    }

    let unmerge_record = MergeHistoryRecord {
        id: Uuid::new_v4(),
        merge_batch_id: rollback_batch_id,
        operation: MergeOperation::Unmerge,
        surviving_patient_id: record.surviving_patient_id,
        deprecated_patient_id: record.deprecated_patient_id,
        tenant_id: record.tenant_id.clone(),
        surviving_snapshot,
        deprecated_snapshot,
        post_merge_profile: Some(record.surviving_snapshot.profile.clone()),
        data_migrations: reversal_migrations.clone(),
        match_candidate_id: record.match_candidate_id,
        match_score: record.match_score,
        rules_applied: vec![],
        reason: request.reason.clone(),
        performed_by: request.performed_by.clone(),
        performed_at: now,
        verified_at: None,
        verified_by: None,
        verification_notes: None,
        // An unmerge can never itself be undone
        is_reversible: false,
        rolled_back: false,
        rolled_back_at: None,
        rolled_back_by: None,
        rollback_reason: None,
        rollback_batch_id: None,
    };
    repository::insert_merge_history(conn, &unmerge_record)?;

    if let Some(candidate_id) = record.match_candidate_id {
        let note = format!("merge rolled back: {}", request.reason);
        if repository::reset_candidate_pending(conn, &candidate_id, &note, &now)? == 0 {
            tracing::warn!(
                match_candidate_id = %candidate_id,
                "match candidate not found; status not reset"
            );
        }
    }

    Ok(MergeOutcome {
        merge_history_id: unmerge_record.id,
        merge_batch_id: rollback_batch_id,
        surviving_patient_id: record.surviving_patient_id,
        deprecated_patient_id: record.deprecated_patient_id,
        data_migrations: reversal_migrations,
    })
}
