//! Collection migrator: reassigns ownership of dependent records from the
//! deprecated identity to the surviving one, one registered collection at
//! a time.
//!
//! Migrations are independent and non-transactional across collections. A
//! failure in one collection neither stops the attempt on the next nor
//! undoes collections that already completed; the per-collection outcome
//! list is the caller's to judge.

use rusqlite::Connection;
use uuid::Uuid;

use crate::config::{CollectionSpec, DEPENDENT_COLLECTIONS};
use crate::db::repository;
use crate::models::{DataMigration, MigrationStatus};

/// Reassign every registered collection from `deprecated` to `surviving`.
///
/// Returns one [`DataMigration`] per registered collection, in registry
/// order. A collection with zero owned rows records `completed` with an
/// empty id list; a no-op is a success, not a skip.
pub fn migrate_collections(
    conn: &Connection,
    surviving: &Uuid,
    deprecated: &Uuid,
) -> Vec<DataMigration> {
    DEPENDENT_COLLECTIONS
        .iter()
        .map(|spec| migrate_one(conn, spec, surviving, deprecated))
        .collect()
}

fn migrate_one(
    conn: &Connection,
    spec: &CollectionSpec,
    surviving: &Uuid,
    deprecated: &Uuid,
) -> DataMigration {
    let record_ids = match repository::owned_record_ids(conn, spec, deprecated) {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!(
                collection = spec.table,
                deprecated_patient_id = %deprecated,
                error = %e,
                "could not read owned record ids"
            );
            return DataMigration::failed(spec.table, vec![], e.to_string());
        }
    };

    if record_ids.is_empty() {
        return DataMigration::completed(spec.table, record_ids);
    }

    match repository::reassign_records(conn, spec, &record_ids, surviving) {
        Ok(updated) if updated == record_ids.len() => {
            DataMigration::completed(spec.table, record_ids)
        }
        Ok(updated) => {
            let expected = record_ids.len();
            tracing::error!(
                collection = spec.table,
                expected,
                updated,
                "reassignment updated an unexpected row count"
            );
            DataMigration::failed(
                spec.table,
                record_ids,
                format!("expected {expected} rows reassigned, got {updated}"),
            )
        }
        Err(e) => {
            tracing::error!(
                collection = spec.table,
                deprecated_patient_id = %deprecated,
                error = %e,
                "reassignment failed"
            );
            DataMigration::failed(spec.table, record_ids, e.to_string())
        }
    }
}

/// Replay the `completed` migrations of a prior merge, re-pointing the
/// exact recorded id lists back at the deprecated identity.
///
/// Originally `failed` (or already rolled-back) entries are not replayed:
/// their rows never moved. Each replay records `rolled_back` or `failed`
/// independently, with the same no-auto-compensation property as the
/// forward pass.
pub fn rollback_migrations(
    conn: &Connection,
    migrations: &[DataMigration],
    deprecated: &Uuid,
) -> Vec<DataMigration> {
    migrations
        .iter()
        .filter(|m| m.status == MigrationStatus::Completed)
        .map(|m| rollback_one(conn, m, deprecated))
        .collect()
}

fn rollback_one(conn: &Connection, original: &DataMigration, deprecated: &Uuid) -> DataMigration {
    let Some(spec) = crate::config::collection_spec(&original.collection) else {
        // Collection left the registry since the merge was recorded
        tracing::error!(
            collection = %original.collection,
            "collection no longer registered; cannot roll back"
        );
        return DataMigration::failed(
            &original.collection,
            original.record_ids.clone(),
            "collection not registered".into(),
        );
    };

    if original.record_ids.is_empty() {
        return DataMigration::rolled_back(&original.collection, vec![]);
    }

    match repository::reassign_records(conn, spec, &original.record_ids, deprecated) {
        Ok(updated) if updated == original.record_ids.len() => {
            DataMigration::rolled_back(&original.collection, original.record_ids.clone())
        }
        Ok(updated) => {
            let expected = original.record_ids.len();
            tracing::error!(
                collection = %original.collection,
                expected,
                updated,
                "rollback reassignment updated an unexpected row count"
            );
            DataMigration::failed(
                &original.collection,
                original.record_ids.clone(),
                format!("expected {expected} rows reassigned, got {updated}"),
            )
        }
        Err(e) => {
            tracing::error!(
                collection = %original.collection,
                deprecated_patient_id = %deprecated,
                error = %e,
                "rollback reassignment failed"
            );
            DataMigration::failed(&original.collection, original.record_ids.clone(), e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::collection_spec;
    use crate::db::repository::{insert_patient, owned_record_ids};
    use crate::db::sqlite::open_memory_database;
    use crate::models::{Patient, PatientProfile};
    use rusqlite::params;

    fn seeded_patient(conn: &Connection) -> Uuid {
        let patient = Patient::new("tenant-a", PatientProfile::default());
        insert_patient(conn, &patient).unwrap();
        patient.id
    }

    fn insert_encounter(conn: &Connection, patient_id: &Uuid) -> String {
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO encounters (id, patient_id, encounter_type, occurred_at)
             VALUES (?1, ?2, 'office_visit', '2025-04-01 09:00:00')",
            params![id, patient_id.to_string()],
        )
        .unwrap();
        id
    }

    #[test]
    fn zero_owned_rows_is_completed_with_empty_ids() {
        let conn = open_memory_database().unwrap();
        let surviving = seeded_patient(&conn);
        let deprecated = seeded_patient(&conn);

        let migrations = migrate_collections(&conn, &surviving, &deprecated);
        assert_eq!(migrations.len(), DEPENDENT_COLLECTIONS.len());
        for m in &migrations {
            assert_eq!(m.status, MigrationStatus::Completed);
            assert!(m.record_ids.is_empty());
            assert!(m.error.is_none());
        }
    }

    #[test]
    fn migrates_owned_rows_and_reports_per_collection() {
        let conn = open_memory_database().unwrap();
        let surviving = seeded_patient(&conn);
        let deprecated = seeded_patient(&conn);

        let mut encounter_ids: Vec<String> = (0..3)
            .map(|_| insert_encounter(&conn, &deprecated))
            .collect();
        encounter_ids.sort();

        let migrations = migrate_collections(&conn, &surviving, &deprecated);

        let encounters = migrations
            .iter()
            .find(|m| m.collection == "encounters")
            .unwrap();
        assert_eq!(encounters.status, MigrationStatus::Completed);
        assert_eq!(encounters.record_ids, encounter_ids);

        let vitals = migrations.iter().find(|m| m.collection == "vitals").unwrap();
        assert_eq!(vitals.status, MigrationStatus::Completed);
        assert!(vitals.record_ids.is_empty());

        let spec = collection_spec("encounters").unwrap();
        assert_eq!(owned_record_ids(&conn, spec, &surviving).unwrap().len(), 3);
        assert!(owned_record_ids(&conn, spec, &deprecated).unwrap().is_empty());
    }

    #[test]
    fn one_failed_collection_does_not_stop_the_rest() {
        let conn = open_memory_database().unwrap();
        let surviving = seeded_patient(&conn);
        let deprecated = seeded_patient(&conn);
        insert_encounter(&conn, &deprecated);

        // Break one collection; the others must still be attempted
        conn.execute_batch("DROP TABLE vitals;").unwrap();

        let migrations = migrate_collections(&conn, &surviving, &deprecated);
        assert_eq!(migrations.len(), DEPENDENT_COLLECTIONS.len());

        let vitals = migrations.iter().find(|m| m.collection == "vitals").unwrap();
        assert_eq!(vitals.status, MigrationStatus::Failed);
        assert!(vitals.error.is_some());

        let encounters = migrations
            .iter()
            .find(|m| m.collection == "encounters")
            .unwrap();
        assert_eq!(encounters.status, MigrationStatus::Completed);
        assert_eq!(encounters.record_ids.len(), 1);
    }

    #[test]
    fn rollback_replays_completed_migrations_exactly() {
        let conn = open_memory_database().unwrap();
        let surviving = seeded_patient(&conn);
        let deprecated = seeded_patient(&conn);

        let moved = insert_encounter(&conn, &deprecated);
        // A row the surviving identity owned all along must stay put
        let original = insert_encounter(&conn, &surviving);

        let migrations = migrate_collections(&conn, &surviving, &deprecated);
        let rolled = rollback_migrations(&conn, &migrations, &deprecated);

        // Every forward migration completed, so every one is replayed
        assert_eq!(rolled.len(), DEPENDENT_COLLECTIONS.len());
        for m in &rolled {
            assert_eq!(m.status, MigrationStatus::RolledBack);
        }

        let spec = collection_spec("encounters").unwrap();
        assert_eq!(
            owned_record_ids(&conn, spec, &deprecated).unwrap(),
            vec![moved]
        );
        assert_eq!(
            owned_record_ids(&conn, spec, &surviving).unwrap(),
            vec![original]
        );
    }

    #[test]
    fn rollback_skips_originally_failed_migrations() {
        let conn = open_memory_database().unwrap();
        let deprecated = seeded_patient(&conn);

        let migrations = vec![
            DataMigration::completed("encounters", vec![]),
            DataMigration::failed("vitals", vec!["v1".into()], "disk I/O error".into()),
        ];

        let rolled = rollback_migrations(&conn, &migrations, &deprecated);
        assert_eq!(rolled.len(), 1);
        assert_eq!(rolled[0].collection, "encounters");
        assert_eq!(rolled[0].status, MigrationStatus::RolledBack);
    }

    #[test]
    fn rollback_of_unregistered_collection_fails_that_entry_only() {
        let conn = open_memory_database().unwrap();
        let deprecated = seeded_patient(&conn);
        let moved = insert_encounter(&conn, &deprecated);

        let migrations = vec![
            DataMigration::completed("retired_collection", vec!["r1".into()]),
            DataMigration::completed("encounters", vec![moved]),
        ];

        let rolled = rollback_migrations(&conn, &migrations, &deprecated);
        assert_eq!(rolled.len(), 2);
        assert_eq!(rolled[0].status, MigrationStatus::Failed);
        assert_eq!(rolled[0].error.as_deref(), Some("collection not registered"));
        assert_eq!(rolled[1].status, MigrationStatus::RolledBack);
    }
}
