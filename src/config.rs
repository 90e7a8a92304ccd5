/// Crate-level constants and the dependent-collection registry.
pub const ENGINE_NAME: &str = "patient-merge";
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum rows captured per dependent collection in a profile snapshot.
/// Snapshots are provenance for rollback review, not a full export.
pub const SNAPSHOT_SAMPLE_CAP: u32 = 100;

/// Default tracing filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    "patient_merge=info".to_string()
}

/// One dependent collection the migrator and snapshot store operate on.
///
/// All three fields are raw SQL identifiers interpolated into statements,
/// so they must only ever come from `DEPENDENT_COLLECTIONS` below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSpec {
    /// Table name of the collection.
    pub table: &'static str,
    /// Column holding the owning patient id.
    pub owner_key: &'static str,
    /// Timestamp column used to pick the most recent rows for snapshots.
    pub order_by: &'static str,
}

/// The fixed registry of collections that carry a foreign key to a patient
/// identity. Adding a dependent record type to the product means adding a
/// row here and a table to the schema migration; nothing is discovered at
/// runtime.
pub const DEPENDENT_COLLECTIONS: &[CollectionSpec] = &[
    CollectionSpec {
        table: "encounters",
        owner_key: "patient_id",
        order_by: "occurred_at",
    },
    CollectionSpec {
        table: "clinical_notes",
        owner_key: "patient_id",
        order_by: "authored_at",
    },
    CollectionSpec {
        table: "vitals",
        owner_key: "patient_id",
        order_by: "recorded_at",
    },
    CollectionSpec {
        table: "medication_orders",
        owner_key: "patient_id",
        order_by: "prescribed_at",
    },
    CollectionSpec {
        table: "allergy_records",
        owner_key: "patient_id",
        order_by: "recorded_at",
    },
];

/// Look up a registered collection by table name.
pub fn collection_spec(table: &str) -> Option<&'static CollectionSpec> {
    DEPENDENT_COLLECTIONS.iter().find(|s| s.table == table)
}
