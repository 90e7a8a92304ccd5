use serde::{Deserialize, Serialize};

use super::enums::{MigrationAction, MigrationStatus};

/// Outcome of one collection's ownership reassignment within a merge.
///
/// Migrations are independent across collections: a `failed` entry never
/// undoes a `completed` sibling, and the full list is persisted on the
/// ledger record so partial completion stays visible. Record ids are kept
/// as opaque strings; the migrator reassigns them, it never parses them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataMigration {
    pub collection: String,
    pub action: MigrationAction,
    pub record_ids: Vec<String>,
    pub status: MigrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DataMigration {
    pub fn completed(collection: &str, record_ids: Vec<String>) -> Self {
        Self {
            collection: collection.into(),
            action: MigrationAction::Reassign,
            record_ids,
            status: MigrationStatus::Completed,
            error: None,
        }
    }

    pub fn failed(collection: &str, record_ids: Vec<String>, error: String) -> Self {
        Self {
            collection: collection.into(),
            action: MigrationAction::Reassign,
            record_ids,
            status: MigrationStatus::Failed,
            error: Some(error),
        }
    }

    pub fn rolled_back(collection: &str, record_ids: Vec<String>) -> Self {
        Self {
            collection: collection.into(),
            action: MigrationAction::Reassign,
            record_ids,
            status: MigrationStatus::RolledBack,
            error: None,
        }
    }
}
