use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use serde_json::Value;
use uuid::Uuid;

use crate::config::CollectionSpec;
use crate::db::DatabaseError;

// SQLite's default host-parameter limit is 999; stay well under it when
// expanding id lists into IN (...) clauses.
const ID_CHUNK: usize = 400;

/// All record ids in a collection currently owned by the given patient.
pub fn owned_record_ids(
    conn: &Connection,
    spec: &CollectionSpec,
    patient_id: &Uuid,
) -> Result<Vec<String>, DatabaseError> {
    let sql = format!(
        "SELECT id FROM {} WHERE {} = ?1 ORDER BY id",
        spec.table, spec.owner_key
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![patient_id.to_string()], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Reassign ownership of exactly the given record ids to `new_owner`.
///
/// Returns the number of rows actually updated. The caller compares this
/// against the id list; the migrator treats a shortfall as a failure.
pub fn reassign_records(
    conn: &Connection,
    spec: &CollectionSpec,
    record_ids: &[String],
    new_owner: &Uuid,
) -> Result<usize, DatabaseError> {
    let mut updated = 0;
    for chunk in record_ids.chunks(ID_CHUNK) {
        let placeholders = (0..chunk.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} = ?1 WHERE id IN ({placeholders})",
            spec.table, spec.owner_key
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut values: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(chunk.len() + 1);
        let owner = new_owner.to_string();
        values.push(&owner);
        for id in chunk {
            values.push(id);
        }
        updated += stmt.execute(values.as_slice())?;
    }
    Ok(updated)
}

/// Up to `cap` of the most recent rows owned by the patient, as raw JSON
/// objects keyed by column name.
///
/// The snapshot store keeps dependent data schema-agnostically; clinical
/// payloads are provenance here, not typed entities.
pub fn sample_rows(
    conn: &Connection,
    spec: &CollectionSpec,
    patient_id: &Uuid,
    cap: u32,
) -> Result<Vec<Value>, DatabaseError> {
    let sql = format!(
        "SELECT * FROM {} WHERE {} = ?1 ORDER BY {} DESC LIMIT ?2",
        spec.table, spec.owner_key, spec.order_by
    );
    let mut stmt = conn.prepare(&sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|c| c.to_string())
        .collect();

    let rows = stmt
        .query_map(params![patient_id.to_string(), cap], |row| {
            let mut obj = serde_json::Map::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                let value = match row.get_ref(i)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(n) => Value::from(n),
                    ValueRef::Real(f) => Value::from(f),
                    ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).into_owned()),
                    // No dependent table stores blobs today; skip rather than guess an encoding.
                    ValueRef::Blob(_) => Value::Null,
                };
                obj.insert(name.clone(), value);
            }
            Ok(Value::Object(obj))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
