use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{date_from_sql, ts_from_sql, ts_to_sql, uuid_from_sql};
use crate::db::DatabaseError;
use crate::models::{Patient, PatientProfile};

const PATIENT_COLUMNS: &str = "id, tenant_id, given_name, family_name, date_of_birth, sex, \
     phone, email, address_line, city, state_province, postal_code, country, \
     emergency_contact_name, emergency_contact_phone, preferred_language, marital_status, \
     health_conditions, medication_names, active, deactivated_at, deactivation_reason, \
     created_at, updated_at";

pub fn insert_patient(conn: &Connection, patient: &Patient) -> Result<(), DatabaseError> {
    let p = &patient.profile;
    conn.execute(
        &format!(
            "INSERT INTO patients ({PATIENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)"
        ),
        params![
            patient.id.to_string(),
            patient.tenant_id,
            p.given_name,
            p.family_name,
            p.date_of_birth.map(|d| d.to_string()),
            p.sex,
            p.phone,
            p.email,
            p.address_line,
            p.city,
            p.state_province,
            p.postal_code,
            p.country,
            p.emergency_contact_name,
            p.emergency_contact_phone,
            p.preferred_language,
            p.marital_status,
            json_list(&p.health_conditions)?,
            json_list(&p.medication_names)?,
            patient.active as i32,
            patient.deactivated_at.as_ref().map(ts_to_sql),
            patient.deactivation_reason,
            ts_to_sql(&patient.created_at),
            ts_to_sql(&patient.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_patient(conn: &Connection, id: &Uuid) -> Result<Option<Patient>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?1"
    ))?;

    let result = stmt.query_row(params![id.to_string()], |row| {
        Ok(PatientRow {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            given_name: row.get(2)?,
            family_name: row.get(3)?,
            date_of_birth: row.get(4)?,
            sex: row.get(5)?,
            phone: row.get(6)?,
            email: row.get(7)?,
            address_line: row.get(8)?,
            city: row.get(9)?,
            state_province: row.get(10)?,
            postal_code: row.get(11)?,
            country: row.get(12)?,
            emergency_contact_name: row.get(13)?,
            emergency_contact_phone: row.get(14)?,
            preferred_language: row.get(15)?,
            marital_status: row.get(16)?,
            health_conditions: row.get(17)?,
            medication_names: row.get(18)?,
            active: row.get(19)?,
            deactivated_at: row.get(20)?,
            deactivation_reason: row.get(21)?,
            created_at: row.get(22)?,
            updated_at: row.get(23)?,
        })
    });

    match result {
        Ok(row) => Ok(Some(patient_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Overwrite the mutable profile columns of an identity.
///
/// Lifecycle columns (`active`, `deactivated_at`, `created_at`) and the
/// identity itself are deliberately out of reach of this statement; the
/// rollback restore path relies on that.
pub fn update_profile(
    conn: &Connection,
    id: &Uuid,
    profile: &PatientProfile,
) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE patients SET
             given_name = ?2, family_name = ?3, date_of_birth = ?4, sex = ?5,
             phone = ?6, email = ?7, address_line = ?8, city = ?9,
             state_province = ?10, postal_code = ?11, country = ?12,
             emergency_contact_name = ?13, emergency_contact_phone = ?14,
             preferred_language = ?15, marital_status = ?16,
             health_conditions = ?17, medication_names = ?18, updated_at = ?19
         WHERE id = ?1",
        params![
            id.to_string(),
            profile.given_name,
            profile.family_name,
            profile.date_of_birth.map(|d| d.to_string()),
            profile.sex,
            profile.phone,
            profile.email,
            profile.address_line,
            profile.city,
            profile.state_province,
            profile.postal_code,
            profile.country,
            profile.emergency_contact_name,
            profile.emergency_contact_phone,
            profile.preferred_language,
            profile.marital_status,
            json_list(&profile.health_conditions)?,
            json_list(&profile.medication_names)?,
            ts_to_sql(&Utc::now().naive_utc()),
        ],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "patient".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Mark an identity inactive with a reason. The row is kept; only an
/// unmerge reactivates it.
pub fn deactivate_patient(
    conn: &Connection,
    id: &Uuid,
    reason: &str,
    at: &NaiveDateTime,
) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE patients SET active = 0, deactivated_at = ?2, deactivation_reason = ?3,
             updated_at = ?2
         WHERE id = ?1",
        params![id.to_string(), ts_to_sql(at), reason],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "patient".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn reactivate_patient(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE patients SET active = 1, deactivated_at = NULL, deactivation_reason = NULL,
             updated_at = ?2
         WHERE id = ?1",
        params![id.to_string(), ts_to_sql(&Utc::now().naive_utc())],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "patient".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

fn json_list(items: &[String]) -> Result<String, DatabaseError> {
    serde_json::to_string(items).map_err(|e| DatabaseError::InvalidPayload(e.to_string()))
}

struct PatientRow {
    id: String,
    tenant_id: String,
    given_name: Option<String>,
    family_name: Option<String>,
    date_of_birth: Option<String>,
    sex: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    address_line: Option<String>,
    city: Option<String>,
    state_province: Option<String>,
    postal_code: Option<String>,
    country: Option<String>,
    emergency_contact_name: Option<String>,
    emergency_contact_phone: Option<String>,
    preferred_language: Option<String>,
    marital_status: Option<String>,
    health_conditions: String,
    medication_names: String,
    active: i32,
    deactivated_at: Option<String>,
    deactivation_reason: Option<String>,
    created_at: String,
    updated_at: String,
}

fn patient_from_row(row: PatientRow) -> Result<Patient, DatabaseError> {
    Ok(Patient {
        id: uuid_from_sql(&row.id)?,
        tenant_id: row.tenant_id,
        profile: PatientProfile {
            given_name: row.given_name,
            family_name: row.family_name,
            date_of_birth: row.date_of_birth.as_deref().and_then(date_from_sql),
            sex: row.sex,
            phone: row.phone,
            email: row.email,
            address_line: row.address_line,
            city: row.city,
            state_province: row.state_province,
            postal_code: row.postal_code,
            country: row.country,
            emergency_contact_name: row.emergency_contact_name,
            emergency_contact_phone: row.emergency_contact_phone,
            preferred_language: row.preferred_language,
            marital_status: row.marital_status,
            health_conditions: serde_json::from_str(&row.health_conditions).unwrap_or_default(),
            medication_names: serde_json::from_str(&row.medication_names).unwrap_or_default(),
        },
        active: row.active != 0,
        deactivated_at: row.deactivated_at.as_deref().map(ts_from_sql),
        deactivation_reason: row.deactivation_reason,
        created_at: ts_from_sql(&row.created_at),
        updated_at: ts_from_sql(&row.updated_at),
    })
}
