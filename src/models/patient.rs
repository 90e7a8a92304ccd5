use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The mutable profile fields of a patient identity.
///
/// These are the only fields the reconciler and rollback restore ever
/// touch. Identity and lifecycle columns (`id`, `tenant_id`, `active`,
/// `created_at`) live on [`Patient`] and are immutable to profile writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address_line: Option<String>,
    pub city: Option<String>,
    pub state_province: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub preferred_language: Option<String>,
    pub marital_status: Option<String>,
    /// Free-text condition list; merged by order-preserving set union.
    pub health_conditions: Vec<String>,
    /// Free-text medication-name list; merged by order-preserving set union.
    pub medication_names: Vec<String>,
}

/// A durable patient identity row.
///
/// Deactivation (losing a merge) never deletes the row; the identity is
/// marked inactive with a reason and can be reactivated only by an unmerge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub tenant_id: String,
    pub profile: PatientProfile,
    pub active: bool,
    pub deactivated_at: Option<NaiveDateTime>,
    pub deactivation_reason: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Patient {
    /// Create a new active identity. Registration itself happens outside
    /// the engine; this constructor exists for the intake layer and tests.
    pub fn new(tenant_id: impl Into<String>, profile: PatientProfile) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            profile,
            active: true,
            deactivated_at: None,
            deactivation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}
