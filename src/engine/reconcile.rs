//! Profile reconciler: field-level "best data" merge of a deprecated
//! profile into the surviving one.
//!
//! Two rules only, applied over a fixed allow-list of fields:
//! - scalars fill a null surviving field from the deprecated value;
//! - the two array fields take the order-preserving set union, written
//!   back only when it is strictly larger.
//!
//! Surviving data always wins on conflict. The surviving identity is
//! presumed more current, so a populated surviving field is never
//! overwritten, whatever the deprecated side holds.

use crate::models::PatientProfile;

/// Result of reconciling two profiles. `changed_fields` empty means the
/// surviving profile came through untouched and no write is needed.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub profile: PatientProfile,
    pub changed_fields: Vec<&'static str>,
}

impl ReconcileOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.changed_fields.is_empty()
    }
}

/// Merge `deprecated` into `surviving`, returning the candidate profile
/// and the list of fields it would change. Pure; the caller decides
/// whether to persist.
pub fn reconcile_profiles(
    surviving: &PatientProfile,
    deprecated: &PatientProfile,
) -> ReconcileOutcome {
    let mut profile = surviving.clone();
    let mut changed_fields = Vec::new();

    fill(&mut profile.given_name, &deprecated.given_name, "given_name", &mut changed_fields);
    fill(&mut profile.family_name, &deprecated.family_name, "family_name", &mut changed_fields);
    fill(
        &mut profile.date_of_birth,
        &deprecated.date_of_birth,
        "date_of_birth",
        &mut changed_fields,
    );
    fill(&mut profile.sex, &deprecated.sex, "sex", &mut changed_fields);
    fill(&mut profile.phone, &deprecated.phone, "phone", &mut changed_fields);
    fill(&mut profile.email, &deprecated.email, "email", &mut changed_fields);
    fill(&mut profile.address_line, &deprecated.address_line, "address_line", &mut changed_fields);
    fill(&mut profile.city, &deprecated.city, "city", &mut changed_fields);
    fill(
        &mut profile.state_province,
        &deprecated.state_province,
        "state_province",
        &mut changed_fields,
    );
    fill(&mut profile.postal_code, &deprecated.postal_code, "postal_code", &mut changed_fields);
    fill(&mut profile.country, &deprecated.country, "country", &mut changed_fields);
    fill(
        &mut profile.emergency_contact_name,
        &deprecated.emergency_contact_name,
        "emergency_contact_name",
        &mut changed_fields,
    );
    fill(
        &mut profile.emergency_contact_phone,
        &deprecated.emergency_contact_phone,
        "emergency_contact_phone",
        &mut changed_fields,
    );
    fill(
        &mut profile.preferred_language,
        &deprecated.preferred_language,
        "preferred_language",
        &mut changed_fields,
    );
    fill(
        &mut profile.marital_status,
        &deprecated.marital_status,
        "marital_status",
        &mut changed_fields,
    );

    let conditions = union_preserving_order(&surviving.health_conditions, &deprecated.health_conditions);
    if conditions.len() > surviving.health_conditions.len() {
        profile.health_conditions = conditions;
        changed_fields.push("health_conditions");
    }

    let medications = union_preserving_order(&surviving.medication_names, &deprecated.medication_names);
    if medications.len() > surviving.medication_names.len() {
        profile.medication_names = medications;
        changed_fields.push("medication_names");
    }

    ReconcileOutcome {
        profile,
        changed_fields,
    }
}

fn fill<T: Clone>(
    target: &mut Option<T>,
    source: &Option<T>,
    name: &'static str,
    changed: &mut Vec<&'static str>,
) {
    if target.is_none() && source.is_some() {
        *target = source.clone();
        changed.push(name);
    }
}

/// Case-sensitive set union: surviving entries first, then deprecated
/// entries in first-appearance order, duplicates dropped.
fn union_preserving_order(surviving: &[String], deprecated: &[String]) -> Vec<String> {
    let mut merged = surviving.to_vec();
    for item in deprecated {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with(address: Option<&str>, phone: Option<&str>) -> PatientProfile {
        PatientProfile {
            address_line: address.map(Into::into),
            phone: phone.map(Into::into),
            ..Default::default()
        }
    }

    #[test]
    fn surviving_non_null_field_never_changes() {
        let surviving = profile_with(Some("123 Main"), None);
        let deprecated = profile_with(Some("456 Oak"), Some("555-1111"));

        let outcome = reconcile_profiles(&surviving, &deprecated);
        assert_eq!(outcome.profile.address_line.as_deref(), Some("123 Main"));
        assert_eq!(outcome.profile.phone.as_deref(), Some("555-1111"));
        assert_eq!(outcome.changed_fields, vec!["phone"]);
    }

    #[test]
    fn nothing_to_fill_returns_unchanged() {
        let surviving = profile_with(Some("123 Main"), Some("555-2222"));
        let deprecated = profile_with(Some("456 Oak"), Some("555-1111"));

        let outcome = reconcile_profiles(&surviving, &deprecated);
        assert!(outcome.is_unchanged());
        assert_eq!(outcome.profile, surviving);
    }

    #[test]
    fn empty_deprecated_fills_nothing() {
        let surviving = profile_with(None, None);
        let deprecated = PatientProfile::default();

        let outcome = reconcile_profiles(&surviving, &deprecated);
        assert!(outcome.is_unchanged());
    }

    #[test]
    fn union_grows_never_shrinks_never_duplicates() {
        let surviving = PatientProfile {
            health_conditions: vec!["asthma".into(), "hypertension".into()],
            ..Default::default()
        };
        let deprecated = PatientProfile {
            health_conditions: vec!["hypertension".into(), "diabetes".into(), "asthma".into()],
            ..Default::default()
        };

        let outcome = reconcile_profiles(&surviving, &deprecated);
        assert_eq!(
            outcome.profile.health_conditions,
            vec![
                "asthma".to_string(),
                "hypertension".to_string(),
                "diabetes".to_string()
            ]
        );
        assert_eq!(outcome.changed_fields, vec!["health_conditions"]);
    }

    #[test]
    fn union_equal_sets_is_a_no_op_write() {
        let surviving = PatientProfile {
            medication_names: vec!["metformin".into()],
            ..Default::default()
        };
        let deprecated = PatientProfile {
            medication_names: vec!["metformin".into()],
            ..Default::default()
        };

        let outcome = reconcile_profiles(&surviving, &deprecated);
        assert!(outcome.is_unchanged());
    }

    #[test]
    fn union_is_case_sensitive() {
        let surviving = PatientProfile {
            health_conditions: vec!["Asthma".into()],
            ..Default::default()
        };
        let deprecated = PatientProfile {
            health_conditions: vec!["asthma".into()],
            ..Default::default()
        };

        let outcome = reconcile_profiles(&surviving, &deprecated);
        assert_eq!(
            outcome.profile.health_conditions,
            vec!["Asthma".to_string(), "asthma".to_string()]
        );
    }

    #[test]
    fn scalar_fill_and_union_combine() {
        let surviving = PatientProfile {
            email: Some("ada@example.org".into()),
            medication_names: vec!["lisinopril".into()],
            ..Default::default()
        };
        let deprecated = PatientProfile {
            email: Some("old@example.org".into()),
            emergency_contact_name: Some("Kofi Osei".into()),
            medication_names: vec!["metformin".into()],
            ..Default::default()
        };

        let outcome = reconcile_profiles(&surviving, &deprecated);
        assert_eq!(outcome.profile.email.as_deref(), Some("ada@example.org"));
        assert_eq!(
            outcome.profile.emergency_contact_name.as_deref(),
            Some("Kofi Osei")
        );
        assert_eq!(
            outcome.profile.medication_names,
            vec!["lisinopril".to_string(), "metformin".to_string()]
        );
        assert_eq!(
            outcome.changed_fields,
            vec!["emergency_contact_name", "medication_names"]
        );
    }
}
