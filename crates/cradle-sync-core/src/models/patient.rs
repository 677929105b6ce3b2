//! Patient models.

use serde::{Deserialize, Serialize};

/// Biological sex as the server encodes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sex {
    Male,
    Female,
    Other,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "MALE",
            Sex::Female => "FEMALE",
            Sex::Other => "OTHER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MALE" => Some(Sex::Male),
            "FEMALE" => Some(Sex::Female),
            "OTHER" => Some(Sex::Other),
            _ => None,
        }
    }
}

/// A patient record.
///
/// `last_edited` is the local modification time and `base` the edit time the
/// server last acknowledged. A patient needs upload whenever it has never been
/// acknowledged or was edited after the acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    pub name: String,
    /// Date of birth, `YYYY-MM-DD`
    #[serde(default)]
    pub dob: Option<String>,
    /// False when `dob` was estimated from a stated age
    #[serde(default)]
    pub is_exact_dob: Option<bool>,
    pub sex: Sex,
    #[serde(default)]
    pub is_pregnant: bool,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub village_number: Option<String>,
    #[serde(default)]
    pub household_number: Option<String>,
    #[serde(default)]
    pub drug_history: String,
    #[serde(default)]
    pub medical_history: String,
    #[serde(default)]
    pub allergy: String,
    #[serde(default)]
    pub is_archived: bool,
    /// Unix seconds of the last local edit
    #[serde(default)]
    pub last_edited: Option<i64>,
    /// Unix seconds of the last edit the server has seen
    #[serde(default)]
    pub base: Option<i64>,
}

impl Patient {
    /// Create a new, never-synced patient.
    pub fn new(name: String, sex: Sex) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            dob: None,
            is_exact_dob: None,
            sex,
            is_pregnant: false,
            zone: None,
            village_number: None,
            household_number: None,
            drug_history: String::new(),
            medical_history: String::new(),
            allergy: String::new(),
            is_archived: false,
            last_edited: Some(super::unix_now()),
            base: None,
        }
    }

    /// Record a local edit.
    pub fn touch(&mut self) {
        self.last_edited = Some(super::unix_now());
    }

    /// Check whether local changes still have to reach the server.
    pub fn needs_upload(&self) -> bool {
        match (self.base, self.last_edited) {
            (None, _) => true,
            (Some(base), Some(edited)) => edited > base,
            (Some(_), None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_patient() {
        let patient = Patient::new("Asha".into(), Sex::Female);
        assert_eq!(patient.name, "Asha");
        assert!(patient.needs_upload());
        assert_eq!(patient.id.len(), 36); // UUID format
    }

    #[test]
    fn test_needs_upload() {
        let mut patient = Patient::new("Asha".into(), Sex::Female);
        patient.last_edited = Some(100);
        patient.base = Some(50);
        assert!(patient.needs_upload());

        patient.base = Some(100);
        assert!(!patient.needs_upload());
    }

    #[test]
    fn test_wire_names() {
        let json = r#"{
            "id": "p1", "name": "Asha", "sex": "FEMALE", "isPregnant": true,
            "villageNumber": "12", "drugHistory": "none", "lastEdited": 100, "base": 100
        }"#;
        let patient: Patient = serde_json::from_str(json).unwrap();
        assert_eq!(patient.sex, Sex::Female);
        assert!(patient.is_pregnant);
        assert_eq!(patient.village_number.as_deref(), Some("12"));
        assert_eq!(patient.base, Some(100));

        let out = serde_json::to_value(&patient).unwrap();
        assert_eq!(out["householdNumber"], serde_json::Value::Null);
        assert_eq!(out["lastEdited"], 100);
    }

    #[test]
    fn test_sex_roundtrip_str() {
        for sex in [Sex::Male, Sex::Female, Sex::Other] {
            assert_eq!(Sex::parse(sex.as_str()), Some(sex));
        }
        assert_eq!(Sex::parse("unknown"), None);
    }
}
