//! Assessment (follow-up) models.

use serde::{Deserialize, Serialize};

/// A health worker's assessment of a patient, usually answering a referral.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: String,
    pub patient_id: String,
    #[serde(default)]
    pub reading_id: Option<String>,
    /// Unix seconds
    pub date_assessed: i64,
    #[serde(default)]
    pub health_care_worker_id: Option<i64>,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub treatment: Option<String>,
    #[serde(default)]
    pub medication_prescribed: Option<String>,
    #[serde(default)]
    pub special_investigations: Option<String>,
    #[serde(default)]
    pub followup_needed: bool,
    #[serde(default)]
    pub followup_instructions: Option<String>,
    #[serde(default)]
    pub last_edited: Option<i64>,

    /// Local only
    #[serde(skip_serializing, default)]
    pub is_uploaded_to_server: bool,
}

impl Assessment {
    pub fn new(patient_id: String) -> Self {
        let now = super::unix_now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id,
            reading_id: None,
            date_assessed: now,
            health_care_worker_id: None,
            diagnosis: None,
            treatment: None,
            medication_prescribed: None,
            special_investigations: None,
            followup_needed: false,
            followup_instructions: None,
            last_edited: Some(now),
            is_uploaded_to_server: false,
        }
    }
}
