//! Referral models.

use serde::{Deserialize, Serialize};

/// A referral of a patient to a health facility.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Referral {
    pub id: String,
    pub patient_id: String,
    #[serde(default)]
    pub reading_id: Option<String>,
    pub health_facility_name: String,
    /// Unix seconds
    pub date_referred: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub is_assessed: bool,
    #[serde(default)]
    pub is_cancelled: bool,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub not_attended: bool,
    #[serde(default)]
    pub not_attend_reason: Option<String>,
    #[serde(default)]
    pub last_edited: Option<i64>,

    /// Local only
    #[serde(skip_serializing, default)]
    pub is_uploaded_to_server: bool,
}

impl Referral {
    pub fn new(patient_id: String, health_facility_name: String) -> Self {
        let now = super::unix_now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id,
            reading_id: None,
            health_facility_name,
            date_referred: now,
            user_id: None,
            comment: None,
            is_assessed: false,
            is_cancelled: false,
            cancel_reason: None,
            not_attended: false,
            not_attend_reason: None,
            last_edited: Some(now),
            is_uploaded_to_server: false,
        }
    }

    /// Cancel the referral with a reason.
    pub fn cancel(&mut self, reason: String) {
        self.is_cancelled = true;
        self.cancel_reason = Some(reason);
        self.last_edited = Some(super::unix_now());
    }
}
