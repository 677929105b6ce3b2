//! Vital-sign reading models.

use serde::{Deserialize, Serialize};

use super::{Assessment, Referral};

/// One set of vital signs taken for a patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub id: String,
    pub patient_id: String,
    /// Unix seconds
    pub date_taken: i64,
    pub bp_systolic: i32,
    pub bp_diastolic: i32,
    #[serde(rename = "heartRateBPM")]
    pub heart_rate_bpm: i32,
    #[serde(default)]
    pub respiratory_rate: Option<i32>,
    #[serde(default)]
    pub oxygen_saturation: Option<i32>,
    #[serde(default)]
    pub temperature: Option<i32>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub date_recheck_vitals_needed: Option<i64>,
    #[serde(default)]
    pub is_flagged_for_follow_up: bool,
    #[serde(default)]
    pub referral_id: Option<String>,
    #[serde(default)]
    pub assessment_id: Option<String>,
    #[serde(default)]
    pub last_edited: Option<i64>,

    /// Older servers nest the referral inside the reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral: Option<Referral>,
    /// Older servers nest the assessment inside the reading.
    #[serde(default, rename = "followup", skip_serializing_if = "Option::is_none")]
    pub followup: Option<Assessment>,

    /// Local only
    #[serde(skip_serializing, default)]
    pub is_uploaded_to_server: bool,
}

impl Reading {
    /// Create a locally taken reading for `patient_id`.
    pub fn new(patient_id: String, bp_systolic: i32, bp_diastolic: i32, heart_rate_bpm: i32) -> Self {
        let now = super::unix_now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id,
            date_taken: now,
            bp_systolic,
            bp_diastolic,
            heart_rate_bpm,
            respiratory_rate: None,
            oxygen_saturation: None,
            temperature: None,
            symptoms: Vec::new(),
            date_recheck_vitals_needed: None,
            is_flagged_for_follow_up: false,
            referral_id: None,
            assessment_id: None,
            last_edited: Some(now),
            referral: None,
            followup: None,
            is_uploaded_to_server: false,
        }
    }

    /// Detach any nested referral or assessment, leaving only their IDs behind.
    pub fn take_embedded(&mut self) -> (Option<Referral>, Option<Assessment>) {
        let referral = self.referral.take();
        let followup = self.followup.take();
        if let Some(r) = &referral {
            self.referral_id = Some(r.id.clone());
        }
        if let Some(a) = &followup {
            self.assessment_id = Some(a.id.clone());
        }
        (referral, followup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_flag_not_serialized() {
        let mut reading = Reading::new("p1".into(), 120, 80, 70);
        reading.is_uploaded_to_server = true;

        let json = serde_json::to_value(&reading).unwrap();
        assert!(json.get("isUploadedToServer").is_none());
        assert_eq!(json["heartRateBPM"], 70);
        assert!(json.get("referral").is_none());
    }

    #[test]
    fn test_take_embedded_hoists_ids() {
        let json = r#"{
            "id": "r1", "patientId": "p1", "dateTaken": 10,
            "bpSystolic": 150, "bpDiastolic": 95, "heartRateBPM": 88,
            "referral": {
                "id": "ref1", "patientId": "p1", "healthFacilityName": "H1", "dateReferred": 11
            },
            "followup": {
                "id": "a1", "patientId": "p1", "dateAssessed": 12
            }
        }"#;
        let mut reading: Reading = serde_json::from_str(json).unwrap();
        assert!(!reading.is_uploaded_to_server);

        let (referral, followup) = reading.take_embedded();
        assert_eq!(referral.unwrap().health_facility_name, "H1");
        assert_eq!(followup.unwrap().date_assessed, 12);
        assert_eq!(reading.referral_id.as_deref(), Some("ref1"));
        assert_eq!(reading.assessment_id.as_deref(), Some("a1"));
        assert!(reading.referral.is_none());
    }
}
