//! Health facility models.

use serde::{Deserialize, Serialize};

/// A health facility, keyed by its unique name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthFacility {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default, rename = "type")]
    pub facility_type: Option<String>,

    /// Whether the user picked this facility for referrals (local only)
    #[serde(skip_serializing, default)]
    pub is_user_selected: bool,
}

impl HealthFacility {
    pub fn new(name: String) -> Self {
        Self {
            name,
            location: None,
            phone_number: None,
            about: None,
            facility_type: None,
            is_user_selected: false,
        }
    }
}
