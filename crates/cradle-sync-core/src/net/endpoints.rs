//! Server endpoint URLs.

use crate::config::SyncConfig;

/// Builds every URL the engine talks to from the configured base.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            base: config.base_url(),
        }
    }

    pub fn from_base(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn authentication(&self) -> String {
        format!("{}/user/auth", self.base)
    }

    pub fn sync_patients(&self, since: i64) -> String {
        format!("{}/sync/patients?since={}", self.base, since)
    }

    pub fn sync_readings(&self, since: i64) -> String {
        format!("{}/sync/readings?since={}", self.base, since)
    }

    pub fn sync_referrals(&self, since: i64) -> String {
        format!("{}/sync/referrals?since={}", self.base, since)
    }

    pub fn sync_assessments(&self, since: i64) -> String {
        format!("{}/sync/assessments?since={}", self.base, since)
    }

    pub fn health_facilities(&self) -> String {
        format!("{}/facilities", self.base)
    }

    pub fn form_classifications(&self) -> String {
        format!("{}/forms/classifications/summary", self.base)
    }

    pub fn all_patients(&self) -> String {
        format!("{}/mobile/patients", self.base)
    }

    pub fn all_readings(&self) -> String {
        format!("{}/mobile/readings", self.base)
    }

    pub fn all_referrals(&self) -> String {
        format!("{}/mobile/referrals", self.base)
    }

    pub fn all_assessments(&self) -> String {
        format!("{}/mobile/assessments", self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let endpoints = Endpoints::new(&SyncConfig::new("cradle.org").with_port(8443));
        assert_eq!(endpoints.base(), "https://cradle.org:8443/api");
        assert_eq!(
            endpoints.sync_readings(1700),
            "https://cradle.org:8443/api/sync/readings?since=1700"
        );
        assert_eq!(
            endpoints.form_classifications(),
            "https://cradle.org:8443/api/forms/classifications/summary"
        );
    }

    #[test]
    fn test_from_base_trims_slash() {
        let endpoints = Endpoints::from_base("http://localhost:5000/api/");
        assert_eq!(endpoints.authentication(), "http://localhost:5000/api/user/auth");
    }
}
