//! Form classification models.

use serde::{Deserialize, Serialize};

/// A form classification with its template, kept as opaque JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormClassification {
    pub id: String,
    pub name: String,
    /// Every other field of the server object (template, versions, questions)
    #[serde(flatten)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_fields_preserved() {
        let form: FormClassification = serde_json::from_str(
            r#"{"id": "f1", "name": "Referral form", "template": {"version": "V1", "questions": []}}"#,
        )
        .unwrap();
        assert_eq!(form.name, "Referral form");
        assert_eq!(form.body["template"]["version"], "V1");
    }
}
