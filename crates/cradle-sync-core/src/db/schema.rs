//! SQLite schema definition.

/// Complete database schema for the local record store.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Patients
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    dob TEXT,                                    -- YYYY-MM-DD
    is_exact_dob INTEGER,
    sex TEXT NOT NULL CHECK (sex IN ('MALE', 'FEMALE', 'OTHER')),
    is_pregnant INTEGER NOT NULL DEFAULT 0,
    zone TEXT,
    village_number TEXT,
    household_number TEXT,
    drug_history TEXT NOT NULL DEFAULT '',
    medical_history TEXT NOT NULL DEFAULT '',
    allergy TEXT NOT NULL DEFAULT '',
    is_archived INTEGER NOT NULL DEFAULT 0,
    last_edited INTEGER,                         -- unix seconds, local edit
    base INTEGER                                 -- unix seconds, last server-acknowledged edit
);

CREATE INDEX IF NOT EXISTS idx_patients_name ON patients(name);
CREATE INDEX IF NOT EXISTS idx_patients_upload ON patients(base, last_edited);

-- ============================================================================
-- Health Facilities
-- ============================================================================

CREATE TABLE IF NOT EXISTS health_facilities (
    name TEXT PRIMARY KEY,
    location TEXT,
    phone_number TEXT,
    about TEXT,
    facility_type TEXT,
    is_user_selected INTEGER NOT NULL DEFAULT 0
);

-- ============================================================================
-- Readings
-- ============================================================================

CREATE TABLE IF NOT EXISTS readings (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
    date_taken INTEGER NOT NULL,
    bp_systolic INTEGER NOT NULL,
    bp_diastolic INTEGER NOT NULL,
    heart_rate_bpm INTEGER NOT NULL,
    respiratory_rate INTEGER,
    oxygen_saturation INTEGER,
    temperature INTEGER,
    symptoms TEXT NOT NULL DEFAULT '[]',         -- JSON array of strings
    date_recheck_vitals_needed INTEGER,
    is_flagged_for_follow_up INTEGER NOT NULL DEFAULT 0,
    referral_id TEXT,
    assessment_id TEXT,
    last_edited INTEGER,
    is_uploaded_to_server INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_readings_patient ON readings(patient_id);
CREATE INDEX IF NOT EXISTS idx_readings_upload ON readings(is_uploaded_to_server);

-- ============================================================================
-- Referrals
-- ============================================================================

CREATE TABLE IF NOT EXISTS referrals (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
    reading_id TEXT,
    health_facility_name TEXT NOT NULL REFERENCES health_facilities(name),
    date_referred INTEGER NOT NULL,
    user_id INTEGER,
    comment TEXT,
    is_assessed INTEGER NOT NULL DEFAULT 0,
    is_cancelled INTEGER NOT NULL DEFAULT 0,
    cancel_reason TEXT,
    not_attended INTEGER NOT NULL DEFAULT 0,
    not_attend_reason TEXT,
    last_edited INTEGER,
    is_uploaded_to_server INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_referrals_patient ON referrals(patient_id);
CREATE INDEX IF NOT EXISTS idx_referrals_upload ON referrals(is_uploaded_to_server);

-- ============================================================================
-- Assessments
-- ============================================================================

CREATE TABLE IF NOT EXISTS assessments (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
    reading_id TEXT,
    date_assessed INTEGER NOT NULL,
    health_care_worker_id INTEGER,
    diagnosis TEXT,
    treatment TEXT,
    medication_prescribed TEXT,
    special_investigations TEXT,
    followup_needed INTEGER NOT NULL DEFAULT 0,
    followup_instructions TEXT,
    last_edited INTEGER,
    is_uploaded_to_server INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_assessments_patient ON assessments(patient_id);
CREATE INDEX IF NOT EXISTS idx_assessments_upload ON assessments(is_uploaded_to_server);

-- ============================================================================
-- Form Classifications (read-only, replaced on each download)
-- ============================================================================

CREATE TABLE IF NOT EXISTS form_classifications (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    body TEXT NOT NULL DEFAULT '{}',             -- JSON object, remaining server fields
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ============================================================================
-- Sync State
-- ============================================================================

CREATE TABLE IF NOT EXISTS sync_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn
    }

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        let result = conn.execute_batch(SCHEMA);
        assert!(result.is_ok(), "Schema should be valid SQL: {:?}", result);
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = setup_conn();
        assert!(conn.execute_batch(SCHEMA).is_ok());
    }

    #[test]
    fn test_sex_check_constraint() {
        let conn = setup_conn();

        let result = conn.execute(
            "INSERT INTO patients (id, name, sex) VALUES ('p1', 'Asha', 'F')",
            [],
        );
        assert!(result.is_err());

        let result = conn.execute(
            "INSERT INTO patients (id, name, sex) VALUES ('p1', 'Asha', 'FEMALE')",
            [],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_reading_requires_patient() {
        let conn = setup_conn();

        let result = conn.execute(
            "INSERT INTO readings (id, patient_id, date_taken, bp_systolic, bp_diastolic, heart_rate_bpm)
             VALUES ('r1', 'nobody', 1, 120, 80, 70)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_referral_requires_facility() {
        let conn = setup_conn();
        conn.execute(
            "INSERT INTO patients (id, name, sex) VALUES ('p1', 'Asha', 'FEMALE')",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO referrals (id, patient_id, health_facility_name, date_referred)
             VALUES ('ref1', 'p1', 'Nowhere', 1)",
            [],
        );
        assert!(result.is_err());
    }
}
