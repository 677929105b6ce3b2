//! Reading database operations.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{upsert_assessment, upsert_referral, Database, DbResult};
use crate::models::Reading;

const READING_COLUMNS: &str = "id, patient_id, date_taken, bp_systolic, bp_diastolic, heart_rate_bpm, \
     respiratory_rate, oxygen_saturation, temperature, symptoms, date_recheck_vitals_needed, \
     is_flagged_for_follow_up, referral_id, assessment_id, last_edited, is_uploaded_to_server";

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<Reading> {
    let symptoms_json: String = row.get(9)?;
    let symptoms = serde_json::from_str(&symptoms_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;
    Ok(Reading {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        date_taken: row.get(2)?,
        bp_systolic: row.get(3)?,
        bp_diastolic: row.get(4)?,
        heart_rate_bpm: row.get(5)?,
        respiratory_rate: row.get(6)?,
        oxygen_saturation: row.get(7)?,
        temperature: row.get(8)?,
        symptoms,
        date_recheck_vitals_needed: row.get(10)?,
        is_flagged_for_follow_up: row.get(11)?,
        referral_id: row.get(12)?,
        assessment_id: row.get(13)?,
        last_edited: row.get(14)?,
        referral: None,
        followup: None,
        is_uploaded_to_server: row.get(15)?,
    })
}

/// Insert or update a reading by ID, setting its upload flag to `uploaded`.
pub fn upsert_reading(conn: &Connection, reading: &Reading, uploaded: bool) -> DbResult<()> {
    let symptoms = serde_json::to_string(&reading.symptoms)?;
    conn.execute(
        r#"
        INSERT INTO readings (
            id, patient_id, date_taken, bp_systolic, bp_diastolic, heart_rate_bpm,
            respiratory_rate, oxygen_saturation, temperature, symptoms,
            date_recheck_vitals_needed, is_flagged_for_follow_up, referral_id,
            assessment_id, last_edited, is_uploaded_to_server
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
        ON CONFLICT(id) DO UPDATE SET
            patient_id = excluded.patient_id,
            date_taken = excluded.date_taken,
            bp_systolic = excluded.bp_systolic,
            bp_diastolic = excluded.bp_diastolic,
            heart_rate_bpm = excluded.heart_rate_bpm,
            respiratory_rate = excluded.respiratory_rate,
            oxygen_saturation = excluded.oxygen_saturation,
            temperature = excluded.temperature,
            symptoms = excluded.symptoms,
            date_recheck_vitals_needed = excluded.date_recheck_vitals_needed,
            is_flagged_for_follow_up = excluded.is_flagged_for_follow_up,
            referral_id = COALESCE(excluded.referral_id, readings.referral_id),
            assessment_id = COALESCE(excluded.assessment_id, readings.assessment_id),
            last_edited = excluded.last_edited,
            is_uploaded_to_server = excluded.is_uploaded_to_server
        "#,
        params![
            reading.id,
            reading.patient_id,
            reading.date_taken,
            reading.bp_systolic,
            reading.bp_diastolic,
            reading.heart_rate_bpm,
            reading.respiratory_rate,
            reading.oxygen_saturation,
            reading.temperature,
            symptoms,
            reading.date_recheck_vitals_needed,
            reading.is_flagged_for_follow_up,
            reading.referral_id,
            reading.assessment_id,
            reading.last_edited,
            uploaded,
        ],
    )?;
    Ok(())
}

/// Store a reading the server sent, hoisting any nested referral or
/// assessment into their own tables. Everything is marked uploaded.
pub fn store_server_reading(conn: &Connection, mut reading: Reading) -> DbResult<()> {
    let (referral, followup) = reading.take_embedded();
    upsert_reading(conn, &reading, true)?;
    if let Some(referral) = referral {
        upsert_referral(conn, &referral, true)?;
    }
    if let Some(assessment) = followup {
        upsert_assessment(conn, &assessment, true)?;
    }
    Ok(())
}

pub fn readings_to_upload(conn: &Connection) -> DbResult<Vec<Reading>> {
    let sql = format!(
        "SELECT {} FROM readings WHERE is_uploaded_to_server = 0 ORDER BY date_taken",
        READING_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], reading_from_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

pub fn count_readings_to_upload(conn: &Connection) -> DbResult<u32> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM readings WHERE is_uploaded_to_server = 0",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

impl Database {
    /// Save a locally taken or edited reading; it will be uploaded on next sync.
    pub fn add_reading(&self, reading: &Reading) -> DbResult<()> {
        upsert_reading(&self.conn, reading, false)
    }

    pub fn get_reading(&self, id: &str) -> DbResult<Option<Reading>> {
        let sql = format!("SELECT {} FROM readings WHERE id = ?", READING_COLUMNS);
        self.conn
            .query_row(&sql, [id], reading_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// All readings of a patient, newest first.
    pub fn readings_for_patient(&self, patient_id: &str) -> DbResult<Vec<Reading>> {
        let sql = format!(
            "SELECT {} FROM readings WHERE patient_id = ? ORDER BY date_taken DESC",
            READING_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([patient_id], reading_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn readings_to_upload(&self) -> DbResult<Vec<Reading>> {
        readings_to_upload(&self.conn)
    }

    pub fn count_readings_to_upload(&self) -> DbResult<u32> {
        count_readings_to_upload(&self.conn)
    }

    /// Mark every reading as uploaded. Returns how many changed.
    pub fn mark_all_readings_uploaded(&self) -> DbResult<usize> {
        let rows_affected = self.conn.execute(
            "UPDATE readings SET is_uploaded_to_server = 1 WHERE is_uploaded_to_server = 0",
            [],
        )?;
        Ok(rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbError;
    use crate::models::{Assessment, HealthFacility, Patient, Referral, Sex};

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        let mut patient = Patient::new("Asha".into(), Sex::Female);
        patient.id = "p1".into();
        db.upsert_patient(&patient).unwrap();
        db
    }

    #[test]
    fn test_add_and_get() {
        let db = setup_db();

        let mut reading = Reading::new("p1".into(), 140, 90, 80);
        reading.symptoms = vec!["headache".into(), "blurred vision".into()];
        db.add_reading(&reading).unwrap();

        let retrieved = db.get_reading(&reading.id).unwrap().unwrap();
        assert_eq!(retrieved.symptoms, reading.symptoms);
        assert_eq!(retrieved.bp_systolic, 140);
        assert!(!retrieved.is_uploaded_to_server);
    }

    #[test]
    fn test_corrupt_symptoms_is_an_error() {
        let db = setup_db();
        let reading = Reading::new("p1".into(), 120, 80, 70);
        db.add_reading(&reading).unwrap();
        db.conn()
            .execute("UPDATE readings SET symptoms = 'not json' WHERE id = ?", [&reading.id])
            .unwrap();

        let result = db.get_reading(&reading.id);
        assert!(
            matches!(result, Err(DbError::Sqlite(rusqlite::Error::FromSqlConversionFailure(9, _, _)))),
            "{:?}",
            result
        );
    }

    #[test]
    fn test_reading_for_missing_patient_rejected() {
        let db = setup_db();

        let reading = Reading::new("ghost".into(), 120, 80, 70);
        let result = db.add_reading(&reading);

        assert!(matches!(result, Err(DbError::Constraint(_))));
        assert!(db.get_reading(&reading.id).unwrap().is_none());
    }

    #[test]
    fn test_upload_flag_tracks_query() {
        let db = setup_db();

        let local = Reading::new("p1".into(), 120, 80, 70);
        let from_server = Reading::new("p1".into(), 110, 70, 65);
        db.add_reading(&local).unwrap();
        store_server_reading(db.conn(), from_server.clone()).unwrap();

        let dirty = db.readings_to_upload().unwrap();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].id, local.id);
        assert_eq!(db.count_readings_to_upload().unwrap(), 1);

        assert_eq!(db.mark_all_readings_uploaded().unwrap(), 1);
        assert_eq!(db.count_readings_to_upload().unwrap(), 0);
    }

    #[test]
    fn test_store_server_reading_hoists_embedded() {
        let db = setup_db();
        db.upsert_health_facility(&HealthFacility::new("H1".into()), false)
            .unwrap();

        let mut reading = Reading::new("p1".into(), 160, 110, 90);
        let mut referral = Referral::new("p1".into(), "H1".into());
        referral.reading_id = Some(reading.id.clone());
        let followup = Assessment::new("p1".into());
        reading.referral = Some(referral.clone());
        reading.followup = Some(followup.clone());

        store_server_reading(db.conn(), reading.clone()).unwrap();

        let stored = db.get_reading(&reading.id).unwrap().unwrap();
        assert_eq!(stored.referral_id, Some(referral.id.clone()));
        assert_eq!(stored.assessment_id, Some(followup.id.clone()));
        assert!(stored.is_uploaded_to_server);

        let stored_referral = db.get_referral(&referral.id).unwrap().unwrap();
        assert!(stored_referral.is_uploaded_to_server);
        assert!(db.get_assessment(&followup.id).unwrap().is_some());
    }

    #[test]
    fn test_cascade_delete() {
        let db = setup_db();
        db.upsert_health_facility(&HealthFacility::new("H1".into()), false)
            .unwrap();

        db.add_reading(&Reading::new("p1".into(), 120, 80, 70)).unwrap();
        db.add_reading(&Reading::new("p1".into(), 125, 85, 72)).unwrap();
        db.add_referral(&Referral::new("p1".into(), "H1".into()))
            .unwrap();
        db.add_assessment(&Assessment::new("p1".into())).unwrap();

        db.delete_patient("p1").unwrap();

        assert!(db.readings_for_patient("p1").unwrap().is_empty());
        assert!(db.referrals_for_patient("p1").unwrap().is_empty());
        assert!(db.assessments_for_patient("p1").unwrap().is_empty());
        // Facilities are not owned by patients
        assert!(db.get_health_facility("H1").unwrap().is_some());
    }
}
