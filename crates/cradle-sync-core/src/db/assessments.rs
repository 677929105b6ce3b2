//! Assessment database operations.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbResult};
use crate::models::Assessment;

const ASSESSMENT_COLUMNS: &str = "id, patient_id, reading_id, date_assessed, health_care_worker_id, \
     diagnosis, treatment, medication_prescribed, special_investigations, followup_needed, \
     followup_instructions, last_edited, is_uploaded_to_server";

fn assessment_from_row(row: &Row<'_>) -> rusqlite::Result<Assessment> {
    Ok(Assessment {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        reading_id: row.get(2)?,
        date_assessed: row.get(3)?,
        health_care_worker_id: row.get(4)?,
        diagnosis: row.get(5)?,
        treatment: row.get(6)?,
        medication_prescribed: row.get(7)?,
        special_investigations: row.get(8)?,
        followup_needed: row.get(9)?,
        followup_instructions: row.get(10)?,
        last_edited: row.get(11)?,
        is_uploaded_to_server: row.get(12)?,
    })
}

/// Insert or update an assessment by ID, setting its upload flag to `uploaded`.
pub fn upsert_assessment(conn: &Connection, assessment: &Assessment, uploaded: bool) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO assessments (
            id, patient_id, reading_id, date_assessed, health_care_worker_id, diagnosis,
            treatment, medication_prescribed, special_investigations, followup_needed,
            followup_instructions, last_edited, is_uploaded_to_server
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT(id) DO UPDATE SET
            patient_id = excluded.patient_id,
            reading_id = excluded.reading_id,
            date_assessed = excluded.date_assessed,
            health_care_worker_id = excluded.health_care_worker_id,
            diagnosis = excluded.diagnosis,
            treatment = excluded.treatment,
            medication_prescribed = excluded.medication_prescribed,
            special_investigations = excluded.special_investigations,
            followup_needed = excluded.followup_needed,
            followup_instructions = excluded.followup_instructions,
            last_edited = excluded.last_edited,
            is_uploaded_to_server = excluded.is_uploaded_to_server
        "#,
        params![
            assessment.id,
            assessment.patient_id,
            assessment.reading_id,
            assessment.date_assessed,
            assessment.health_care_worker_id,
            assessment.diagnosis,
            assessment.treatment,
            assessment.medication_prescribed,
            assessment.special_investigations,
            assessment.followup_needed,
            assessment.followup_instructions,
            assessment.last_edited,
            uploaded,
        ],
    )?;
    Ok(())
}

pub fn assessments_to_upload(conn: &Connection) -> DbResult<Vec<Assessment>> {
    let sql = format!(
        "SELECT {} FROM assessments WHERE is_uploaded_to_server = 0 ORDER BY date_assessed",
        ASSESSMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], assessment_from_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

pub fn count_assessments_to_upload(conn: &Connection) -> DbResult<u32> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM assessments WHERE is_uploaded_to_server = 0",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

impl Database {
    /// Save a locally created or edited assessment.
    pub fn add_assessment(&self, assessment: &Assessment) -> DbResult<()> {
        upsert_assessment(&self.conn, assessment, false)
    }

    pub fn get_assessment(&self, id: &str) -> DbResult<Option<Assessment>> {
        let sql = format!("SELECT {} FROM assessments WHERE id = ?", ASSESSMENT_COLUMNS);
        self.conn
            .query_row(&sql, [id], assessment_from_row)
            .optional()
            .map_err(Into::into)
    }

    pub fn assessments_for_patient(&self, patient_id: &str) -> DbResult<Vec<Assessment>> {
        let sql = format!(
            "SELECT {} FROM assessments WHERE patient_id = ? ORDER BY date_assessed DESC",
            ASSESSMENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([patient_id], assessment_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn assessments_to_upload(&self) -> DbResult<Vec<Assessment>> {
        assessments_to_upload(&self.conn)
    }

    pub fn count_assessments_to_upload(&self) -> DbResult<u32> {
        count_assessments_to_upload(&self.conn)
    }
}
