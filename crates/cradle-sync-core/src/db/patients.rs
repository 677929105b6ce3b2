//! Patient database operations.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbResult};
use crate::models::{Patient, Sex};

const PATIENT_COLUMNS: &str = "id, name, dob, is_exact_dob, sex, is_pregnant, zone, village_number, \
     household_number, drug_history, medical_history, allergy, is_archived, last_edited, base";

impl ToSql for Sex {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for Sex {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Sex::parse(s).ok_or_else(|| FromSqlError::Other(format!("invalid sex: {}", s).into()))
    }
}

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        name: row.get(1)?,
        dob: row.get(2)?,
        is_exact_dob: row.get(3)?,
        sex: row.get(4)?,
        is_pregnant: row.get(5)?,
        zone: row.get(6)?,
        village_number: row.get(7)?,
        household_number: row.get(8)?,
        drug_history: row.get(9)?,
        medical_history: row.get(10)?,
        allergy: row.get(11)?,
        is_archived: row.get(12)?,
        last_edited: row.get(13)?,
        base: row.get(14)?,
    })
}

/// Insert or update a patient by ID.
///
/// `base` never moves backwards: an incoming NULL or older value keeps the
/// stored one. Uses `ON CONFLICT DO UPDATE` rather than `REPLACE` so the
/// patient's readings, referrals and assessments are not cascade-deleted.
pub fn upsert_patient(conn: &Connection, patient: &Patient) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO patients (
            id, name, dob, is_exact_dob, sex, is_pregnant, zone, village_number,
            household_number, drug_history, medical_history, allergy, is_archived,
            last_edited, base
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            dob = excluded.dob,
            is_exact_dob = excluded.is_exact_dob,
            sex = excluded.sex,
            is_pregnant = excluded.is_pregnant,
            zone = excluded.zone,
            village_number = excluded.village_number,
            household_number = excluded.household_number,
            drug_history = excluded.drug_history,
            medical_history = excluded.medical_history,
            allergy = excluded.allergy,
            is_archived = excluded.is_archived,
            last_edited = excluded.last_edited,
            base = CASE
                WHEN excluded.base IS NULL THEN patients.base
                WHEN patients.base IS NULL THEN excluded.base
                ELSE MAX(patients.base, excluded.base)
            END
        "#,
        params![
            patient.id,
            patient.name,
            patient.dob,
            patient.is_exact_dob,
            patient.sex,
            patient.is_pregnant,
            patient.zone,
            patient.village_number,
            patient.household_number,
            patient.drug_history,
            patient.medical_history,
            patient.allergy,
            patient.is_archived,
            patient.last_edited,
            patient.base,
        ],
    )?;
    Ok(())
}

/// Patients whose local edits the server has not acknowledged.
pub fn patients_to_upload(conn: &Connection) -> DbResult<Vec<Patient>> {
    let sql = format!(
        "SELECT {} FROM patients WHERE base IS NULL OR last_edited > base ORDER BY id",
        PATIENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], patient_from_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

pub fn count_patients_to_upload(conn: &Connection) -> DbResult<u32> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM patients WHERE base IS NULL OR last_edited > base",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

impl Database {
    /// Insert or update a patient.
    pub fn upsert_patient(&self, patient: &Patient) -> DbResult<()> {
        upsert_patient(&self.conn, patient)
    }

    /// Get a patient by ID.
    pub fn get_patient(&self, id: &str) -> DbResult<Option<Patient>> {
        let sql = format!("SELECT {} FROM patients WHERE id = ?", PATIENT_COLUMNS);
        self.conn
            .query_row(&sql, [id], patient_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// List all patients.
    pub fn list_patients(&self) -> DbResult<Vec<Patient>> {
        let sql = format!("SELECT {} FROM patients ORDER BY name", PATIENT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], patient_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn patients_to_upload(&self) -> DbResult<Vec<Patient>> {
        patients_to_upload(&self.conn)
    }

    pub fn count_patients_to_upload(&self) -> DbResult<u32> {
        count_patients_to_upload(&self.conn)
    }

    /// Delete a patient together with its readings, referrals and assessments.
    pub fn delete_patient(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute("DELETE FROM patients WHERE id = ?", [id])?;
        Ok(rows_affected > 0)
    }
}
