//! Referral database operations.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbResult};
use crate::models::Referral;

const REFERRAL_COLUMNS: &str = "id, patient_id, reading_id, health_facility_name, date_referred, \
     user_id, comment, is_assessed, is_cancelled, cancel_reason, not_attended, not_attend_reason, \
     last_edited, is_uploaded_to_server";

fn referral_from_row(row: &Row<'_>) -> rusqlite::Result<Referral> {
    Ok(Referral {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        reading_id: row.get(2)?,
        health_facility_name: row.get(3)?,
        date_referred: row.get(4)?,
        user_id: row.get(5)?,
        comment: row.get(6)?,
        is_assessed: row.get(7)?,
        is_cancelled: row.get(8)?,
        cancel_reason: row.get(9)?,
        not_attended: row.get(10)?,
        not_attend_reason: row.get(11)?,
        last_edited: row.get(12)?,
        is_uploaded_to_server: row.get(13)?,
    })
}

/// Insert or update a referral by ID, setting its upload flag to `uploaded`.
pub fn upsert_referral(conn: &Connection, referral: &Referral, uploaded: bool) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO referrals (
            id, patient_id, reading_id, health_facility_name, date_referred, user_id,
            comment, is_assessed, is_cancelled, cancel_reason, not_attended,
            not_attend_reason, last_edited, is_uploaded_to_server
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT(id) DO UPDATE SET
            patient_id = excluded.patient_id,
            reading_id = excluded.reading_id,
            health_facility_name = excluded.health_facility_name,
            date_referred = excluded.date_referred,
            user_id = excluded.user_id,
            comment = excluded.comment,
            is_assessed = excluded.is_assessed,
            is_cancelled = excluded.is_cancelled,
            cancel_reason = excluded.cancel_reason,
            not_attended = excluded.not_attended,
            not_attend_reason = excluded.not_attend_reason,
            last_edited = excluded.last_edited,
            is_uploaded_to_server = excluded.is_uploaded_to_server
        "#,
        params![
            referral.id,
            referral.patient_id,
            referral.reading_id,
            referral.health_facility_name,
            referral.date_referred,
            referral.user_id,
            referral.comment,
            referral.is_assessed,
            referral.is_cancelled,
            referral.cancel_reason,
            referral.not_attended,
            referral.not_attend_reason,
            referral.last_edited,
            uploaded,
        ],
    )?;
    Ok(())
}

pub fn referrals_to_upload(conn: &Connection) -> DbResult<Vec<Referral>> {
    let sql = format!(
        "SELECT {} FROM referrals WHERE is_uploaded_to_server = 0 ORDER BY date_referred",
        REFERRAL_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], referral_from_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

pub fn count_referrals_to_upload(conn: &Connection) -> DbResult<u32> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM referrals WHERE is_uploaded_to_server = 0",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

impl Database {
    /// Save a locally created or edited referral.
    pub fn add_referral(&self, referral: &Referral) -> DbResult<()> {
        upsert_referral(&self.conn, referral, false)
    }

    pub fn get_referral(&self, id: &str) -> DbResult<Option<Referral>> {
        let sql = format!("SELECT {} FROM referrals WHERE id = ?", REFERRAL_COLUMNS);
        self.conn
            .query_row(&sql, [id], referral_from_row)
            .optional()
            .map_err(Into::into)
    }

    pub fn referrals_for_patient(&self, patient_id: &str) -> DbResult<Vec<Referral>> {
        let sql = format!(
            "SELECT {} FROM referrals WHERE patient_id = ? ORDER BY date_referred DESC",
            REFERRAL_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([patient_id], referral_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn referrals_to_upload(&self) -> DbResult<Vec<Referral>> {
        referrals_to_upload(&self.conn)
    }

    pub fn count_referrals_to_upload(&self) -> DbResult<u32> {
        count_referrals_to_upload(&self.conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbError;
    use crate::models::{HealthFacility, Patient, Sex};

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        let mut patient = Patient::new("Asha".into(), Sex::Female);
        patient.id = "p1".into();
        db.upsert_patient(&patient).unwrap();
        db.upsert_health_facility(&HealthFacility::new("H1".into()), false)
            .unwrap();
        db
    }

    #[test]
    fn test_add_and_cancel() {
        let db = setup_db();

        let mut referral = Referral::new("p1".into(), "H1".into());
        db.add_referral(&referral).unwrap();

        referral.cancel("patient moved".into());
        db.add_referral(&referral).unwrap();

        let stored = db.get_referral(&referral.id).unwrap().unwrap();
        assert!(stored.is_cancelled);
        assert_eq!(stored.cancel_reason.as_deref(), Some("patient moved"));
        assert_eq!(db.referrals_for_patient("p1").unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_facility_rejected() {
        let db = setup_db();

        let referral = Referral::new("p1".into(), "Nowhere".into());
        assert!(matches!(db.add_referral(&referral), Err(DbError::Constraint(_))));
        assert!(db.get_referral(&referral.id).unwrap().is_none());
    }

    #[test]
    fn test_server_write_clears_dirty() {
        let db = setup_db();

        let referral = Referral::new("p1".into(), "H1".into());
        db.add_referral(&referral).unwrap();
        assert_eq!(db.count_referrals_to_upload().unwrap(), 1);

        upsert_referral(db.conn(), &referral, true).unwrap();
        assert!(db.referrals_to_upload().unwrap().is_empty());

        // A later local edit makes it dirty again
        db.add_referral(&referral).unwrap();
        assert_eq!(db.count_referrals_to_upload().unwrap(), 1);
    }
}
