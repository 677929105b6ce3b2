//! Health facility database operations.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DbResult};
use crate::models::HealthFacility;

fn facility_from_row(row: &Row<'_>) -> rusqlite::Result<HealthFacility> {
    Ok(HealthFacility {
        name: row.get(0)?,
        location: row.get(1)?,
        phone_number: row.get(2)?,
        about: row.get(3)?,
        facility_type: row.get(4)?,
        is_user_selected: row.get(5)?,
    })
}

/// Insert or update a facility by name.
///
/// The user's selection survives updates; `select_if_new` only applies to
/// facilities seen for the first time.
pub fn upsert_health_facility(
    conn: &Connection,
    facility: &HealthFacility,
    select_if_new: bool,
) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO health_facilities (
            name, location, phone_number, about, facility_type, is_user_selected
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(name) DO UPDATE SET
            location = excluded.location,
            phone_number = excluded.phone_number,
            about = excluded.about,
            facility_type = excluded.facility_type
        "#,
        params![
            facility.name,
            facility.location,
            facility.phone_number,
            facility.about,
            facility.facility_type,
            select_if_new,
        ],
    )?;
    Ok(())
}

impl Database {
    pub fn upsert_health_facility(&self, facility: &HealthFacility, select_if_new: bool) -> DbResult<()> {
        upsert_health_facility(&self.conn, facility, select_if_new)
    }

    pub fn get_health_facility(&self, name: &str) -> DbResult<Option<HealthFacility>> {
        self.conn
            .query_row(
                r#"
                SELECT name, location, phone_number, about, facility_type, is_user_selected
                FROM health_facilities
                WHERE name = ?
                "#,
                [name],
                facility_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_health_facilities(&self) -> DbResult<Vec<HealthFacility>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT name, location, phone_number, about, facility_type, is_user_selected
            FROM health_facilities
            ORDER BY name
            "#,
        )?;
        let rows = stmt.query_map([], facility_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Facilities the user picked for referrals.
    pub fn selected_health_facilities(&self) -> DbResult<Vec<HealthFacility>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT name, location, phone_number, about, facility_type, is_user_selected
            FROM health_facilities
            WHERE is_user_selected = 1
            ORDER BY name
            "#,
        )?;
        let rows = stmt.query_map([], facility_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Toggle whether the user picked a facility. Returns false if unknown.
    pub fn set_health_facility_selected(&self, name: &str, selected: bool) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE health_facilities SET is_user_selected = ? WHERE name = ?",
            params![selected, name],
        )?;
        Ok(rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_survives_update() {
        let db = Database::open_in_memory().unwrap();

        let mut facility = HealthFacility::new("H1".into());
        db.upsert_health_facility(&facility, false).unwrap();
        db.set_health_facility_selected("H1", true).unwrap();

        facility.location = Some("Kampala".into());
        db.upsert_health_facility(&facility, false).unwrap();

        let stored = db.get_health_facility("H1").unwrap().unwrap();
        assert!(stored.is_user_selected);
        assert_eq!(stored.location.as_deref(), Some("Kampala"));
    }

    #[test]
    fn test_select_if_new() {
        let db = Database::open_in_memory().unwrap();

        db.upsert_health_facility(&HealthFacility::new("H1".into()), true)
            .unwrap();
        db.upsert_health_facility(&HealthFacility::new("H2".into()), false)
            .unwrap();

        let selected: Vec<String> = db
            .selected_health_facilities()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(selected, vec!["H1".to_string()]);
        assert_eq!(db.list_health_facilities().unwrap().len(), 2);
        assert!(!db.set_health_facility_selected("H9", true).unwrap());
    }
}
