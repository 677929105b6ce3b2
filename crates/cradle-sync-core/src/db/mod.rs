//! Database layer for the local health record store.
//!
//! Every write helper comes in two forms: a free function taking a
//! [`Connection`] (so it can run inside a phase transaction) and a
//! `Database` method that delegates to it.

mod assessments;
mod facilities;
mod forms;
mod patients;
mod readings;
mod referrals;
mod schema;
mod state;

pub use assessments::*;
pub use facilities::*;
pub use forms::*;
pub use patients::*;
pub use readings::*;
pub use referrals::*;
pub use schema::*;
pub use state::*;

use rusqlite::{Connection, ErrorCode};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg) if err.code == ErrorCode::ConstraintViolation => {
                DbError::Constraint(msg.clone().unwrap_or_else(|| err.to_string()))
            }
            _ => DbError::Sqlite(e),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Database handle shared between the sync worker and its pipeline consumers.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Wrap into the shared handle used by the sync engine.
    pub fn into_shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }

    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction.
    pub fn transaction(&mut self) -> DbResult<rusqlite::Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Remove every health record, keeping the schema. Used on logout.
    pub fn clear_all_tables(&mut self) -> DbResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            r#"
            DELETE FROM readings;
            DELETE FROM referrals;
            DELETE FROM assessments;
            DELETE FROM patients;
            DELETE FROM health_facilities;
            DELETE FROM form_classifications;
            "#,
        )?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HealthFacility, Patient, Referral, Sex};

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_schema_initialized() {
        let db = Database::open_in_memory().unwrap();

        let tables: Vec<String> = db
            .conn()
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in [
            "patients",
            "readings",
            "referrals",
            "assessments",
            "health_facilities",
            "form_classifications",
            "sync_state",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn test_open_file_reopens_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cradle.db");

        let patient = Patient::new("Asha".into(), Sex::Female);
        {
            let db = Database::open(&path).unwrap();
            db.upsert_patient(&patient).unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_patient(&patient.id).unwrap().unwrap().name, "Asha");
    }

    #[test]
    fn test_clear_all_tables() {
        let mut db = Database::open_in_memory().unwrap();
        let patient = Patient::new("Asha".into(), Sex::Female);
        db.upsert_patient(&patient).unwrap();
        db.upsert_health_facility(&HealthFacility::new("H1".into()), true)
            .unwrap();
        db.add_referral(&Referral::new(patient.id.clone(), "H1".into()))
            .unwrap();

        db.clear_all_tables().unwrap();

        assert!(db.list_patients().unwrap().is_empty());
        assert!(db.list_health_facilities().unwrap().is_empty());
        assert_eq!(db.count_referrals_to_upload().unwrap(), 0);
    }

    #[test]
    fn test_constraint_error_mapped() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .add_referral(&Referral::new("missing".into(), "H1".into()))
            .unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)), "got {:?}", err);
    }
}
