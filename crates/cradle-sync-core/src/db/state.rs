//! Key/value sync state (watermarks, session).

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};

impl Database {
    /// Get sync state value.
    pub fn get_sync_state(&self, key: &str) -> DbResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?",
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Set sync state value.
    pub fn set_sync_state(&self, key: &str, value: &str) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO sync_state (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    pub fn remove_sync_state(&self, key: &str) -> DbResult<()> {
        self.conn
            .execute("DELETE FROM sync_state WHERE key = ?", [key])?;
        Ok(())
    }

    /// Drop every key except those in `keep`.
    pub fn clear_sync_state(&self, keep: &[&str]) -> DbResult<()> {
        let mut stmt = self.conn.prepare("SELECT key FROM sync_state")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        for key in keys.iter().filter(|k| !keep.contains(&k.as_str())) {
            self.remove_sync_state(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_state() {
        let db = Database::open_in_memory().unwrap();

        assert_eq!(db.get_sync_state("lastSyncTime").unwrap(), None);

        db.set_sync_state("lastSyncTime", "1700000000").unwrap();
        assert_eq!(
            db.get_sync_state("lastSyncTime").unwrap(),
            Some("1700000000".to_string())
        );

        db.set_sync_state("lastSyncTime", "1700000500").unwrap();
        assert_eq!(
            db.get_sync_state("lastSyncTime").unwrap(),
            Some("1700000500".to_string())
        );
    }

    #[test]
    fn test_clear_keeps_listed_keys() {
        let db = Database::open_in_memory().unwrap();
        db.set_sync_state("hostname", "cradle.local").unwrap();
        db.set_sync_state("token", "abc").unwrap();
        db.set_sync_state("lastSyncTime", "5").unwrap();

        db.clear_sync_state(&["hostname"]).unwrap();

        assert!(db.get_sync_state("hostname").unwrap().is_some());
        assert!(db.get_sync_state("token").unwrap().is_none());
        assert!(db.get_sync_state("lastSyncTime").unwrap().is_none());
    }
}
