//! Form classification database operations.

use rusqlite::{params, Connection, OptionalExtension};

use super::{Database, DbResult};
use crate::models::FormClassification;

/// Insert or replace the template of a form classification.
pub fn upsert_form_classification(conn: &Connection, form: &FormClassification) -> DbResult<()> {
    let body = serde_json::to_string(&form.body)?;
    conn.execute(
        r#"
        INSERT INTO form_classifications (id, name, body, updated_at)
        VALUES (?1, ?2, ?3, datetime('now'))
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            body = excluded.body,
            updated_at = excluded.updated_at
        "#,
        params![form.id, form.name, body],
    )?;
    Ok(())
}

impl Database {
    pub fn get_form_classification(&self, id: &str) -> DbResult<Option<FormClassification>> {
        let row: Option<(String, String, String)> = self
            .conn
            .query_row(
                "SELECT id, name, body FROM form_classifications WHERE id = ?",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            Some((id, name, body)) => Ok(Some(FormClassification {
                id,
                name,
                body: serde_json::from_str(&body)?,
            })),
            None => Ok(None),
        }
    }

    pub fn list_form_classifications(&self) -> DbResult<Vec<FormClassification>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, body FROM form_classifications ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut forms = Vec::new();
        for row in rows {
            let (id, name, body) = row?;
            forms.push(FormClassification {
                id,
                name,
                body: serde_json::from_str(&body)?,
            });
        }
        Ok(forms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_replaces_body() {
        let db = Database::open_in_memory().unwrap();

        let mut form: FormClassification =
            serde_json::from_str(r#"{"id": "f1", "name": "Intake", "template": {"version": 1}}"#)
                .unwrap();
        upsert_form_classification(db.conn(), &form).unwrap();

        form.body
            .insert("template".into(), serde_json::json!({"version": 2}));
        upsert_form_classification(db.conn(), &form).unwrap();

        let stored = db.get_form_classification("f1").unwrap().unwrap();
        assert_eq!(stored.body["template"]["version"], 2);
        assert_eq!(db.list_form_classifications().unwrap().len(), 1);
    }
}
