use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

use crate::Database;

impl Database {
    pub fn get_record(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        self.with_conn(|conn| query_record(conn, collection, id))
    }

    pub fn put_record(&self, collection: &str, id: &str, body: &Value) -> Result<()> {
        let text = serde_json::to_string(body)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO records (collection, id, body, updated_at)
                 VALUES (?1, ?2, ?3, datetime('now'))
                 ON CONFLICT (collection, id)
                 DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
                (collection, id, &text),
            )?;
            Ok(())
        })
    }

    /// Read-modify-write one record inside a single transaction.
    ///
    /// Returns `None` if the record does not exist, otherwise the closure's
    /// output together with the record as written.
    pub fn modify_record<F, T>(&self, collection: &str, id: &str, f: F) -> Result<Option<(T, Value)>>
    where
        F: FnOnce(&mut Value) -> Result<T>,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

            let Some(mut body) = query_record(&tx, collection, id)? else {
                return Ok(None);
            };
            let out = f(&mut body)?;

            tx.execute(
                "UPDATE records SET body = ?3, updated_at = datetime('now')
                 WHERE collection = ?1 AND id = ?2",
                (collection, id, serde_json::to_string(&body)?),
            )?;
            tx.commit()?;

            Ok(Some((out, body)))
        })
    }

    /// Changes whenever another connection commits to the database file.
    pub fn data_version(&self) -> Result<i64> {
        self.with_conn(|conn| {
            let version = conn.query_row("PRAGMA data_version", [], |row| row.get(0))?;
            Ok(version)
        })
    }
}

fn query_record(conn: &Connection, collection: &str, id: &str) -> Result<Option<Value>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM records WHERE collection = ?1 AND id = ?2",
            [collection, id],
            |row| row.get(0),
        )
        .optional()?;

    match body {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}
