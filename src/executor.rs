//! SQLite execution port
//!
//! Read-only execution of guardrail-approved SQL. The connection is opened
//! with `SQLITE_OPEN_READ_ONLY` and additionally pinned with
//! `PRAGMA query_only`, so even a statement that slipped past validation
//! cannot write. Also serves as a schema source by dumping `sqlite_master`
//! DDL for the catalog builder.

use crate::error::Result;
use crate::ports::{ExecutionError, ExecutionPort, Row};
use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

pub struct SqliteExecutor {
    conn: Mutex<Connection>,
}

impl SqliteExecutor {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ExecutionError::Unavailable(format!("cannot open {}: {e}", path.display())))?;

        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| ExecutionError::Unavailable(e.to_string()))?;
        conn.pragma_update(None, "query_only", "ON")
            .map_err(|e| ExecutionError::Unavailable(e.to_string()))?;

        info!(db = %path.display(), "opened read-only sqlite database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// DDL text for all user tables, usable as a schema source.
    pub fn schema_ddl(&self) -> Result<String> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT sql FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL \
                 ORDER BY name",
            )
            .map_err(map_engine_error)?;
        let statements: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(map_engine_error)?
            .collect::<std::result::Result<_, _>>()
            .map_err(map_engine_error)?;
        Ok(statements.join(";\n"))
    }

    fn lock(&self) -> std::result::Result<std::sync::MutexGuard<'_, Connection>, ExecutionError> {
        self.conn
            .lock()
            .map_err(|_| ExecutionError::Unavailable("connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl ExecutionPort for SqliteExecutor {
    async fn execute(&self, sql: &str) -> std::result::Result<Vec<Row>, ExecutionError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(map_engine_error)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let mut rows = Vec::new();
        let mut raw = stmt.query([]).map_err(map_engine_error)?;
        while let Some(row) = raw.next().map_err(map_engine_error)? {
            let mut out = Row::new();
            for (idx, name) in columns.iter().enumerate() {
                out.insert(name.clone(), value_to_json(row.get_ref(idx).map_err(map_engine_error)?));
            }
            rows.push(out);
        }
        Ok(rows)
    }
}

fn value_to_json(value: rusqlite::types::ValueRef<'_>) -> serde_json::Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(format!("<{} byte blob>", b.len())),
    }
}

/// Engine errors that mean "the data source is gone" fail the investigation;
/// everything else is a per-query failure the loop can absorb.
fn map_engine_error(e: rusqlite::Error) -> ExecutionError {
    use rusqlite::ErrorCode;
    match &e {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::DiskFull
            | ErrorCode::SystemIoFailure
            | ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked => ExecutionError::Unavailable(e.to_string()),
            _ => ExecutionError::Query(e.to_string()),
        },
        _ => ExecutionError::Query(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> SqliteExecutor {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE orders (id INTEGER, customer_id INTEGER, amount REAL, created_at TEXT);
             INSERT INTO orders VALUES (1, 10, 25.5, '2026-01-03');
             INSERT INTO orders VALUES (2, 11, 40.0, '2026-01-04');",
        )
        .unwrap();
        SqliteExecutor {
            conn: Mutex::new(conn),
        }
    }

    #[tokio::test]
    async fn executes_select_into_rows() {
        let exec = fixture();
        let rows = exec
            .execute("SELECT id, amount FROM orders ORDER BY id")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], serde_json::json!(1));
        assert_eq!(rows[1]["amount"], serde_json::json!(40.0));
    }

    #[tokio::test]
    async fn engine_rejections_are_query_errors() {
        let exec = fixture();
        let err = exec.execute("SELECT nope FROM orders").await.unwrap_err();
        assert!(matches!(err, ExecutionError::Query(_)));
    }

    #[test]
    fn dumps_schema_ddl() {
        let exec = fixture();
        let ddl = exec.schema_ddl().unwrap();
        assert!(ddl.contains("CREATE TABLE orders"));
    }
}
