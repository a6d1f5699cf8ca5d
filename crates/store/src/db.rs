use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use duckdb::Connection;
use serde::Serialize;
use tracefin_core::error::{Result, TracefinError};

use crate::schema::SCHEMA_SQL;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub db_path: String,
    pub db_size_bytes: u64,
    pub spans_count: usize,
    pub traces_count: usize,
    pub oldest_start_us: Option<i64>,
    pub newest_start_us: Option<i64>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| TracefinError::Io(format!("failed to create db dir: {e}")))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| TracefinError::Store(format!("failed to open duckdb: {e}")))?;
        conn.execute_batch("PRAGMA threads=4;")
            .map_err(|e| TracefinError::Store(format!("failed to set pragmas: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| TracefinError::Store(format!("failed to initialize schema: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.display().to_string(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TracefinError::Store(format!("failed to open in-memory db: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| TracefinError::Store(format!("failed to initialize schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: ":memory:".to_string(),
        })
    }

    pub(crate) fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }

    pub(crate) fn db_path(&self) -> &str {
        &self.db_path
    }

    pub fn status(&self) -> Result<StatusSnapshot> {
        let conn = self.conn();

        let spans_count = scalar_usize(&conn, "SELECT COUNT(*) FROM spans")?;
        let traces_count = scalar_usize(&conn, "SELECT COUNT(DISTINCT trace_id) FROM spans")?;
        let oldest_start_us = scalar_i64(&conn, "SELECT MIN(start_us) FROM spans")?;
        let newest_start_us = scalar_i64(&conn, "SELECT MAX(start_us) FROM spans")?;

        let db_size_bytes = if self.db_path == ":memory:" {
            0
        } else {
            fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StatusSnapshot {
            db_path: self.db_path.clone(),
            db_size_bytes,
            spans_count,
            traces_count,
            oldest_start_us,
            newest_start_us,
        })
    }
}

fn scalar_usize(conn: &Connection, sql: &str) -> Result<usize> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|v| v as usize)
        .map_err(|e| TracefinError::Store(format!("query failed: {e}")))
}

fn scalar_i64(conn: &Connection, sql: &str) -> Result<Option<i64>> {
    conn.query_row(sql, [], |row| row.get::<_, Option<i64>>(0))
        .map_err(|e| TracefinError::Store(format!("query failed: {e}")))
}
