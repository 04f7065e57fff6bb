//! Durable storage for sessions hosted by this device.
//!
//! One SQLite file per device (`<data_dir>/sessions.db`). Only sessions this
//! device hosts live here; sessions seen on peers are never persisted.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named collaborative context hosted by exactly one device.
///
/// `host_id` is fixed at creation. JSON field names match the wire format
/// peers exchange (`sessionId`, `name`, `hostId`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub name: String,
    pub host_id: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(String),
    #[error("session {0} is hosted by another device")]
    Forbidden(String),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Keyed store of locally-hosted sessions.
///
/// Holds only the database path; each operation opens its own connection,
/// so the store is freely shareable across request handlers.
#[derive(Debug, Clone)]
pub struct SessionStore {
    db_path: PathBuf,
}

impl SessionStore {
    /// Open (creating if needed) the session database under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("sessions.db");
        let conn = Connection::open(&db_path)?;
        create_schema(&conn)?;
        Ok(Self { db_path })
    }

    fn connect(&self) -> Result<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    /// Create a new session hosted by `host_id`.
    pub fn create(&self, name: &str, host_id: &str) -> Result<Session> {
        let session = Session {
            session_id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            host_id: host_id.to_string(),
        };

        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO sessions (session_id, name, host_id, created_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                session.session_id,
                session.name,
                session.host_id,
                now_ms(),
            ],
        )?;

        Ok(session)
    }

    /// All sessions hosted by this device, oldest first.
    pub fn list(&self) -> Result<Vec<Session>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, name, host_id
             FROM sessions
             ORDER BY created_at_ms, session_id",
        )?;

        let sessions = stmt
            .query_map([], |row| {
                Ok(Session {
                    session_id: row.get(0)?,
                    name: row.get(1)?,
                    host_id: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    /// Delete `session_id`, but only when `requesting_host_id` matches the
    /// session's host. The row is untouched on `Forbidden`.
    pub fn delete(&self, session_id: &str, requesting_host_id: &str) -> Result<()> {
        let conn = self.connect()?;

        let host_id: Option<String> = conn
            .query_row(
                "SELECT host_id FROM sessions WHERE session_id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .optional()?;

        match host_id {
            None => Err(StoreError::NotFound(session_id.to_string())),
            Some(host) if host != requesting_host_id => {
                Err(StoreError::Forbidden(session_id.to_string()))
            }
            Some(_) => {
                conn.execute("DELETE FROM sessions WHERE session_id = ?1", [session_id])?;
                Ok(())
            }
        }
    }
}

fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            session_id      TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            host_id         TEXT NOT NULL,
            created_at_ms   INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
