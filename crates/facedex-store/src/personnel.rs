//! SQLite-backed personnel lookup.
//!
//! Reads the `personnel_info` table maintained by the personnel
//! administration side; this adapter only ever resolves a face
//! identifier to its record.

use std::path::Path;

use chrono::{DateTime, Utc};
use facedex_core::store::{PersonnelLookup, StoreError};
use facedex_core::types::PersonInfo;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};

/// Read-only personnel record resolver over a SQLite database.
pub struct SqlitePersonnel {
    conn: Mutex<Connection>,
}

impl SqlitePersonnel {
    /// Open the personnel database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        tracing::info!(path = %db_path.display(), "personnel database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl PersonnelLookup for SqlitePersonnel {
    fn lookup(&self, face_id: &str) -> Result<Option<PersonInfo>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT name, id_number, phone, address, gender, category, status, photo_path,
                        created_at, updated_at
                 FROM personnel_info
                 WHERE face_id = ?1",
            )
            .map_err(db_err)?;

        stmt.query_row([face_id], |row| {
            Ok(PersonInfo {
                name: row.get(0)?,
                id_number: row.get(1)?,
                phone: row.get(2)?,
                address: row.get(3)?,
                gender: row.get(4)?,
                category: row.get(5)?,
                status: row.get(6)?,
                photo_path: row.get(7)?,
                created_at: row.get::<_, Option<DateTime<Utc>>>(8)?,
                updated_at: row.get::<_, Option<DateTime<Utc>>>(9)?,
            })
        })
        .optional()
        .map_err(db_err)
    }
}

fn db_err(err: rusqlite::Error) -> StoreError {
    StoreError::Database(err.to_string())
}
