//! SQLite store
//!
//! `rusqlite` implementation of [`GranuleStore`]. The schema is created on
//! open; per-row failures are logged here and surface to callers only as
//! `false` returns.

use super::{CollectionRow, GranuleRow, GranuleStore, PolyPointRow, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{error, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS collections (
    coll_id         TEXT PRIMARY KEY,
    short_name      TEXT NOT NULL,
    archive_center  TEXT NOT NULL,
    description     TEXT NOT NULL,
    begin_date_time TEXT,
    end_date_time   TEXT,
    doi             TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS granules (
    gran_id             TEXT PRIMARY KEY,
    coll_id             TEXT NOT NULL REFERENCES collections(coll_id),
    unit_representation TEXT NOT NULL,
    size_mb             REAL NOT NULL,
    begin_date_time     TEXT,
    end_date_time       TEXT,
    has_polygon         INTEGER NOT NULL,
    west                REAL NOT NULL,
    south               REAL NOT NULL,
    east                REAL NOT NULL,
    north               REAL NOT NULL,
    local_file_name     TEXT
);

CREATE TABLE IF NOT EXISTS polypoints (
    point_id  INTEGER PRIMARY KEY AUTOINCREMENT,
    gran_id   TEXT NOT NULL REFERENCES granules(gran_id),
    latitude  REAL NOT NULL,
    longitude REAL NOT NULL
);
";

/// SQLite-backed [`GranuleStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the store at the given path and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "local store opened");
        Ok(SqliteStore { conn })
    }

    /// In-memory store, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore { conn })
    }

    fn exists(&self, sql: &str, id: &str) -> bool {
        let found: Result<Option<i64>, _> = self
            .conn
            .query_row(sql, params![id], |row| row.get(0))
            .optional();
        match found {
            Ok(value) => value.is_some(),
            Err(e) => {
                // An unanswerable existence query is treated as "not present";
                // the worst outcome is a redundant fetch or a captured insert.
                error!(error = %e, "existence query failed");
                false
            }
        }
    }
}

impl GranuleStore for SqliteStore {
    fn granule_exists(&self, gran_id: &str) -> bool {
        self.exists("SELECT 1 FROM granules WHERE gran_id = ?1", gran_id)
    }

    fn collection_exists(&self, coll_id: &str) -> bool {
        self.exists("SELECT 1 FROM collections WHERE coll_id = ?1", coll_id)
    }

    fn insert_collection(&self, row: &CollectionRow) -> bool {
        let result = self.conn.execute(
            "INSERT INTO collections
             (coll_id, short_name, archive_center, description,
              begin_date_time, end_date_time, doi)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.coll_id,
                row.short_name,
                row.archive_center,
                row.description,
                row.begin_date_time,
                row.end_date_time,
                row.doi,
            ],
        );
        if let Err(e) = &result {
            error!(collection = %row.coll_id, error = %e, "collection insert failed");
        }
        result.is_ok()
    }

    fn insert_granule(&self, row: &GranuleRow) -> bool {
        let result = self.conn.execute(
            "INSERT INTO granules
             (gran_id, coll_id, unit_representation, size_mb,
              begin_date_time, end_date_time, has_polygon,
              west, south, east, north, local_file_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                row.gran_id,
                row.coll_id,
                row.unit_representation,
                row.size_mb,
                row.begin_date_time,
                row.end_date_time,
                row.has_polygon,
                row.west,
                row.south,
                row.east,
                row.north,
                row.local_file_name,
            ],
        );
        if let Err(e) = &result {
            error!(granule = %row.gran_id, error = %e, "granule insert failed");
        }
        result.is_ok()
    }

    fn insert_polypoint(&self, row: &PolyPointRow) -> bool {
        let result = self.conn.execute(
            "INSERT INTO polypoints (gran_id, latitude, longitude)
             VALUES (?1, ?2, ?3)",
            params![row.gran_id, row.latitude, row.longitude],
        );
        if let Err(e) = &result {
            error!(granule = %row.gran_id, error = %e, "polygon point insert failed");
        }
        result.is_ok()
    }
}
