use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The directory holding the patient database could not be created.
    #[error("cannot create database directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// The file was written by a build with a newer schema.
    #[error("database schema v{found} is newer than supported v{supported}")]
    SchemaTooNew { found: u32, supported: u32 },

    /// A stored value could not be decoded (bad timestamp, unknown status).
    #[error("corrupt value in column '{column}': {value}")]
    CorruptValue { column: &'static str, value: String },

    #[error("database lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    /// Whether the error came from another connection holding the write lock
    /// past the busy timeout.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked
        )
    }
}
