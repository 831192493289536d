//! Schema migrations.
//!
//! Applied versions are recorded in `_migrations`. Each pending migration runs
//! in its own transaction together with its bookkeeping row, so a failed
//! migration leaves the database at the previous version.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_patients_table",
        sql: include_str!("sql/001_create_patients.sql"),
    },
    Migration {
        version: 2,
        description: "create_delivery_log_table",
        sql: include_str!("sql/002_create_delivery_log.sql"),
    },
];

/// Highest schema version this build understands.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Returns the schema version recorded in the database.
pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?)
}

/// Brings the schema up to [`latest_version`].
///
/// Refuses to touch a database written by a newer build.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current = current_version(conn)?;
    let latest = latest_version();
    if current > latest {
        return Err(DatabaseError::SchemaTooNew {
            found: current,
            supported: latest,
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        log::info!(
            "Applying schema v{}: {}",
            migration.version,
            migration.description
        );

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}
