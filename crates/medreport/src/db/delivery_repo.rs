//! Delivery log repository: one row per terminal item outcome of a batch run.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use super::{Database, DatabaseError};

/// A delivery log entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLogEntry {
    pub run_id: String,
    pub patient_id: String,
    /// `sent` or `failed`.
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Message id for sent reports, error reason for failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Appends an entry to the log. The patient row must exist.
pub fn insert(conn: &Connection, entry: &DeliveryLogEntry) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO delivery_log (run_id, patient_id, outcome, stage, detail, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.run_id,
            entry.patient_id,
            entry.outcome,
            entry.stage,
            entry.detail,
            entry.recorded_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Returns a patient's log entries, oldest first.
pub fn history(db: &Database, patient_id: &str) -> Result<Vec<DeliveryLogEntry>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT run_id, patient_id, outcome, stage, detail, recorded_at
             FROM delivery_log WHERE patient_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![patient_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    rows.into_iter()
        .map(|(run_id, patient_id, outcome, stage, detail, recorded_at)| {
            let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| DatabaseError::CorruptValue {
                    column: "recorded_at",
                    value: recorded_at.clone(),
                })?;
            Ok(DeliveryLogEntry {
                run_id,
                patient_id,
                outcome,
                stage,
                detail,
                recorded_at,
            })
        })
        .collect()
}
