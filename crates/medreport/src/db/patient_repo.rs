//! Patient repository: CRUD operations for the `patients` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::{Database, DatabaseError};
use crate::records::{PatientRecord, ReportStatus};

/// A raw patient row from the database.
#[derive(Debug, Clone)]
pub struct PatientRow {
    pub patient_id: String,
    pub name: String,
    pub age: i64,
    pub email: String,
    pub medical_history: String,
    pub symptoms: String,
    pub created_at: String,
    pub report_status: String,
    pub last_error: Option<String>,
    pub last_sent_at: Option<String>,
    pub last_message_id: Option<String>,
}

impl PatientRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            patient_id: row.get("patient_id")?,
            name: row.get("name")?,
            age: row.get("age")?,
            email: row.get("email")?,
            medical_history: row.get("medical_history")?,
            symptoms: row.get("symptoms")?,
            created_at: row.get("created_at")?,
            report_status: row.get("report_status")?,
            last_error: row.get("last_error")?,
            last_sent_at: row.get("last_sent_at")?,
            last_message_id: row.get("last_message_id")?,
        })
    }

    /// Decodes timestamps and status into a domain record.
    pub fn into_record(self) -> Result<PatientRecord, DatabaseError> {
        let report_status =
            ReportStatus::parse(&self.report_status).ok_or(DatabaseError::CorruptValue {
                column: "report_status",
                value: self.report_status.clone(),
            })?;
        let age = u32::try_from(self.age).map_err(|_| DatabaseError::CorruptValue {
            column: "age",
            value: self.age.to_string(),
        })?;
        let last_sent_at = match self.last_sent_at {
            Some(ref raw) => Some(parse_timestamp("last_sent_at", raw)?),
            None => None,
        };

        Ok(PatientRecord {
            id: self.patient_id,
            name: self.name,
            age,
            email: self.email,
            medical_history: self.medical_history,
            symptoms: self.symptoms,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            report_status,
            last_error: self.last_error,
            last_sent_at,
            last_message_id: self.last_message_id,
        })
    }
}

fn parse_timestamp(column: &'static str, raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::CorruptValue {
            column,
            value: raw.to_string(),
        })
}

/// Per-status patient counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub total: u64,
    pub pending: u64,
    pub sent: u64,
    pub failed: u64,
}

/// Inserts a patient, or replaces the demographic and clinical fields of an
/// existing one. Delivery fields of an existing row are left untouched.
pub fn upsert(db: &Database, record: &PatientRecord) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO patients (patient_id, name, age, email, medical_history, symptoms,
             created_at, report_status, last_error, last_sent_at, last_message_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(patient_id) DO UPDATE SET
               name = excluded.name,
               age = excluded.age,
               email = excluded.email,
               medical_history = excluded.medical_history,
               symptoms = excluded.symptoms",
            params![
                record.id,
                record.name,
                record.age,
                record.email,
                record.medical_history,
                record.symptoms,
                record.created_at.to_rfc3339(),
                record.report_status.as_str(),
                record.last_error,
                record.last_sent_at.map(|t| t.to_rfc3339()),
                record.last_message_id,
            ],
        )?;
        Ok(())
    })
}

/// Finds a patient by id.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<PatientRecord>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM patients WHERE patient_id = ?1")?;
        let mut rows = stmt.query_map(params![id], PatientRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;
    row.map(PatientRow::into_record).transpose()
}

/// Lists patients ordered by creation time, optionally restricted to one status.
pub fn list(db: &Database, status: Option<ReportStatus>) -> Result<Vec<PatientRecord>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let rows = match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM patients WHERE report_status = ?1
                     ORDER BY created_at ASC, patient_id ASC",
                )?;
                let rows = stmt
                    .query_map(params![status.as_str()], PatientRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT * FROM patients ORDER BY created_at ASC, patient_id ASC")?;
                let rows = stmt
                    .query_map([], PatientRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    })?;
    rows.into_iter().map(PatientRow::into_record).collect()
}

/// Case-insensitive search over patient id and name.
pub fn search(db: &Database, term: &str) -> Result<Vec<PatientRecord>, DatabaseError> {
    let pattern = format!("%{}%", escape_like(term.trim()));
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM patients
             WHERE patient_id LIKE ?1 ESCAPE '\\' OR name LIKE ?1 ESCAPE '\\'
             ORDER BY name ASC, patient_id ASC",
        )?;
        let rows = stmt
            .query_map(params![pattern], PatientRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(PatientRow::into_record).collect()
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Deletes a patient. Returns whether a row was removed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute("DELETE FROM patients WHERE patient_id = ?1", params![id])?;
        Ok(affected > 0)
    })
}

/// Marks a patient's report as sent. Returns whether the patient exists.
///
/// Takes a connection so it can share a transaction with the log entry.
pub fn mark_sent(
    conn: &Connection,
    id: &str,
    sent_at: DateTime<Utc>,
    message_id: &str,
) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "UPDATE patients SET report_status = 'sent', last_sent_at = ?2,
         last_message_id = ?3, last_error = NULL
         WHERE patient_id = ?1",
        params![id, sent_at.to_rfc3339(), message_id],
    )?;
    Ok(affected > 0)
}

/// Marks a patient's report as failed with a reason. Returns whether the patient exists.
pub fn mark_failed(conn: &Connection, id: &str, reason: &str) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "UPDATE patients SET report_status = 'failed', last_error = ?2
         WHERE patient_id = ?1",
        params![id, reason],
    )?;
    Ok(affected > 0)
}

/// Counts patients grouped by report status.
pub fn count_by_status(db: &Database) -> Result<StatusCounts, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT report_status, COUNT(*) FROM patients GROUP BY report_status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row?;
            let count = count.max(0) as u64;
            counts.total += count;
            match ReportStatus::parse(&status) {
                Some(ReportStatus::Pending) => counts.pending += count,
                Some(ReportStatus::Sent) => counts.sent += count,
                Some(ReportStatus::Failed) => counts.failed += count,
                None => log::warn!("Unknown report_status '{}' in patients table", status),
            }
        }
        Ok(counts)
    })
}
