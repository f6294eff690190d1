//! Medication schedule store operations.

use chrono::NaiveDate;
use rusqlite::{params, Row};

use super::{DbError, ReminderDb};
use crate::types::MedicationSchedule;

impl ReminderDb {
    pub fn insert_medication(&self, medication: &MedicationSchedule) -> Result<(), DbError> {
        medication.validate().map_err(DbError::Validation)?;
        let times = serde_json::to_string(&medication.times)
            .map_err(|e| DbError::Validation(format!("Failed to encode dose times: {e}")))?;

        self.conn().execute(
            "INSERT INTO medications (id, patient_id, name, dosage, instructions, times,
                                      start_date, end_date, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                medication.id,
                medication.patient_id,
                medication.name,
                medication.dosage,
                medication.instructions,
                times,
                medication.start_date,
                medication.end_date,
                medication.active
            ],
        )?;
        Ok(())
    }

    /// Update name, dosage, instructions, times, date bounds, and the
    /// active flag. Returns false when the medication does not exist.
    pub fn update_medication(&self, medication: &MedicationSchedule) -> Result<bool, DbError> {
        medication.validate().map_err(DbError::Validation)?;
        let times = serde_json::to_string(&medication.times)
            .map_err(|e| DbError::Validation(format!("Failed to encode dose times: {e}")))?;

        let updated = self.conn().execute(
            "UPDATE medications
             SET name = ?2, dosage = ?3, instructions = ?4, times = ?5,
                 start_date = ?6, end_date = ?7, active = ?8
             WHERE id = ?1",
            params![
                medication.id,
                medication.name,
                medication.dosage,
                medication.instructions,
                times,
                medication.start_date,
                medication.end_date,
                medication.active
            ],
        )?;
        Ok(updated > 0)
    }

    /// Deactivate or reactivate a schedule. Schedules are deactivated
    /// rather than deleted while reminder logs reference them.
    pub fn set_medication_active(&self, id: &str, active: bool) -> Result<bool, DbError> {
        let updated = self.conn().execute(
            "UPDATE medications SET active = ?2 WHERE id = ?1",
            params![id, active],
        )?;
        Ok(updated > 0)
    }

    pub fn get_medication(&self, id: &str) -> Result<Option<MedicationSchedule>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEDICATION_COLUMNS} FROM medications WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id], map_medication_row)?;
        match rows.next().transpose()? {
            Some(raw) => Ok(decode_times(raw)),
            None => Ok(None),
        }
    }

    pub fn list_medications_for_patient(
        &self,
        patient_id: &str,
    ) -> Result<Vec<MedicationSchedule>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEDICATION_COLUMNS} FROM medications
             WHERE patient_id = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![patient_id], map_medication_row)?;
        collect_schedules(rows)
    }

    /// Schedules eligible for reminding on `day`: active, started, and not
    /// past their end date. Dose-time matching happens in the scanner.
    pub fn due_candidates(&self, day: NaiveDate) -> Result<Vec<MedicationSchedule>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEDICATION_COLUMNS} FROM medications
             WHERE active = 1
               AND start_date <= ?1
               AND (end_date IS NULL OR end_date >= ?1)"
        ))?;
        let rows = stmt.query_map(params![day], map_medication_row)?;
        collect_schedules(rows)
    }
}

const MEDICATION_COLUMNS: &str =
    "id, patient_id, name, dosage, instructions, times, start_date, end_date, active";

/// Row with the times column still JSON-encoded.
struct RawMedication {
    schedule: MedicationSchedule,
    times_json: String,
}

fn map_medication_row(row: &Row) -> rusqlite::Result<RawMedication> {
    Ok(RawMedication {
        schedule: MedicationSchedule {
            id: row.get(0)?,
            patient_id: row.get(1)?,
            name: row.get(2)?,
            dosage: row.get(3)?,
            instructions: row.get(4)?,
            times: Vec::new(),
            start_date: row.get(6)?,
            end_date: row.get(7)?,
            active: row.get(8)?,
        },
        times_json: row.get(5)?,
    })
}

/// Decode the JSON times column. A malformed row is logged and dropped so
/// one corrupt schedule can't break a scan over the rest.
fn decode_times(raw: RawMedication) -> Option<MedicationSchedule> {
    match serde_json::from_str(&raw.times_json) {
        Ok(times) => {
            let mut schedule = raw.schedule;
            schedule.times = times;
            Some(schedule)
        }
        Err(e) => {
            log::error!(
                "Skipping medication {} with malformed dose times: {}",
                raw.schedule.id,
                e
            );
            None
        }
    }
}

fn collect_schedules(
    rows: impl Iterator<Item = rusqlite::Result<RawMedication>>,
) -> Result<Vec<MedicationSchedule>, DbError> {
    let mut schedules = Vec::new();
    for row in rows {
        if let Some(schedule) = decode_times(row?) {
            schedules.push(schedule);
        }
    }
    Ok(schedules)
}
