//! Caregiver and patient store operations.

use rusqlite::{params, Row};

use super::{parse_column, DbError, ReminderDb};
use crate::types::{validate_phone, Caregiver, Patient};

impl ReminderDb {
    // =========================================================================
    // Caregivers
    // =========================================================================

    pub fn insert_caregiver(&self, caregiver: &Caregiver) -> Result<(), DbError> {
        validate_phone(&caregiver.phone_number).map_err(DbError::Validation)?;
        self.conn().execute(
            "INSERT INTO caregivers (id, name, phone_number, email) VALUES (?1, ?2, ?3, ?4)",
            params![
                caregiver.id,
                caregiver.name,
                caregiver.phone_number,
                caregiver.email
            ],
        )?;
        Ok(())
    }

    pub fn get_caregiver(&self, id: &str) -> Result<Option<Caregiver>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, phone_number, email FROM caregivers WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], map_caregiver_row)?;
        Ok(rows.next().transpose()?)
    }

    // =========================================================================
    // Patients
    // =========================================================================

    pub fn insert_patient(&self, patient: &Patient) -> Result<(), DbError> {
        validate_phone(&patient.phone_number).map_err(DbError::Validation)?;
        self.conn().execute(
            "INSERT INTO patients (id, name, phone_number, preferred_language, caregiver_id, age, address)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                patient.id,
                patient.name,
                patient.phone_number,
                patient.preferred_language.as_str(),
                patient.caregiver_id,
                patient.age,
                patient.address
            ],
        )?;
        Ok(())
    }

    pub fn get_patient(&self, id: &str) -> Result<Option<Patient>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, phone_number, preferred_language, caregiver_id, age, address
             FROM patients WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], map_patient_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_patients_for_caregiver(&self, caregiver_id: &str) -> Result<Vec<Patient>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, phone_number, preferred_language, caregiver_id, age, address
             FROM patients WHERE caregiver_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![caregiver_id], map_patient_row)?;

        let mut patients = Vec::new();
        for row in rows {
            patients.push(row?);
        }
        Ok(patients)
    }

    /// Delete a patient with their medication schedules and reminder logs
    /// in one transaction. Returns false when the patient does not exist.
    ///
    /// The escalation core never deletes records; this is the management
    /// boundary's cascade.
    pub fn delete_patient(&self, id: &str) -> Result<bool, DbError> {
        self.with_transaction(|conn| {
            conn.execute("DELETE FROM reminders WHERE patient_id = ?1", params![id])?;
            conn.execute("DELETE FROM medications WHERE patient_id = ?1", params![id])?;
            let deleted = conn.execute("DELETE FROM patients WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
    }
}

fn map_caregiver_row(row: &Row) -> rusqlite::Result<Caregiver> {
    Ok(Caregiver {
        id: row.get(0)?,
        name: row.get(1)?,
        phone_number: row.get(2)?,
        email: row.get(3)?,
    })
}

fn map_patient_row(row: &Row) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        name: row.get(1)?,
        phone_number: row.get(2)?,
        preferred_language: parse_column(3, row.get::<_, String>(3)?)?,
        caregiver_id: row.get(4)?,
        age: row.get(5)?,
        address: row.get(6)?,
    })
}
