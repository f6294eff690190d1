//! Reminder record store operations.
//!
//! The escalation-critical writes are conditional updates: each one
//! re-checks status and confirmation in its WHERE clause so that a
//! confirmation racing a sweep wins, and so that re-running a sweep can
//! never double-send an SMS or double-fire a caregiver alert.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Row};

use super::{parse_column, DbError, ReminderDb};
use crate::types::{
    adherence_rate, AdherenceStats, ConfirmationMethod, DailyAdherence, ReminderRecord,
    ReminderStatus, TodaySummary,
};

const REMINDER_COLUMNS: &str = "id, medication_id, patient_id, scheduled_time, scheduled_day, \
     status, voice_sent, voice_attempted_at, sms_sent, sms_attempted_at, \
     confirmation_method, confirmed_at, caregiver_alert_sent, caregiver_alerted_at, created_at";

impl ReminderDb {
    /// Insert a new record unless one already exists for the same
    /// (medication, calendar day). Returns whether a row was inserted; the
    /// UNIQUE index makes this the dedupe backstop under same-minute
    /// double scans.
    pub fn insert_reminder(&self, record: &ReminderRecord) -> Result<bool, DbError> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO reminders
                 (id, medication_id, patient_id, scheduled_time, scheduled_day, status,
                  voice_sent, sms_sent, confirmation_method, caregiver_alert_sent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id,
                record.medication_id,
                record.patient_id,
                record.scheduled_time,
                record.scheduled_day,
                record.status.as_str(),
                record.voice_sent,
                record.sms_sent,
                record.confirmation_method.as_str(),
                record.caregiver_alert_sent,
                record.created_at
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_reminder(&self, id: &str) -> Result<Option<ReminderRecord>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id], map_reminder_row)?;
        Ok(rows.next().transpose()?)
    }

    /// The record created for a medication on a given calendar day, if any.
    pub fn reminder_for_day(
        &self,
        medication_id: &str,
        day: NaiveDate,
    ) -> Result<Option<ReminderRecord>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE medication_id = ?1 AND scheduled_day = ?2"
        ))?;
        let mut rows = stmt.query_map(params![medication_id, day], map_reminder_row)?;
        Ok(rows.next().transpose()?)
    }

    /// Stamp the voice attempt. The timestamp marks that an attempt was
    /// made; `success` records the gateway outcome.
    pub fn record_voice_attempt(
        &self,
        id: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn().execute(
            "UPDATE reminders SET voice_sent = ?2, voice_attempted_at = ?3 WHERE id = ?1",
            params![id, success, at],
        )?;
        Ok(())
    }

    /// Unconfirmed records whose voice attempt is older than `cutoff` and
    /// that have no SMS attempt yet. Selection keys on the attempt
    /// timestamp, not the success flag: a failed voice call still
    /// escalates to SMS once its grace period passes.
    pub fn voice_grace_expired(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ReminderRecord>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE status = 'sent'
               AND confirmation_method = 'none'
               AND voice_attempted_at IS NOT NULL
               AND voice_attempted_at <= ?1
               AND sms_attempted_at IS NULL
             ORDER BY voice_attempted_at"
        ))?;
        let rows = stmt.query_map(params![cutoff], map_reminder_row)?;
        collect_records(rows)
    }

    /// Atomically claim the SMS escalation for a record. Returns false when
    /// the record was confirmed, already claimed, or otherwise moved on in
    /// the meantime; the caller must send the SMS only on true.
    pub fn claim_sms_attempt(&self, id: &str, at: DateTime<Utc>) -> Result<bool, DbError> {
        let claimed = self.conn().execute(
            "UPDATE reminders SET sms_attempted_at = ?2
             WHERE id = ?1
               AND status = 'sent'
               AND confirmation_method = 'none'
               AND sms_attempted_at IS NULL",
            params![id, at],
        )?;
        Ok(claimed > 0)
    }

    /// Record the gateway outcome of a claimed SMS attempt.
    pub fn record_sms_outcome(&self, id: &str, success: bool) -> Result<(), DbError> {
        self.conn().execute(
            "UPDATE reminders SET sms_sent = ?2 WHERE id = ?1",
            params![id, success],
        )?;
        Ok(())
    }

    /// Unconfirmed records whose SMS attempt is older than `cutoff` and
    /// that have not alerted the caregiver yet. As with the voice sweep,
    /// the attempt timestamp drives progression regardless of whether the
    /// SMS was actually delivered.
    pub fn sms_grace_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<ReminderRecord>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE status = 'sent'
               AND confirmation_method = 'none'
               AND sms_attempted_at IS NOT NULL
               AND sms_attempted_at <= ?1
               AND caregiver_alert_sent = 0
             ORDER BY sms_attempted_at"
        ))?;
        let rows = stmt.query_map(params![cutoff], map_reminder_row)?;
        collect_records(rows)
    }

    /// Atomically transition a record to missed and mark the caregiver
    /// alert sent. Returns false when a racing confirmation (or an earlier
    /// sweep) got there first; the caller must alert only on true, which
    /// bounds the alert to exactly one per record.
    pub fn claim_missed(&self, id: &str, at: DateTime<Utc>) -> Result<bool, DbError> {
        let claimed = self.conn().execute(
            "UPDATE reminders
             SET status = 'missed', caregiver_alert_sent = 1, caregiver_alerted_at = ?2
             WHERE id = ?1
               AND status = 'sent'
               AND confirmation_method = 'none'
               AND caregiver_alert_sent = 0",
            params![id, at],
        )?;
        Ok(claimed > 0)
    }

    /// Unconditionally mark a record taken. Overwrites any prior status,
    /// including `missed`; confirmation is authoritative. Returns the
    /// updated record, or None when the id is unknown.
    pub fn confirm_reminder(
        &self,
        id: &str,
        method: ConfirmationMethod,
        at: DateTime<Utc>,
    ) -> Result<Option<ReminderRecord>, DbError> {
        let updated = self.conn().execute(
            "UPDATE reminders
             SET status = 'taken', confirmation_method = ?2, confirmed_at = ?3
             WHERE id = ?1",
            params![id, method.as_str(), at],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        self.get_reminder(id)
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    /// Status counts and adherence rate for one patient since `since`.
    pub fn adherence_stats(
        &self,
        patient_id: &str,
        since: DateTime<Utc>,
    ) -> Result<AdherenceStats, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM reminders
             WHERE patient_id = ?1 AND scheduled_time >= ?2
             GROUP BY status",
        )?;
        let rows = stmt.query_map(params![patient_id, since], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;

        let mut stats = AdherenceStats::default();
        for row in rows {
            let (status, count) = row?;
            match status.parse::<ReminderStatus>() {
                Ok(ReminderStatus::Taken) => stats.taken = count,
                Ok(ReminderStatus::Missed) => stats.missed = count,
                Ok(ReminderStatus::Sent) => stats.pending = count,
                Err(e) => {
                    log::error!("Skipping unknown reminder status in stats: {e}");
                    continue;
                }
            }
            stats.total += count;
        }
        stats.adherence_rate = adherence_rate(stats.taken, stats.total);
        Ok(stats)
    }

    /// All of one day's reminders across a caregiver's patients, newest
    /// first, with a status rollup.
    pub fn today_for_caregiver(
        &self,
        caregiver_id: &str,
        day: NaiveDate,
    ) -> Result<(Vec<ReminderRecord>, TodaySummary), DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE scheduled_day = ?2
               AND patient_id IN (SELECT id FROM patients WHERE caregiver_id = ?1)
             ORDER BY scheduled_time DESC"
        ))?;
        let rows = stmt.query_map(params![caregiver_id, day], map_reminder_row)?;
        let records = collect_records(rows)?;

        let mut summary = TodaySummary {
            total: records.len(),
            ..TodaySummary::default()
        };
        for record in &records {
            match record.status {
                ReminderStatus::Taken => summary.taken += 1,
                ReminderStatus::Missed => summary.missed += 1,
                ReminderStatus::Sent => summary.pending += 1,
            }
        }
        Ok((records, summary))
    }

    /// Most recent reminders across a caregiver's patients. `limit` is
    /// capped at 100 rows.
    pub fn recent_for_caregiver(
        &self,
        caregiver_id: &str,
        limit: usize,
    ) -> Result<Vec<ReminderRecord>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE patient_id IN (SELECT id FROM patients WHERE caregiver_id = ?1)
             ORDER BY scheduled_time DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            params![caregiver_id, limit.min(100) as i64],
            map_reminder_row,
        )?;
        collect_records(rows)
    }

    /// Full reminder history for one patient, newest first.
    pub fn history_for_patient(&self, patient_id: &str) -> Result<Vec<ReminderRecord>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE patient_id = ?1
             ORDER BY scheduled_time DESC"
        ))?;
        let rows = stmt.query_map(params![patient_id], map_reminder_row)?;
        collect_records(rows)
    }

    /// Per-day status counts for one patient from `since_day` on.
    pub fn daily_adherence(
        &self,
        patient_id: &str,
        since_day: NaiveDate,
    ) -> Result<Vec<DailyAdherence>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT scheduled_day, status, COUNT(*) FROM reminders
             WHERE patient_id = ?1 AND scheduled_day >= ?2
             GROUP BY scheduled_day, status
             ORDER BY scheduled_day",
        )?;
        let rows = stmt.query_map(params![patient_id, since_day], |row| {
            Ok((
                row.get::<_, NaiveDate>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)? as usize,
            ))
        })?;

        let mut trend: Vec<DailyAdherence> = Vec::new();
        for row in rows {
            let (day, status, count) = row?;
            if trend.last().map(|t| t.day) != Some(day) {
                trend.push(DailyAdherence {
                    day,
                    taken: 0,
                    missed: 0,
                    pending: 0,
                });
            }
            if let Some(entry) = trend.last_mut() {
                match status.parse::<ReminderStatus>() {
                    Ok(ReminderStatus::Taken) => entry.taken = count,
                    Ok(ReminderStatus::Missed) => entry.missed = count,
                    Ok(ReminderStatus::Sent) => entry.pending = count,
                    Err(e) => log::error!("Skipping unknown reminder status in trend: {e}"),
                }
            }
        }
        Ok(trend)
    }
}

fn map_reminder_row(row: &Row) -> rusqlite::Result<ReminderRecord> {
    Ok(ReminderRecord {
        id: row.get(0)?,
        medication_id: row.get(1)?,
        patient_id: row.get(2)?,
        scheduled_time: row.get(3)?,
        scheduled_day: row.get(4)?,
        status: parse_column(5, row.get::<_, String>(5)?)?,
        voice_sent: row.get(6)?,
        voice_attempted_at: row.get(7)?,
        sms_sent: row.get(8)?,
        sms_attempted_at: row.get(9)?,
        confirmation_method: parse_column(10, row.get::<_, String>(10)?)?,
        confirmed_at: row.get(11)?,
        caregiver_alert_sent: row.get(12)?,
        caregiver_alerted_at: row.get(13)?,
        created_at: row.get(14)?,
    })
}

fn collect_records(
    rows: impl Iterator<Item = rusqlite::Result<ReminderRecord>>,
) -> Result<Vec<ReminderRecord>, DbError> {
    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::super::tests::test_db;
    use crate::types::{Caregiver, Language, MedicationSchedule, Patient};
    use chrono::{Duration, TimeZone};

    use super::*;

    fn seed(db: &ReminderDb) {
        db.insert_caregiver(&Caregiver {
            id: "c1".to_string(),
            name: "Ravi".to_string(),
            phone_number: "9876543210".to_string(),
            email: "ravi@example.com".to_string(),
        })
        .unwrap();
        db.insert_patient(&Patient {
            id: "p1".to_string(),
            name: "Asha".to_string(),
            phone_number: "9812345678".to_string(),
            preferred_language: Language::En,
            caregiver_id: "c1".to_string(),
            age: None,
            address: None,
        })
        .unwrap();
        db.insert_medication(&MedicationSchedule {
            id: "m1".to_string(),
            patient_id: "p1".to_string(),
            name: "Aspirin".to_string(),
            dosage: "75mg".to_string(),
            instructions: None,
            times: vec!["08:00".parse().unwrap()],
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: None,
            active: true,
        })
        .unwrap();
    }

    fn record_at(medication_id: &str, time: DateTime<Utc>) -> ReminderRecord {
        ReminderRecord::new(medication_id, "p1", time, time.date_naive())
    }

    #[test]
    fn test_unique_per_medication_day() {
        let db = test_db();
        seed(&db);
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();

        assert!(db.insert_reminder(&record_at("m1", t)).unwrap());
        // Second record for the same medication and day is ignored
        assert!(!db.insert_reminder(&record_at("m1", t)).unwrap());
        // A different day inserts fine
        let next_day = t + Duration::days(1);
        assert!(db.insert_reminder(&record_at("m1", next_day)).unwrap());
    }

    #[test]
    fn test_voice_grace_selection() {
        let db = test_db();
        seed(&db);
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();
        let record = record_at("m1", t);
        db.insert_reminder(&record).unwrap();

        // No attempt yet: not selected
        assert!(db.voice_grace_expired(t + Duration::minutes(20)).unwrap().is_empty());

        db.record_voice_attempt(&record.id, true, t).unwrap();
        // Not past the cutoff
        assert!(db.voice_grace_expired(t - Duration::minutes(1)).unwrap().is_empty());
        // Past the cutoff
        let expired = db.voice_grace_expired(t + Duration::minutes(1)).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, record.id);

        // A failed voice attempt is still selected
        db.record_voice_attempt(&record.id, false, t).unwrap();
        assert_eq!(db.voice_grace_expired(t + Duration::minutes(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_claim_sms_attempt_once() {
        let db = test_db();
        seed(&db);
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();
        let record = record_at("m1", t);
        db.insert_reminder(&record).unwrap();
        db.record_voice_attempt(&record.id, true, t).unwrap();

        let later = t + Duration::minutes(16);
        assert!(db.claim_sms_attempt(&record.id, later).unwrap());
        // Already claimed
        assert!(!db.claim_sms_attempt(&record.id, later).unwrap());
        // Claimed records drop out of the voice sweep selection
        assert!(db.voice_grace_expired(t + Duration::minutes(30)).unwrap().is_empty());
    }

    #[test]
    fn test_claim_sms_refused_after_confirmation() {
        let db = test_db();
        seed(&db);
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();
        let record = record_at("m1", t);
        db.insert_reminder(&record).unwrap();
        db.record_voice_attempt(&record.id, true, t).unwrap();
        db.confirm_reminder(&record.id, ConfirmationMethod::Manual, t)
            .unwrap();

        assert!(!db.claim_sms_attempt(&record.id, t + Duration::minutes(16)).unwrap());
    }

    #[test]
    fn test_sms_grace_selection_ignores_delivery_outcome() {
        let db = test_db();
        seed(&db);
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();
        let record = record_at("m1", t);
        db.insert_reminder(&record).unwrap();
        db.record_voice_attempt(&record.id, true, t).unwrap();
        db.claim_sms_attempt(&record.id, t).unwrap();
        db.record_sms_outcome(&record.id, false).unwrap();

        // Failed SMS still progresses toward the caregiver alert
        let expired = db.sms_grace_expired(t + Duration::minutes(1)).unwrap();
        assert_eq!(expired.len(), 1);
        assert!(!expired[0].sms_sent);
    }

    #[test]
    fn test_claim_missed_once_and_confirmation_wins() {
        let db = test_db();
        seed(&db);
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();
        let record = record_at("m1", t);
        db.insert_reminder(&record).unwrap();
        db.record_voice_attempt(&record.id, true, t).unwrap();
        db.claim_sms_attempt(&record.id, t).unwrap();

        let later = t + Duration::minutes(11);
        assert!(db.claim_missed(&record.id, later).unwrap());
        assert!(!db.claim_missed(&record.id, later).unwrap());

        let stored = db.get_reminder(&record.id).unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Missed);
        assert!(stored.caregiver_alert_sent);

        // Confirmed records can never be claimed missed
        let record2 = record_at("m1", t + Duration::days(1));
        db.insert_reminder(&record2).unwrap();
        db.record_voice_attempt(&record2.id, true, t).unwrap();
        db.claim_sms_attempt(&record2.id, t).unwrap();
        db.confirm_reminder(&record2.id, ConfirmationMethod::Keypad, later)
            .unwrap();
        assert!(!db.claim_missed(&record2.id, later).unwrap());
    }

    #[test]
    fn test_confirm_overwrites_missed() {
        let db = test_db();
        seed(&db);
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();
        let record = record_at("m1", t);
        db.insert_reminder(&record).unwrap();
        db.claim_sms_attempt(&record.id, t).unwrap();
        db.claim_missed(&record.id, t).unwrap();

        let confirmed = db
            .confirm_reminder(&record.id, ConfirmationMethod::Manual, t)
            .unwrap()
            .unwrap();
        assert_eq!(confirmed.status, ReminderStatus::Taken);
        assert_eq!(confirmed.confirmation_method, ConfirmationMethod::Manual);
        assert_eq!(confirmed.confirmed_at, Some(t));

        assert!(db
            .confirm_reminder("missing", ConfirmationMethod::Manual, t)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_adherence_stats() {
        let db = test_db();
        seed(&db);
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();

        // Empty window
        let stats = db.adherence_stats("p1", t - Duration::days(7)).unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.adherence_rate, 0);

        // Three records on different days: taken, missed, pending
        for (i, outcome) in ["taken", "missed", "pending"].iter().enumerate() {
            let record = record_at("m1", t + Duration::days(i as i64));
            db.insert_reminder(&record).unwrap();
            match *outcome {
                "taken" => {
                    db.confirm_reminder(&record.id, ConfirmationMethod::Manual, t)
                        .unwrap();
                }
                "missed" => {
                    db.claim_sms_attempt(&record.id, t).unwrap();
                    db.claim_missed(&record.id, t).unwrap();
                }
                _ => {}
            }
        }

        let stats = db.adherence_stats("p1", t - Duration::days(7)).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.taken, 1);
        assert_eq!(stats.missed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.adherence_rate, 33);
    }

    #[test]
    fn test_today_and_history_queries() {
        let db = test_db();
        seed(&db);
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();
        let today = record_at("m1", t);
        db.insert_reminder(&today).unwrap();
        let yesterday = record_at("m1", t - Duration::days(1));
        db.insert_reminder(&yesterday).unwrap();

        let (records, summary) = db.today_for_caregiver("c1", t.date_naive()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(summary.total, 1);
        assert_eq!(summary.pending, 1);

        assert_eq!(db.recent_for_caregiver("c1", 100).unwrap().len(), 2);
        assert_eq!(db.recent_for_caregiver("c1", 1).unwrap().len(), 1);
        assert_eq!(db.history_for_patient("p1").unwrap().len(), 2);
        assert!(db.recent_for_caregiver("other", 100).unwrap().is_empty());
    }

    #[test]
    fn test_daily_adherence_trend() {
        let db = test_db();
        seed(&db);
        let t = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();

        let day1 = record_at("m1", t);
        db.insert_reminder(&day1).unwrap();
        db.confirm_reminder(&day1.id, ConfirmationMethod::Manual, t)
            .unwrap();

        let day2 = record_at("m1", t + Duration::days(1));
        db.insert_reminder(&day2).unwrap();

        let trend = db.daily_adherence("p1", t.date_naive()).unwrap();
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].taken, 1);
        assert_eq!(trend[1].pending, 1);
    }
}
