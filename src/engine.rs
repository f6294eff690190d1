//! Escalation engine: the per-reminder state machine.
//!
//! Each reminder moves through a bounded sequence of contact tiers:
//!
//! ```text
//! created --(voice call attempted)--> voice attempted
//! voice attempted --(voice grace elapsed, unconfirmed)--> sms attempted
//! sms attempted --(sms grace elapsed, unconfirmed)--> missed + caregiver alert
//! any stage --(confirmation)--> taken
//! ```
//!
//! Attempt timestamps drive the tier transitions; the sent flags only
//! record whether the gateway accepted the dispatch. Every transition is an
//! atomic conditional update in the store, so a confirmation racing a sweep
//! always wins and re-running a sweep never re-sends.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::db::ReminderDb;
use crate::error::{ConfirmError, EngineError};
use crate::gateway::{DispatchOutcome, NotificationGateway};
use crate::notification::CaregiverAlerter;
use crate::types::{ConfirmationMethod, MedicationSchedule, ReminderRecord};

/// Tunables the engine reads from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub voice_grace: chrono::Duration,
    pub sms_grace: chrono::Duration,
    pub call_timeout: Duration,
    /// Timezone used to derive the calendar-day dedupe key.
    pub tz: Tz,
}

impl EngineSettings {
    pub fn from_config(config: &crate::config::Config) -> Result<Self, String> {
        Ok(Self {
            voice_grace: chrono::Duration::minutes(config.voice_grace_minutes as i64),
            sms_grace: chrono::Duration::minutes(config.sms_grace_minutes as i64),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            tz: config.tz()?,
        })
    }
}

pub struct EscalationEngine {
    db: Arc<ReminderDb>,
    gateway: Arc<dyn NotificationGateway>,
    alerter: Arc<dyn CaregiverAlerter>,
    settings: EngineSettings,
}

impl EscalationEngine {
    pub fn new(
        db: Arc<ReminderDb>,
        gateway: Arc<dyn NotificationGateway>,
        alerter: Arc<dyn CaregiverAlerter>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            db,
            gateway,
            alerter,
            settings,
        }
    }

    /// Create today's reminder for a due medication and place the initial
    /// voice call.
    ///
    /// The record exists whether or not the call goes through: a gateway
    /// failure only leaves `voice_sent` false, and the dose is recovered
    /// via the SMS tier rather than a second call. When a record for
    /// (medication, today) already exists, it is returned untouched and no
    /// call is placed.
    pub async fn send_reminder(
        &self,
        medication: &MedicationSchedule,
        now: DateTime<Utc>,
    ) -> Result<ReminderRecord, EngineError> {
        let patient = self
            .db
            .get_patient(&medication.patient_id)?
            .ok_or_else(|| EngineError::PatientNotFound(medication.patient_id.clone()))?;

        let day = now.with_timezone(&self.settings.tz).date_naive();
        let mut record = ReminderRecord::new(&medication.id, &patient.id, now, day);

        if !self.db.insert_reminder(&record)? {
            log::debug!(
                "Reminder for medication {} already exists on {}, skipping",
                medication.id,
                day
            );
            return self
                .db
                .reminder_for_day(&medication.id, day)?
                .ok_or_else(|| EngineError::MedicationNotFound(medication.id.clone()));
        }

        let outcome = self
            .dispatch(self.gateway.place_voice_call(
                &patient.phone_number,
                patient.preferred_language,
                &medication.name,
            ))
            .await;

        self.db.record_voice_attempt(&record.id, outcome.success, now)?;
        record.voice_sent = outcome.success;
        record.voice_attempted_at = Some(now);

        if outcome.success {
            log::info!(
                "Voice call placed for {} ({}), reminder {}",
                patient.name,
                medication.name,
                record.id
            );
        } else {
            log::warn!(
                "Voice call failed for {} ({}), reminder {} will escalate via SMS",
                patient.name,
                medication.name,
                record.id
            );
        }

        Ok(record)
    }

    /// Escalate unconfirmed reminders whose voice grace period has
    /// elapsed: send the SMS tier. Returns how many records were escalated.
    ///
    /// One record's failure never aborts the rest of the batch.
    pub async fn sweep_voice_grace(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let cutoff = now - self.settings.voice_grace;
        let expired = self.db.voice_grace_expired(cutoff)?;

        let mut escalated = 0;
        for record in expired {
            match self.escalate_to_sms(&record, now).await {
                Ok(true) => escalated += 1,
                Ok(false) => {}
                Err(e) => {
                    log::error!("SMS escalation failed for reminder {}: {}", record.id, e);
                }
            }
        }
        Ok(escalated)
    }

    async fn escalate_to_sms(
        &self,
        record: &ReminderRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        // Claim first: refuses records confirmed since the selection ran,
        // and bounds the record to a single SMS attempt.
        if !self.db.claim_sms_attempt(&record.id, now)? {
            return Ok(false);
        }

        let patient = self
            .db
            .get_patient(&record.patient_id)?
            .ok_or_else(|| EngineError::PatientNotFound(record.patient_id.clone()))?;
        let medication = self
            .db
            .get_medication(&record.medication_id)?
            .ok_or_else(|| EngineError::MedicationNotFound(record.medication_id.clone()))?;

        let outcome = self
            .dispatch(self.gateway.send_sms(
                &patient.phone_number,
                patient.preferred_language,
                &medication.name,
            ))
            .await;

        self.db.record_sms_outcome(&record.id, outcome.success)?;

        if outcome.success {
            log::info!(
                "Voice grace expired for {} ({}), SMS sent",
                patient.name,
                medication.name
            );
        } else {
            log::warn!(
                "SMS dispatch failed for {} ({}), reminder {} proceeds toward caregiver alert",
                patient.name,
                medication.name,
                record.id
            );
        }
        Ok(true)
    }

    /// Mark unconfirmed reminders whose SMS grace period has elapsed as
    /// missed and alert their caregivers. Returns how many records were
    /// transitioned.
    pub async fn sweep_sms_grace(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let cutoff = now - self.settings.sms_grace;
        let expired = self.db.sms_grace_expired(cutoff)?;

        let mut missed = 0;
        for record in expired {
            match self.mark_missed(&record, now).await {
                Ok(true) => missed += 1,
                Ok(false) => {}
                Err(e) => {
                    log::error!("Missed transition failed for reminder {}: {}", record.id, e);
                }
            }
        }
        Ok(missed)
    }

    async fn mark_missed(
        &self,
        record: &ReminderRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        // Claim the terminal transition before alerting: exactly one alert
        // per record, and a racing confirmation leaves the record taken.
        if !self.db.claim_missed(&record.id, now)? {
            return Ok(false);
        }

        let patient = self
            .db
            .get_patient(&record.patient_id)?
            .ok_or_else(|| EngineError::PatientNotFound(record.patient_id.clone()))?;
        let medication = self
            .db
            .get_medication(&record.medication_id)?
            .ok_or_else(|| EngineError::MedicationNotFound(record.medication_id.clone()))?;
        let caregiver = self
            .db
            .get_caregiver(&patient.caregiver_id)?
            .ok_or_else(|| EngineError::CaregiverNotFound(patient.caregiver_id.clone()))?;

        log::warn!(
            "Medication missed: {} ({}), alerting caregiver {}",
            patient.name,
            medication.name,
            caregiver.name
        );

        let outcome = self
            .alerter
            .alert_caregiver(&caregiver, &patient, &medication)
            .await;
        if !outcome.success {
            // Fire and forget: the missed status stands either way
            log::error!(
                "Caregiver alert failed for reminder {} (caregiver {})",
                record.id,
                caregiver.id
            );
        }
        Ok(true)
    }

    /// Mark a reminder taken. Idempotent overwrite regardless of current
    /// status; confirmation is authoritative even against a sweep that
    /// already marked the dose missed.
    pub fn confirm_medication(
        &self,
        reminder_id: &str,
        method: ConfirmationMethod,
        now: DateTime<Utc>,
    ) -> Result<ReminderRecord, ConfirmError> {
        let record = self
            .db
            .confirm_reminder(reminder_id, method, now)?
            .ok_or_else(|| ConfirmError::ReminderNotFound(reminder_id.to_string()))?;
        log::info!(
            "Medication confirmed as taken via {} (reminder {})",
            method.as_str(),
            record.id
        );
        Ok(record)
    }

    /// Run a gateway call under the configured timeout. A timed-out call
    /// is a failed attempt, never a stalled tick.
    async fn dispatch(
        &self,
        call: impl std::future::Future<Output = DispatchOutcome>,
    ) -> DispatchOutcome {
        match tokio::time::timeout(self.settings.call_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => {
                log::warn!(
                    "Gateway call timed out after {:?}",
                    self.settings.call_timeout
                );
                DispatchOutcome::failed(Utc::now())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone};
    use parking_lot::Mutex;

    use crate::notification::AlertOutcome;
    use crate::types::{Caregiver, Language, Patient, ReminderStatus};

    use super::*;

    /// Gateway double that records every dispatch and can be switched to
    /// fail.
    pub(crate) struct FakeGateway {
        pub calls: Mutex<Vec<String>>,
        pub sms: Mutex<Vec<String>>,
        pub succeed: AtomicBool,
    }

    impl FakeGateway {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                sms: Mutex::new(Vec::new()),
                succeed: AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl NotificationGateway for FakeGateway {
        async fn place_voice_call(
            &self,
            phone_number: &str,
            _language: Language,
            _medication_name: &str,
        ) -> DispatchOutcome {
            self.calls.lock().push(phone_number.to_string());
            DispatchOutcome {
                success: self.succeed.load(Ordering::SeqCst),
                provider_id: Some("CALL-test".to_string()),
                timestamp: Utc::now(),
            }
        }

        async fn send_sms(
            &self,
            phone_number: &str,
            _language: Language,
            _medication_name: &str,
        ) -> DispatchOutcome {
            self.sms.lock().push(phone_number.to_string());
            DispatchOutcome {
                success: self.succeed.load(Ordering::SeqCst),
                provider_id: Some("SMS-test".to_string()),
                timestamp: Utc::now(),
            }
        }
    }

    pub(crate) struct FakeAlerter {
        pub alerts: Mutex<Vec<String>>,
    }

    impl FakeAlerter {
        pub fn new() -> Self {
            Self {
                alerts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CaregiverAlerter for FakeAlerter {
        async fn alert_caregiver(
            &self,
            caregiver: &Caregiver,
            _patient: &Patient,
            _medication: &MedicationSchedule,
        ) -> AlertOutcome {
            self.alerts.lock().push(caregiver.id.clone());
            AlertOutcome {
                success: true,
                timestamp: Utc::now(),
            }
        }
    }

    pub(crate) struct Fixture {
        pub db: Arc<ReminderDb>,
        pub gateway: Arc<FakeGateway>,
        pub alerter: Arc<FakeAlerter>,
        pub engine: Arc<EscalationEngine>,
        pub medication: MedicationSchedule,
    }

    pub(crate) fn settings() -> EngineSettings {
        EngineSettings {
            voice_grace: ChronoDuration::minutes(15),
            sms_grace: ChronoDuration::minutes(10),
            call_timeout: Duration::from_secs(5),
            tz: chrono_tz::UTC,
        }
    }

    pub(crate) fn fixture() -> Fixture {
        let db = Arc::new(ReminderDb::open_in_memory().unwrap());
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
            age: Some(78),
            address: None,
        })
        .unwrap();
        let medication = MedicationSchedule {
            id: "m1".to_string(),
            patient_id: "p1".to_string(),
            name: "Aspirin".to_string(),
            dosage: "75mg".to_string(),
            instructions: None,
            times: vec!["08:00".parse().unwrap()],
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: None,
            active: true,
        };
        db.insert_medication(&medication).unwrap();

        let gateway = Arc::new(FakeGateway::new());
        let alerter = Arc::new(FakeAlerter::new());
        let engine = Arc::new(EscalationEngine::new(
            db.clone(),
            gateway.clone(),
            alerter.clone(),
            settings(),
        ));

        Fixture {
            db,
            gateway,
            alerter,
            engine,
            medication,
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_send_reminder_creates_record_and_places_call() {
        let f = fixture();
        let record = f.engine.send_reminder(&f.medication, at(8, 0)).await.unwrap();

        assert_eq!(record.status, ReminderStatus::Sent);
        assert!(record.voice_sent);
        assert_eq!(record.voice_attempted_at, Some(at(8, 0)));
        assert_eq!(f.gateway.calls.lock().len(), 1);

        let stored = f.db.get_reminder(&record.id).unwrap().unwrap();
        assert!(stored.voice_sent);
        assert_eq!(stored.scheduled_day, at(8, 0).date_naive());
    }

    #[tokio::test]
    async fn test_send_reminder_gateway_failure_still_creates_record() {
        let f = fixture();
        f.gateway.succeed.store(false, Ordering::SeqCst);

        let record = f.engine.send_reminder(&f.medication, at(8, 0)).await.unwrap();
        assert_eq!(record.status, ReminderStatus::Sent);
        assert!(!record.voice_sent);
        assert_eq!(record.voice_attempted_at, Some(at(8, 0)));
    }

    #[tokio::test]
    async fn test_send_reminder_dedupes_same_day() {
        let f = fixture();
        let first = f.engine.send_reminder(&f.medication, at(8, 0)).await.unwrap();
        let second = f.engine.send_reminder(&f.medication, at(8, 0)).await.unwrap();

        assert_eq!(first.id, second.id);
        // No second voice call for the same day
        assert_eq!(f.gateway.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_voice_grace_escalates_to_sms() {
        let f = fixture();
        let record = f.engine.send_reminder(&f.medication, at(8, 0)).await.unwrap();

        // Not yet expired at 8:14
        assert_eq!(f.engine.sweep_voice_grace(at(8, 14)).await.unwrap(), 0);
        assert!(f.gateway.sms.lock().is_empty());

        // Expired at 8:16
        assert_eq!(f.engine.sweep_voice_grace(at(8, 16)).await.unwrap(), 1);
        assert_eq!(f.gateway.sms.lock().len(), 1);

        let stored = f.db.get_reminder(&record.id).unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Sent);
        assert!(stored.sms_sent);
        assert_eq!(stored.sms_attempted_at, Some(at(8, 16)));
    }

    #[tokio::test]
    async fn test_resweep_sends_no_second_sms() {
        let f = fixture();
        f.engine.send_reminder(&f.medication, at(8, 0)).await.unwrap();

        assert_eq!(f.engine.sweep_voice_grace(at(8, 16)).await.unwrap(), 1);
        assert_eq!(f.engine.sweep_voice_grace(at(8, 16)).await.unwrap(), 0);
        assert_eq!(f.engine.sweep_voice_grace(at(8, 20)).await.unwrap(), 0);
        assert_eq!(f.gateway.sms.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_voice_still_escalates() {
        let f = fixture();
        f.gateway.succeed.store(false, Ordering::SeqCst);
        f.engine.send_reminder(&f.medication, at(8, 0)).await.unwrap();
        f.gateway.succeed.store(true, Ordering::SeqCst);

        assert_eq!(f.engine.sweep_voice_grace(at(8, 16)).await.unwrap(), 1);
        assert_eq!(f.gateway.sms.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_sms_grace_marks_missed_and_alerts_once() {
        let f = fixture();
        let record = f.engine.send_reminder(&f.medication, at(8, 0)).await.unwrap();
        f.engine.sweep_voice_grace(at(8, 16)).await.unwrap();

        // Not yet expired at 8:25
        assert_eq!(f.engine.sweep_sms_grace(at(8, 25)).await.unwrap(), 0);

        // Expired at 8:27
        assert_eq!(f.engine.sweep_sms_grace(at(8, 27)).await.unwrap(), 1);
        let stored = f.db.get_reminder(&record.id).unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Missed);
        assert!(stored.caregiver_alert_sent);
        assert_eq!(stored.caregiver_alerted_at, Some(at(8, 27)));
        assert_eq!(f.alerter.alerts.lock().len(), 1);
        assert_eq!(f.alerter.alerts.lock()[0], "c1");

        // Re-sweeping fires no second alert
        assert_eq!(f.engine.sweep_sms_grace(at(8, 30)).await.unwrap(), 0);
        assert_eq!(f.alerter.alerts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_sms_still_progresses_to_alert() {
        let f = fixture();
        f.engine.send_reminder(&f.medication, at(8, 0)).await.unwrap();

        f.gateway.succeed.store(false, Ordering::SeqCst);
        assert_eq!(f.engine.sweep_voice_grace(at(8, 16)).await.unwrap(), 1);

        assert_eq!(f.engine.sweep_sms_grace(at(8, 27)).await.unwrap(), 1);
        assert_eq!(f.alerter.alerts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_confirmation_short_circuits_escalation() {
        let f = fixture();
        let record = f.engine.send_reminder(&f.medication, at(8, 0)).await.unwrap();

        let confirmed = f
            .engine
            .confirm_medication(&record.id, ConfirmationMethod::Manual, at(8, 10))
            .unwrap();
        assert_eq!(confirmed.status, ReminderStatus::Taken);
        assert_eq!(confirmed.confirmation_method, ConfirmationMethod::Manual);
        assert_eq!(confirmed.confirmed_at, Some(at(8, 10)));

        // Neither sweep selects the confirmed record
        assert_eq!(f.engine.sweep_voice_grace(at(8, 16)).await.unwrap(), 0);
        assert_eq!(f.engine.sweep_sms_grace(at(8, 27)).await.unwrap(), 0);
        assert!(f.gateway.sms.lock().is_empty());
        assert!(f.alerter.alerts.lock().is_empty());

        let stored = f.db.get_reminder(&record.id).unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Taken);
    }

    #[tokio::test]
    async fn test_confirmation_after_sms_prevents_missed() {
        let f = fixture();
        let record = f.engine.send_reminder(&f.medication, at(8, 0)).await.unwrap();
        f.engine.sweep_voice_grace(at(8, 16)).await.unwrap();

        f.engine
            .confirm_medication(&record.id, ConfirmationMethod::Keypad, at(8, 20))
            .unwrap();

        assert_eq!(f.engine.sweep_sms_grace(at(8, 27)).await.unwrap(), 0);
        let stored = f.db.get_reminder(&record.id).unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Taken);
        assert!(f.alerter.alerts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_overwrites_missed() {
        let f = fixture();
        let record = f.engine.send_reminder(&f.medication, at(8, 0)).await.unwrap();
        f.engine.sweep_voice_grace(at(8, 16)).await.unwrap();
        f.engine.sweep_sms_grace(at(8, 27)).await.unwrap();

        let confirmed = f
            .engine
            .confirm_medication(&record.id, ConfirmationMethod::Manual, at(9, 0))
            .unwrap();
        assert_eq!(confirmed.status, ReminderStatus::Taken);
    }

    #[tokio::test]
    async fn test_confirm_unknown_reminder() {
        let f = fixture();
        let err = f
            .engine
            .confirm_medication("nope", ConfirmationMethod::Manual, at(8, 0))
            .unwrap_err();
        assert!(matches!(err, ConfirmError::ReminderNotFound(_)));
    }

    /// Full escalation walk-through: Aspirin at 08:00, voice grace 15
    /// minutes, SMS grace 10 minutes, no confirmation.
    #[tokio::test]
    async fn test_aspirin_escalation_timeline() {
        let f = fixture();

        let record = f.engine.send_reminder(&f.medication, at(8, 0)).await.unwrap();
        assert_eq!(record.status, ReminderStatus::Sent);
        assert!(record.voice_sent);

        assert_eq!(f.engine.sweep_voice_grace(at(8, 16)).await.unwrap(), 1);
        let stored = f.db.get_reminder(&record.id).unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Sent);
        assert_eq!(stored.sms_attempted_at, Some(at(8, 16)));

        assert_eq!(f.engine.sweep_sms_grace(at(8, 27)).await.unwrap(), 1);
        let stored = f.db.get_reminder(&record.id).unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Missed);
        assert!(stored.caregiver_alert_sent);
        assert_eq!(f.alerter.alerts.lock().len(), 1);
    }
}
