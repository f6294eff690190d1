//! Domain model shared across the scanner, engine, and store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Languages the voice and SMS templates are available in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Hi,
    Mr,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Hi => "hi",
            Language::Mr => "mr",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en" => Ok(Language::En),
            "hi" => Ok(Language::Hi),
            "mr" => Ok(Language::Mr),
            other => Err(format!("Unknown language: {other}")),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a reminder record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Sent,
    Taken,
    Missed,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Sent => "sent",
            ReminderStatus::Taken => "taken",
            ReminderStatus::Missed => "missed",
        }
    }
}

impl FromStr for ReminderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(ReminderStatus::Sent),
            "taken" => Ok(ReminderStatus::Taken),
            "missed" => Ok(ReminderStatus::Missed),
            other => Err(format!("Unknown reminder status: {other}")),
        }
    }
}

/// How a dose was confirmed as taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationMethod {
    None,
    CallDisconnect,
    Keypad,
    Manual,
}

impl ConfirmationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationMethod::None => "none",
            ConfirmationMethod::CallDisconnect => "call_disconnect",
            ConfirmationMethod::Keypad => "keypad",
            ConfirmationMethod::Manual => "manual",
        }
    }
}

impl FromStr for ConfirmationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ConfirmationMethod::None),
            "call_disconnect" => Ok(ConfirmationMethod::CallDisconnect),
            "keypad" => Ok(ConfirmationMethod::Keypad),
            "manual" => Ok(ConfirmationMethod::Manual),
            other => Err(format!("Unknown confirmation method: {other}")),
        }
    }
}

/// A wall-clock dose time (`HH:MM`, no date, no offset). Interpreted in the
/// configured timezone by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DoseTime(NaiveTime);

impl DoseTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(DoseTime)
    }

    /// True when `time` falls in this dose's minute.
    pub fn matches(&self, time: NaiveTime) -> bool {
        use chrono::Timelike;
        self.0.hour() == time.hour() && self.0.minute() == time.minute()
    }
}

impl FromStr for DoseTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(s, "%H:%M")
            .map(DoseTime)
            .map_err(|_| format!("Time must be in HH:MM format: {s}"))
    }
}

impl fmt::Display for DoseTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

impl Serialize for DoseTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DoseTime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Caregiver who owns one or more patients and receives missed-dose alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caregiver {
    pub id: String,
    pub name: String,
    pub phone_number: String,
    pub email: String,
}

/// An elderly patient receiving reminders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    pub name: String,
    pub phone_number: String,
    pub preferred_language: Language,
    pub caregiver_id: String,
    pub age: Option<u32>,
    pub address: Option<String>,
}

/// A prescribed medication with its daily dose times.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationSchedule {
    pub id: String,
    pub patient_id: String,
    pub name: String,
    pub dosage: String,
    pub instructions: Option<String>,
    pub times: Vec<DoseTime>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub active: bool,
}

impl MedicationSchedule {
    /// True when any dose time falls in the minute of `local_time`.
    pub fn is_due_at(&self, local_time: NaiveTime) -> bool {
        self.times.iter().any(|t| t.matches(local_time))
    }

    /// True when `day` is within the schedule's start/end bounds.
    pub fn in_date_range(&self, day: NaiveDate) -> bool {
        if self.start_date > day {
            return false;
        }
        match self.end_date {
            Some(end) => end >= day,
            None => true,
        }
    }

    /// Validate invariants: at least one time while active, no duplicates.
    pub fn validate(&self) -> Result<(), String> {
        if self.active && self.times.is_empty() {
            return Err("An active medication requires at least one dose time".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for time in &self.times {
            if !seen.insert(*time) {
                return Err(format!("Duplicate dose time: {time}"));
            }
        }
        Ok(())
    }
}

/// The central mutable record the escalation engine operates on.
///
/// The `*_attempted_at` timestamps are the attempt markers that drive
/// escalation; `voice_sent` / `sms_sent` record the gateway outcome of the
/// attempt. A record keeps progressing through the tiers even when a send
/// attempt failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRecord {
    pub id: String,
    pub medication_id: String,
    pub patient_id: String,
    pub scheduled_time: DateTime<Utc>,
    /// Calendar date of the dose in the configured timezone. Dedupe key:
    /// the store enforces one record per (medication, scheduled day).
    pub scheduled_day: NaiveDate,
    pub status: ReminderStatus,
    pub voice_sent: bool,
    pub voice_attempted_at: Option<DateTime<Utc>>,
    pub sms_sent: bool,
    pub sms_attempted_at: Option<DateTime<Utc>>,
    pub confirmation_method: ConfirmationMethod,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub caregiver_alert_sent: bool,
    pub caregiver_alerted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ReminderRecord {
    /// A fresh record in `sent` status with no contact attempts yet.
    pub fn new(
        medication_id: &str,
        patient_id: &str,
        scheduled_time: DateTime<Utc>,
        scheduled_day: NaiveDate,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            medication_id: medication_id.to_string(),
            patient_id: patient_id.to_string(),
            scheduled_time,
            scheduled_day,
            status: ReminderStatus::Sent,
            voice_sent: false,
            voice_attempted_at: None,
            sms_sent: false,
            sms_attempted_at: None,
            confirmation_method: ConfirmationMethod::None,
            confirmed_at: None,
            caregiver_alert_sent: false,
            caregiver_alerted_at: None,
            created_at: scheduled_time,
        }
    }
}

/// Adherence counts over a trailing window for one patient.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdherenceStats {
    pub total: usize,
    pub taken: usize,
    pub missed: usize,
    pub pending: usize,
    /// Percentage of reminders confirmed taken, rounded to the nearest
    /// integer. 0 when there are no reminders in the window.
    pub adherence_rate: u32,
}

/// Status rollup for one day's reminders.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodaySummary {
    pub total: usize,
    pub taken: usize,
    pub missed: usize,
    pub pending: usize,
}

/// Per-day status counts for the adherence trend view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAdherence {
    pub day: NaiveDate,
    pub taken: usize,
    pub missed: usize,
    pub pending: usize,
}

/// Adherence rate as a rounded percentage; 0 when `total` is 0.
pub fn adherence_rate(taken: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((taken as f64 / total as f64) * 100.0).round() as u32
}

/// Shape check for patient/caregiver contact numbers: 10 digits, leading
/// digit 6 through 9.
pub fn validate_phone(phone: &str) -> Result<(), String> {
    let valid = phone.len() == 10
        && phone.bytes().all(|b| b.is_ascii_digit())
        && matches!(phone.as_bytes()[0], b'6'..=b'9');
    if valid {
        Ok(())
    } else {
        Err(format!("Invalid phone number: {phone}"))
    }
}
