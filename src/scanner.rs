//! Due-dose scanner: finds medications whose schedule matches the current
//! minute and hands them to the escalation engine.
//!
//! The scanner only ever creates reminder records; existing records are
//! mutated exclusively by the engine's sweeps and the confirmation path.

use std::sync::Arc;

use chrono::{DateTime, DurationRound, Utc};
use chrono_tz::Tz;

use crate::db::ReminderDb;
use crate::engine::EscalationEngine;

/// Counts from one scanner pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Reminders created this pass.
    pub created: usize,
    /// Due medications skipped because today's record already exists.
    pub already_reminded: usize,
}

pub struct DueDoseScanner {
    db: Arc<ReminderDb>,
    engine: Arc<EscalationEngine>,
    tz: Tz,
}

impl DueDoseScanner {
    pub fn new(db: Arc<ReminderDb>, engine: Arc<EscalationEngine>, tz: Tz) -> Self {
        Self { db, engine, tz }
    }

    /// One scanner pass at `now`.
    ///
    /// Truncates `now` to the minute, matches each eligible schedule's dose
    /// times against the local wall clock, and creates a reminder for every
    /// match that has no record yet today. Per-medication failures are
    /// logged and the pass continues; a second pass within the same minute
    /// creates nothing new.
    pub async fn scan(&self, now: DateTime<Utc>) -> ScanOutcome {
        let now = now
            .duration_trunc(chrono::Duration::minutes(1))
            .unwrap_or(now);
        let local = now.with_timezone(&self.tz);
        let today = local.date_naive();

        let candidates = match self.db.due_candidates(today) {
            Ok(candidates) => candidates,
            Err(e) => {
                log::error!("Due-dose scan failed to load schedules: {}", e);
                return ScanOutcome::default();
            }
        };

        let mut outcome = ScanOutcome::default();
        for medication in candidates {
            if !medication.in_date_range(today) || !medication.is_due_at(local.time()) {
                continue;
            }

            match self.db.reminder_for_day(&medication.id, today) {
                Ok(Some(_)) => {
                    outcome.already_reminded += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!(
                        "Dedupe check failed for medication {}: {}",
                        medication.id,
                        e
                    );
                    continue;
                }
            }

            log::info!(
                "Medication {} due at {}, triggering reminder",
                medication.name,
                local.format("%H:%M")
            );
            match self.engine.send_reminder(&medication, now).await {
                Ok(_) => outcome.created += 1,
                Err(e) => {
                    log::error!(
                        "Failed to send reminder for medication {}: {}",
                        medication.id,
                        e
                    );
                }
            }
        }
        outcome
    }
}
