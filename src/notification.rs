//! Caregiver alerting for missed doses.
//!
//! Fire-and-forget from the engine's perspective: the alert is attempted
//! once when a dose transitions to missed, failure is logged and not
//! retried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::messages;
use crate::types::{Caregiver, MedicationSchedule, Patient};

/// Result of one caregiver alert attempt.
#[derive(Debug, Clone)]
pub struct AlertOutcome {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Channel for notifying a caregiver that a patient missed a dose.
#[async_trait]
pub trait CaregiverAlerter: Send + Sync {
    async fn alert_caregiver(
        &self,
        caregiver: &Caregiver,
        patient: &Patient,
        medication: &MedicationSchedule,
    ) -> AlertOutcome;
}

/// Reference alerter that logs the alert. A production deployment would
/// fan out to SMS, email, and a dashboard push here.
pub struct ConsoleAlerter;

#[async_trait]
impl CaregiverAlerter for ConsoleAlerter {
    async fn alert_caregiver(
        &self,
        caregiver: &Caregiver,
        patient: &Patient,
        medication: &MedicationSchedule,
    ) -> AlertOutcome {
        log::warn!(
            "Caregiver alert to {} <{}> ({}): {}",
            caregiver.name,
            caregiver.email,
            caregiver.phone_number,
            messages::caregiver_alert_text(&patient.name, &medication.name, &medication.dosage)
        );
        AlertOutcome {
            success: true,
            timestamp: Utc::now(),
        }
    }
}
