//! Notification gateway: voice call and SMS delivery.
//!
//! The engine only sees `DispatchOutcome`; provider errors and timeouts are
//! reported as `success = false`, never as panics or propagated errors, so a
//! flaky provider can't take down a sweep.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::messages;
use crate::types::Language;

/// Result of a single voice or SMS dispatch attempt.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub success: bool,
    /// Provider reference id when the dispatch was accepted.
    pub provider_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DispatchOutcome {
    pub fn failed(timestamp: DateTime<Utc>) -> Self {
        Self {
            success: false,
            provider_id: None,
            timestamp,
        }
    }
}

/// Delivery channel for patient contact attempts.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Place a voice call reading the localized reminder script.
    async fn place_voice_call(
        &self,
        phone_number: &str,
        language: Language,
        medication_name: &str,
    ) -> DispatchOutcome;

    /// Send the localized reminder SMS.
    async fn send_sms(
        &self,
        phone_number: &str,
        language: Language,
        medication_name: &str,
    ) -> DispatchOutcome;
}

/// Reference gateway that logs the message instead of dialing a provider.
/// Stands in for the telephony integration in development and tests.
pub struct ConsoleGateway;

#[async_trait]
impl NotificationGateway for ConsoleGateway {
    async fn place_voice_call(
        &self,
        phone_number: &str,
        language: Language,
        medication_name: &str,
    ) -> DispatchOutcome {
        let script = messages::voice_script(language);
        log::info!(
            "Voice call to {} ({}): {} {}{} / {}",
            phone_number,
            language,
            script.greeting,
            script.instruction,
            medication_name,
            script.confirmation
        );
        DispatchOutcome {
            success: true,
            provider_id: Some(format!("CALL-{}", uuid::Uuid::new_v4())),
            timestamp: Utc::now(),
        }
    }

    async fn send_sms(
        &self,
        phone_number: &str,
        language: Language,
        medication_name: &str,
    ) -> DispatchOutcome {
        let body = messages::sms_text(language, medication_name);
        log::info!("SMS to {} ({}): {}", phone_number, language, body);
        DispatchOutcome {
            success: true,
            provider_id: Some(format!("SMS-{}", uuid::Uuid::new_v4())),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_console_gateway_reports_success() {
        let gateway = ConsoleGateway;
        let outcome = gateway
            .place_voice_call("9876543210", Language::En, "Aspirin")
            .await;
        assert!(outcome.success);
        assert!(outcome.provider_id.unwrap().starts_with("CALL-"));

        let outcome = gateway.send_sms("9876543210", Language::Hi, "Aspirin").await;
        assert!(outcome.success);
        assert!(outcome.provider_id.unwrap().starts_with("SMS-"));
    }
}
