//! Localized message catalog for voice calls, SMS, and caregiver alerts.
//!
//! Each language maps to a fixed template: the voice script is a greeting,
//! an instruction naming the medication, and a keypad confirmation prompt;
//! the SMS is a single templated string.

use crate::types::Language;

/// The three spoken segments of a reminder call.
#[derive(Debug, Clone, Copy)]
pub struct VoiceScript {
    pub greeting: &'static str,
    pub instruction: &'static str,
    pub confirmation: &'static str,
}

const VOICE_EN: VoiceScript = VoiceScript {
    greeting: "Hello, this is a medication reminder.",
    instruction: "It's time to take your medicine: ",
    confirmation: "Press 1 to confirm you have taken the medicine.",
};

const VOICE_HI: VoiceScript = VoiceScript {
    greeting: "नमस्ते, यह दवा की याद दिलाने के लिए कॉल है।",
    instruction: "अब आपकी दवा लेने का समय है: ",
    confirmation: "दवा ली है यह बताने के लिए 1 दबाएं।",
};

const VOICE_MR: VoiceScript = VoiceScript {
    greeting: "नमस्कार, ही औषध आठवण करून देण्यासाठी कॉल आहे।",
    instruction: "आता तुमची औषधे घेण्याची वेळ आहे: ",
    confirmation: "औषध घेतल्याची पुष्टी करण्यासाठी 1 दाबा।",
};

/// Voice script for a language.
pub fn voice_script(language: Language) -> VoiceScript {
    match language {
        Language::En => VOICE_EN,
        Language::Hi => VOICE_HI,
        Language::Mr => VOICE_MR,
    }
}

/// SMS reminder body naming the medication.
pub fn sms_text(language: Language, medication_name: &str) -> String {
    match language {
        Language::En => format!("Reminder: Please take your medicine - {medication_name}"),
        Language::Hi => format!("अनुस्मारक: कृपया अपनी दवा लें - {medication_name}"),
        Language::Mr => format!("आठवण: कृपया आपली औषधे घ्या - {medication_name}"),
    }
}

/// Caregiver alert body for a missed dose.
pub fn caregiver_alert_text(patient_name: &str, medication_name: &str, dosage: &str) -> String {
    format!(
        "Missed medication alert: {patient_name} has not confirmed {medication_name} ({dosage})"
    )
}
