//! Runtime configuration.
//!
//! Loaded from `~/.dosewatch/config.json` when present, with serde defaults
//! for every field and environment-variable overrides applied on top. All
//! durations are plain integers (minutes/seconds) so the file stays
//! hand-editable.

use std::fs;
use std::path::PathBuf;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Environment override keys.
const ENV_VOICE_GRACE: &str = "DOSEWATCH_VOICE_GRACE_MINUTES";
const ENV_SMS_GRACE: &str = "DOSEWATCH_SMS_GRACE_MINUTES";
const ENV_TICK_INTERVAL: &str = "DOSEWATCH_TICK_INTERVAL_SECS";
const ENV_CALL_TIMEOUT: &str = "DOSEWATCH_CALL_TIMEOUT_SECS";
const ENV_TIMEZONE: &str = "DOSEWATCH_TIMEZONE";
const ENV_DB_PATH: &str = "DOSEWATCH_DB_PATH";

/// Configuration stored in `~/.dosewatch/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Minutes to wait for confirmation after the voice call before
    /// escalating to SMS.
    #[serde(default = "default_voice_grace")]
    pub voice_grace_minutes: u64,
    /// Minutes to wait for confirmation after the SMS before marking the
    /// dose missed and alerting the caregiver.
    #[serde(default = "default_sms_grace")]
    pub sms_grace_minutes: u64,
    /// Seconds between scheduler ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Upper bound on a single gateway call. Must stay below the tick
    /// interval so a hung provider cannot stall the loop past its cadence.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// IANA timezone name the HH:MM schedule times are interpreted in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Database file location. Defaults to `~/.dosewatch/dosewatch.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

fn default_voice_grace() -> u64 {
    15
}

fn default_sms_grace() -> u64 {
    10
}

fn default_tick_interval() -> u64 {
    60
}

fn default_call_timeout() -> u64 {
    30
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            voice_grace_minutes: default_voice_grace(),
            sms_grace_minutes: default_sms_grace(),
            tick_interval_secs: default_tick_interval(),
            call_timeout_secs: default_call_timeout(),
            timezone: default_timezone(),
            db_path: None,
        }
    }
}

impl Config {
    /// Load configuration: file if present, defaults otherwise, env
    /// overrides on top. A malformed file is an error; a missing one is not.
    pub fn load() -> Result<Self, String> {
        let mut config = match config_path() {
            Ok(path) if path.exists() => {
                let content = fs::read_to_string(&path)
                    .map_err(|e| format!("Failed to read config: {e}"))?;
                serde_json::from_str(&content)
                    .map_err(|e| format!("Failed to parse config: {e}"))?
            }
            _ => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.normalize();
        Ok(config)
    }

    /// Apply environment overrides through a lookup closure (injected so
    /// tests don't mutate process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ENV_VOICE_GRACE).and_then(|v| v.parse().ok()) {
            self.voice_grace_minutes = v;
        }
        if let Some(v) = lookup(ENV_SMS_GRACE).and_then(|v| v.parse().ok()) {
            self.sms_grace_minutes = v;
        }
        if let Some(v) = lookup(ENV_TICK_INTERVAL).and_then(|v| v.parse().ok()) {
            self.tick_interval_secs = v;
        }
        if let Some(v) = lookup(ENV_CALL_TIMEOUT).and_then(|v| v.parse().ok()) {
            self.call_timeout_secs = v;
        }
        if let Some(v) = lookup(ENV_TIMEZONE) {
            self.timezone = v;
        }
        if let Some(v) = lookup(ENV_DB_PATH) {
            self.db_path = Some(v);
        }
    }

    /// Clamp values that would break the scheduling contract.
    fn normalize(&mut self) {
        if self.tick_interval_secs == 0 {
            log::warn!("tickIntervalSecs of 0 is invalid, using default");
            self.tick_interval_secs = default_tick_interval();
        }
        if self.call_timeout_secs >= self.tick_interval_secs {
            log::warn!(
                "callTimeoutSecs ({}) must be below tickIntervalSecs ({}), clamping",
                self.call_timeout_secs,
                self.tick_interval_secs
            );
            self.call_timeout_secs = (self.tick_interval_secs / 2).max(1);
        }
    }

    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<Tz, String> {
        self.timezone
            .parse()
            .map_err(|_| format!("Invalid timezone: {}", self.timezone))
    }

    /// Resolve the database path, creating the state directory if needed.
    pub fn resolve_db_path(&self) -> Result<PathBuf, String> {
        if let Some(ref path) = self.db_path {
            return Ok(PathBuf::from(path));
        }
        Ok(state_dir()?.join("dosewatch.db"))
    }
}

/// The canonical config file path (`~/.dosewatch/config.json`).
pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".dosewatch").join("config.json"))
}

/// The state directory (`~/.dosewatch`), created on first use.
fn state_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    let dir = home.join(".dosewatch");
    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| format!("Failed to create state dir: {e}"))?;
    }
    Ok(dir)
}
