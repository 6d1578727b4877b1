//! Engine configuration
//!
//! Tunables that are policy rather than algorithm. The algorithm constants
//! themselves live next to the code that uses them.

use crate::error::WakeError;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Default rolling retention for sessions and ratings (days)
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

/// Longest retention a store accepts (days)
pub const MAX_RETENTION_DAYS: i64 = 3650;

/// Check a retention window is at least one day and at most `MAX_RETENTION_DAYS`
pub fn validate_retention_days(days: i64) -> Result<i64, WakeError> {
    if (1..=MAX_RETENTION_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(WakeError::InvalidConfig(format!(
            "retention_days {days} outside 1..={MAX_RETENTION_DAYS}"
        )))
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bedtime the deviation penalty is measured against
    pub typical_bedtime: NaiveTime,
    /// Rolling retention applied by the history store (days)
    pub retention_days: i64,
    /// Apply the feedback-derived confidence multiplier to predictions
    pub apply_feedback_multiplier: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            typical_bedtime: NaiveTime::from_hms_opt(23, 0, 0).unwrap_or(NaiveTime::MIN),
            retention_days: DEFAULT_RETENTION_DAYS,
            apply_feedback_multiplier: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn validate(&self) -> Result<(), WakeError> {
        validate_retention_days(self.retention_days).map(|_| ())
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
