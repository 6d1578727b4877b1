//! Wake time selection
//!
//! The one place that decides whether the alarm fires at the predicted time or
//! at the hard deadline. The predictor's reasoning text and the host app's
//! notification scheduler both go through `select_wake_time`, so they cannot
//! disagree.

use crate::types::WakePrediction;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// The alarm plan handed to the notification scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledWake {
    /// When the primary alarm fires
    pub primary: NaiveDateTime,
    /// Backup alarm at the deadline, when the primary fires early
    pub backup: Option<NaiveDateTime>,
    /// Whether the primary alarm uses the predicted time
    pub uses_prediction: bool,
}

/// Choose between the predicted time and the fallback deadline.
///
/// The prediction is used when its confidence meets the threshold and it
/// actually falls before the deadline; the deadline then stays as a backup.
pub fn select_wake_time(prediction: &WakePrediction, confidence_threshold: u8) -> ScheduledWake {
    let uses_prediction = prediction.confidence >= confidence_threshold
        && prediction.predicted_wake_time < prediction.fallback_time;

    if uses_prediction {
        ScheduledWake {
            primary: prediction.predicted_wake_time,
            backup: Some(prediction.fallback_time),
            uses_prediction,
        }
    } else {
        ScheduledWake {
            primary: prediction.fallback_time,
            backup: None,
            uses_prediction,
        }
    }
}
