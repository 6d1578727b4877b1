//! Core types for Synheart Wake
//!
//! This module defines the data that flows through the engine: recorded sleep
//! sessions and their stages, user-configured wake windows and settings, the
//! derived sleep pattern, wake predictions, and feedback ratings.
//!
//! All timestamps are device-local wall-clock times. The engine reasons about
//! "tonight" and "tomorrow morning" in the user's own clock, so no timezone
//! conversion happens inside it.

use crate::error::WakeError;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wake window durations the alarm UI offers (minutes)
pub const ALLOWED_WINDOW_DURATIONS: [u32; 4] = [15, 30, 45, 60];

/// Longest span an explicit earliest wake time may open before the deadline
pub const MAX_WINDOW_MINUTES: u32 = 60;

/// Default confidence threshold for using a predicted wake time
pub const DEFAULT_CONFIDENCE_THRESHOLD: u8 = 70;

/// Sleep stage classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStageType {
    Deep,
    Light,
    Rem,
    Awake,
}

impl SleepStageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SleepStageType::Deep => "deep",
            SleepStageType::Light => "light",
            SleepStageType::Rem => "rem",
            SleepStageType::Awake => "awake",
        }
    }

    /// Human-readable label used in prediction reasoning
    pub fn describe(&self) -> &'static str {
        match self {
            SleepStageType::Deep => "deep sleep",
            SleepStageType::Light => "light sleep",
            SleepStageType::Rem => "REM sleep",
            SleepStageType::Awake => "a brief awakening",
        }
    }
}

/// A classified interval within one night
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepStage {
    #[serde(rename = "type")]
    pub stage: SleepStageType,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl SleepStage {
    pub fn new(stage: SleepStageType, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { stage, start, end }
    }

    /// Stage duration in minutes (negative for inverted intervals)
    pub fn duration_minutes(&self) -> f64 {
        minutes_between(self.start, self.end)
    }

    /// Whether the stage ends at or after it starts
    pub fn is_well_formed(&self) -> bool {
        self.end >= self.start
    }
}

/// Heart rate summary for a night, when the wearable provides one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartRateStats {
    pub average_bpm: Option<f64>,
    pub min_bpm: Option<f64>,
    pub max_bpm: Option<f64>,
}

/// One night's full sleep record, keyed by `date`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepSession {
    /// Night this session belongs to (the date the user woke up)
    pub date: NaiveDate,
    /// Sleep onset
    pub sleep_start: NaiveDateTime,
    /// Final wake
    pub sleep_end: NaiveDateTime,
    /// Total duration (minutes)
    pub total_duration_minutes: f64,
    /// Ordered stage intervals; may be empty when the wearable only sent totals
    #[serde(default)]
    pub stages: Vec<SleepStage>,
    #[serde(default)]
    pub deep_minutes: f64,
    #[serde(default)]
    pub light_minutes: f64,
    #[serde(default)]
    pub rem_minutes: f64,
    #[serde(default)]
    pub awake_minutes: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<HeartRateStats>,
}

impl SleepSession {
    /// Build a session from an ordered stage list, deriving onset, wake,
    /// total duration, and per-stage minutes. Returns `None` for an empty list.
    pub fn from_stages(date: NaiveDate, stages: Vec<SleepStage>) -> Option<Self> {
        let sleep_start = stages.iter().map(|s| s.start).min()?;
        let sleep_end = stages.iter().map(|s| s.end).max()?;

        let mut session = Self {
            date,
            sleep_start,
            sleep_end,
            total_duration_minutes: minutes_between(sleep_start, sleep_end),
            stages: Vec::new(),
            deep_minutes: 0.0,
            light_minutes: 0.0,
            rem_minutes: 0.0,
            awake_minutes: 0.0,
            heart_rate: None,
        };

        for stage in stages.iter().filter(|s| s.is_well_formed()) {
            let minutes = stage.duration_minutes();
            match stage.stage {
                SleepStageType::Deep => session.deep_minutes += minutes,
                SleepStageType::Light => session.light_minutes += minutes,
                SleepStageType::Rem => session.rem_minutes += minutes,
                SleepStageType::Awake => session.awake_minutes += minutes,
            }
        }
        session.stages = stages;

        Some(session)
    }

    /// Aggregate minutes recorded for one stage type
    pub fn stage_minutes(&self, stage: SleepStageType) -> f64 {
        match stage {
            SleepStageType::Deep => self.deep_minutes,
            SleepStageType::Light => self.light_minutes,
            SleepStageType::Rem => self.rem_minutes,
            SleepStageType::Awake => self.awake_minutes,
        }
    }

    /// Minutes from sleep onset to the given instant
    pub fn minutes_from_onset(&self, at: NaiveDateTime) -> f64 {
        minutes_between(self.sleep_start, at)
    }
}

/// A user-configured alarm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeWindow {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Latest acceptable wake time
    pub hard_wake_time: NaiveTime,
    /// Window length before the deadline (15, 30, 45 or 60 minutes)
    pub window_duration_minutes: u32,
    /// Explicit earliest acceptable wake time, overriding the duration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest_wake_time: Option<NaiveTime>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Days on which the alarm repeats; empty means a one-shot alarm
    #[serde(default)]
    pub repeat_days: Vec<Weekday>,
}

fn default_enabled() -> bool {
    true
}

impl WakeWindow {
    /// Create an enabled one-shot window with a fresh id
    pub fn new(hard_wake_time: NaiveTime, window_duration_minutes: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: None,
            hard_wake_time,
            window_duration_minutes,
            earliest_wake_time: None,
            enabled: true,
            repeat_days: Vec::new(),
        }
    }

    /// Check the window against the durations the app allows
    pub fn validate(&self) -> Result<(), WakeError> {
        if !ALLOWED_WINDOW_DURATIONS.contains(&self.window_duration_minutes) {
            return Err(WakeError::InvalidWakeWindow(format!(
                "window duration {} not in {:?}",
                self.window_duration_minutes, ALLOWED_WINDOW_DURATIONS
            )));
        }
        let span = self.earliest_span_minutes();
        if let (Some(earliest), Some(span)) = (self.earliest_wake_time, span) {
            if span > MAX_WINDOW_MINUTES {
                return Err(WakeError::InvalidWakeWindow(format!(
                    "earliest wake time {} opens {} minutes before the {} deadline (max {})",
                    earliest.format("%H:%M"),
                    span,
                    self.hard_wake_time.format("%H:%M"),
                    MAX_WINDOW_MINUTES
                )));
            }
        }
        Ok(())
    }

    /// Minutes from the explicit earliest time to the deadline, wrapping
    /// past midnight
    pub fn earliest_span_minutes(&self) -> Option<u32> {
        let earliest = self.earliest_wake_time?;
        let span = (self.hard_wake_time - earliest).num_minutes().rem_euclid(24 * 60);
        u32::try_from(span).ok()
    }

    /// Whether this window fires on the given wake date
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        self.enabled && (self.repeat_days.is_empty() || self.repeat_days.contains(&date.weekday()))
    }
}

/// App-level user settings the engine reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub has_completed_onboarding: bool,
    pub wearable_connected: bool,
    pub notifications_enabled: bool,
    /// Minimum confidence (0-95) for the scheduler to use a predicted time
    pub confidence_threshold: u8,
    pub volume_ramp_enabled: bool,
    pub haptics_enabled: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            has_completed_onboarding: false,
            wearable_connected: false,
            notifications_enabled: false,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            volume_ramp_enabled: true,
            haptics_enabled: true,
        }
    }
}

/// Interval of elevated light-sleep probability, relative to sleep onset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_minutes_from_sleep: u32,
    pub end_minutes_from_sleep: u32,
    /// Light-sleep probability (0-1)
    pub probability: f64,
}

impl TimeWindow {
    /// Start-inclusive, end-exclusive containment
    pub fn contains(&self, minutes_from_sleep: f64) -> bool {
        minutes_from_sleep >= f64::from(self.start_minutes_from_sleep)
            && minutes_from_sleep < f64::from(self.end_minutes_from_sleep)
    }
}

/// Statistical model of the user's sleep structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepPattern {
    /// Mean total sleep duration (minutes)
    pub average_sleep_duration: u32,
    /// Median detected cycle length (minutes)
    pub average_cycle_length: u32,
    pub typical_light_sleep_windows: Vec<TimeWindow>,
    /// Regularity of bedtime, wake time and duration (0-100)
    pub consistency_score: u8,
    /// Number of sessions the pattern was derived from
    pub data_points: usize,
}

/// The engine's recommendation for one night
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakePrediction {
    pub predicted_wake_time: NaiveDateTime,
    /// Confidence (0-95)
    pub confidence: u8,
    pub reasoning: String,
    /// The hard deadline
    pub fallback_time: NaiveDateTime,
    pub predicted_stage: SleepStageType,
}

/// A user's self-reported wake quality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRating {
    pub id: Uuid,
    pub date: NaiveDate,
    pub actual_wake_time: NaiveDateTime,
    pub predicted_wake_time: NaiveDateTime,
    /// Confidence at prediction time
    pub confidence: u8,
    /// How the wake-up felt (1-5)
    pub immediate_feeling: u8,
    /// Alertness half an hour later (1-5)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alertness_after_30_min: Option<u8>,
    /// Whether the alarm fired at the predicted time rather than the fallback
    pub used_prediction: bool,
}

/// Aggregate feedback statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub total_ratings: usize,
    /// Mean immediate feeling, one decimal
    pub average_feeling: f64,
    /// Mean alertness among ratings that have one, one decimal
    pub average_alertness: Option<f64>,
    /// Percent of prediction-used wake-ups that felt good (feeling >= 4)
    pub prediction_accuracy: u8,
    /// Signed half-over-half feeling change, roughly -100..100
    pub improvement_trend: i32,
}

/// Self-adjustment signal derived from feedback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmAdjustments {
    pub confidence_multiplier: f64,
    /// Reserved; not acted upon yet
    pub prefer_earlier_wake: bool,
}

impl Default for AlgorithmAdjustments {
    fn default() -> Self {
        Self {
            confidence_multiplier: 1.0,
            prefer_earlier_wake: false,
        }
    }
}

/// Signed minutes from `from` to `to`, with second precision
pub fn minutes_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_seconds() as f64 / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_session_from_stages_aggregates() {
        let stages = vec![
            SleepStage::new(SleepStageType::Light, at(15, 23, 0), at(15, 23, 30)),
            SleepStage::new(SleepStageType::Deep, at(15, 23, 30), at(16, 0, 30)),
            SleepStage::new(SleepStageType::Rem, at(16, 0, 30), at(16, 1, 0)),
            SleepStage::new(SleepStageType::Awake, at(16, 1, 0), at(16, 1, 10)),
        ];
        let date = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        let session = SleepSession::from_stages(date, stages).unwrap();

        assert_eq!(session.sleep_start, at(15, 23, 0));
        assert_eq!(session.sleep_end, at(16, 1, 10));
        assert!((session.total_duration_minutes - 130.0).abs() < 1e-9);
        assert!((session.stage_minutes(SleepStageType::Light) - 30.0).abs() < 1e-9);
        assert!((session.stage_minutes(SleepStageType::Deep) - 60.0).abs() < 1e-9);
        assert!((session.stage_minutes(SleepStageType::Rem) - 30.0).abs() < 1e-9);
        assert!((session.stage_minutes(SleepStageType::Awake) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_session_from_empty_stages() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        assert!(SleepSession::from_stages(date, vec![]).is_none());
    }

    #[test]
    fn test_inverted_stage_not_aggregated() {
        let stages = vec![
            SleepStage::new(SleepStageType::Light, at(15, 23, 0), at(15, 23, 30)),
            SleepStage::new(SleepStageType::Deep, at(16, 0, 30), at(15, 23, 30)),
        ];
        let date = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        let session = SleepSession::from_stages(date, stages).unwrap();

        assert!(!session.stages[1].is_well_formed());
        assert_eq!(session.deep_minutes, 0.0);
        assert_eq!(session.stages.len(), 2);
    }

    #[test]
    fn test_wake_window_validation() {
        let hard = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        assert!(WakeWindow::new(hard, 30).validate().is_ok());
        assert!(matches!(
            WakeWindow::new(hard, 20).validate(),
            Err(WakeError::InvalidWakeWindow(_))
        ));
    }

    #[test]
    fn test_wake_window_earliest_span() {
        let mut window = WakeWindow::new(NaiveTime::from_hms_opt(7, 0, 0).unwrap(), 30);
        window.earliest_wake_time = NaiveTime::from_hms_opt(6, 0, 0);
        assert_eq!(window.earliest_span_minutes(), Some(60));
        assert!(window.validate().is_ok());

        // Later than the deadline would open a 23.5-hour window
        window.earliest_wake_time = NaiveTime::from_hms_opt(7, 30, 0);
        assert_eq!(window.earliest_span_minutes(), Some(1410));
        assert!(matches!(window.validate(), Err(WakeError::InvalidWakeWindow(_))));

        window.earliest_wake_time = NaiveTime::from_hms_opt(5, 45, 0);
        assert!(window.validate().is_err());

        let mut midnight = WakeWindow::new(NaiveTime::from_hms_opt(0, 10, 0).unwrap(), 30);
        midnight.earliest_wake_time = NaiveTime::from_hms_opt(23, 50, 0);
        assert_eq!(midnight.earliest_span_minutes(), Some(20));
        assert!(midnight.validate().is_ok());
    }

    #[test]
    fn test_wake_window_repeat_days() {
        let mut window = WakeWindow::new(NaiveTime::from_hms_opt(7, 0, 0).unwrap(), 30);
        // 2024-01-15 is a Monday
        let monday = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2024, 1, 20).unwrap();

        assert!(window.applies_on(monday));
        assert!(window.applies_on(saturday));

        window.repeat_days = vec![Weekday::Mon, Weekday::Tue];
        assert!(window.applies_on(monday));
        assert!(!window.applies_on(saturday));

        window.enabled = false;
        assert!(!window.applies_on(monday));
    }

    #[test]
    fn test_time_window_bounds() {
        let window = TimeWindow {
            start_minutes_from_sleep: 120,
            end_minutes_from_sleep: 150,
            probability: 1.0,
        };
        assert!(window.contains(120.0));
        assert!(window.contains(149.9));
        assert!(!window.contains(150.0));
        assert!(!window.contains(119.0));
    }

    #[test]
    fn test_stage_serialization() {
        let stage = SleepStage::new(SleepStageType::Rem, at(16, 2, 0), at(16, 2, 20));
        let json = serde_json::to_value(&stage).unwrap();
        assert_eq!(json["type"], "rem");

        let window_json = r#"{
            "id": "4f8c1f9e-2d1b-4a7e-9b53-3c0d7b0c2a11",
            "hard_wake_time": "07:00:00",
            "window_duration_minutes": 30
        }"#;
        let window: WakeWindow = serde_json::from_str(window_json).unwrap();
        assert!(window.enabled);
        assert!(window.repeat_days.is_empty());
        assert!(window.earliest_wake_time.is_none());
    }

    #[test]
    fn test_settings_defaults() {
        let settings: UserSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.confidence_threshold, DEFAULT_CONFIDENCE_THRESHOLD);
        assert!(settings.volume_ramp_enabled);
    }
}
