//! Engine orchestration
//!
//! This module provides the public API for Synheart Wake. It wires the storage
//! collaborator, pattern analyzer, feedback loop and predictor together.
//!
//! Every request re-reads the store and recomputes from scratch; nothing
//! derived is cached between calls.

use crate::analyzer::PatternAnalyzer;
use crate::config::EngineConfig;
use crate::error::WakeError;
use crate::feedback::{FeedbackLoop, FeedbackReport};
use crate::predictor::{PredictionInput, WakePredictor};
use crate::schedule::{select_wake_time, ScheduledWake};
use crate::store::{HistoryStore, SleepStore};
use crate::types::{
    AlgorithmAdjustments, FeedbackRating, FeedbackStats, SleepPattern, SleepSession,
    WakePrediction, WakeWindow,
};
use chrono::NaiveDateTime;
use tracing::debug;
use uuid::Uuid;

/// Timestamp formats accepted for local date-times
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"];

/// Analyze a history snapshot and return the sleep pattern as JSON.
///
/// # Arguments
/// * `history_json` - `HistoryStore` JSON snapshot
///
/// # Returns
/// `SleepPattern` JSON, or `null` when there are fewer than 7 sessions
pub fn analyze_history_json(history_json: &str) -> Result<String, WakeError> {
    let engine = WakeEngine::new(load_history(history_json)?);
    let pattern = engine.analyze()?;
    serde_json::to_string(&pattern).map_err(|e| WakeError::EncodingError(e.to_string()))
}

/// Predict tonight's wake time from a history snapshot.
///
/// # Arguments
/// * `history_json` - `HistoryStore` JSON snapshot
/// * `window_json` - `WakeWindow` JSON
/// * `bedtime` - Estimated local bedtime, e.g. `"2024-01-15T23:00:00"`
///
/// # Example
/// ```ignore
/// let prediction = predict_from_history_json(
///     &history,
///     r#"{"id": "...", "hard_wake_time": "07:00:00", "window_duration_minutes": 30}"#,
///     "2024-01-15T23:00:00",
/// )?;
/// ```
pub fn predict_from_history_json(
    history_json: &str,
    window_json: &str,
    bedtime: &str,
) -> Result<String, WakeError> {
    let window: WakeWindow =
        serde_json::from_str(window_json).map_err(|e| WakeError::ParseError(e.to_string()))?;
    let bedtime = parse_local_datetime(bedtime)?;

    let engine = WakeEngine::new(load_history(history_json)?);
    let prediction = engine.predict(&window, bedtime)?;
    serde_json::to_string(&prediction).map_err(|e| WakeError::EncodingError(e.to_string()))
}

/// Feedback statistics, insights and adjustments for a history snapshot, as JSON
pub fn feedback_report_json(history_json: &str) -> Result<String, WakeError> {
    let store = load_history(history_json)?;
    let report = FeedbackLoop::report(&store.ratings()?);
    serde_json::to_string(&report).map_err(|e| WakeError::EncodingError(e.to_string()))
}

/// Parse a device-local timestamp without timezone
pub fn parse_local_datetime(value: &str) -> Result<NaiveDateTime, WakeError> {
    let value = value.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .ok_or_else(|| {
            WakeError::DateParseError(format!(
                "'{value}' is not a local date-time like 2024-01-15T23:00:00"
            ))
        })
}

fn load_history(history_json: &str) -> Result<HistoryStore, WakeError> {
    HistoryStore::from_json(history_json).map_err(|e| WakeError::ParseError(e.to_string()))
}

/// Stateful engine over a storage collaborator.
///
/// Use this when the host keeps history between calls; wrap it in a `Mutex`
/// to share it across threads.
pub struct WakeEngine<S: SleepStore> {
    store: S,
    config: EngineConfig,
}

impl Default for WakeEngine<HistoryStore> {
    fn default() -> Self {
        Self::new(HistoryStore::default())
    }
}

impl<S: SleepStore> WakeEngine<S> {
    /// Create an engine with default configuration; the store keeps its
    /// own retention
    pub fn new(store: S) -> Self {
        Self {
            store,
            config: EngineConfig::default(),
        }
    }

    /// Create an engine with a specific configuration, applying its
    /// retention window to the store
    pub fn with_config(mut store: S, config: EngineConfig) -> Result<Self, WakeError> {
        config.validate()?;
        store.set_retention_days(config.retention_days)?;
        Ok(Self { store, config })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Consume the engine and hand back its store
    pub fn into_store(self) -> S {
        self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Record a synced session (upserted by date)
    pub fn record_session(&mut self, session: SleepSession) -> Result<(), WakeError> {
        debug!(date = %session.date, stages = session.stages.len(), "Recording session");
        self.store.upsert_session(session)
    }

    /// Derive the sleep pattern from the stored sessions
    pub fn analyze(&self) -> Result<Option<SleepPattern>, WakeError> {
        Ok(PatternAnalyzer::analyze(&self.store.sessions()?))
    }

    /// Predict the wake time for a window and tonight's bedtime
    pub fn predict(
        &self,
        window: &WakeWindow,
        estimated_bedtime: NaiveDateTime,
    ) -> Result<WakePrediction, WakeError> {
        window.validate()?;
        let pattern = self.analyze()?;
        let settings = self.store.settings()?;
        let ratings = self.store.ratings()?;
        let adjustments = if self.config.apply_feedback_multiplier {
            Some(FeedbackLoop::algorithm_adjustments(&ratings))
        } else {
            None
        };

        let input = PredictionInput {
            pattern: pattern.as_ref(),
            wake_window: window,
            estimated_bedtime,
            settings: &settings,
            recent_feedback: &ratings,
            adjustments: adjustments.as_ref(),
            config: &self.config,
        };

        Ok(WakePredictor::generate(&input))
    }

    /// Predict for a stored wake window by id
    pub fn predict_window(
        &self,
        window_id: Uuid,
        estimated_bedtime: NaiveDateTime,
    ) -> Result<WakePrediction, WakeError> {
        let window = self
            .store
            .wake_windows()?
            .into_iter()
            .find(|w| w.id == window_id)
            .ok_or_else(|| WakeError::WindowNotFound(window_id.to_string()))?;
        self.predict(&window, estimated_bedtime)
    }

    /// Predict for the first enabled window that fires on the coming wake date
    pub fn predict_next(
        &self,
        estimated_bedtime: NaiveDateTime,
    ) -> Result<WakePrediction, WakeError> {
        let windows = self.store.wake_windows()?;
        let window = windows
            .iter()
            .find(|w| {
                let (_, hard_wake) = WakePredictor::wake_bounds(w, estimated_bedtime);
                w.applies_on(hard_wake.date())
            })
            .ok_or_else(|| {
                WakeError::WindowNotFound(format!(
                    "no enabled wake window after bedtime {estimated_bedtime}"
                ))
            })?;
        self.predict(window, estimated_bedtime)
    }

    /// Alarm plan for a prediction under the user's confidence threshold
    pub fn schedule(&self, prediction: &WakePrediction) -> Result<ScheduledWake, WakeError> {
        let settings = self.store.settings()?;
        Ok(select_wake_time(prediction, settings.confidence_threshold))
    }

    pub fn create_feedback_entry(
        &self,
        prediction: &WakePrediction,
        actual_wake_time: NaiveDateTime,
        used_prediction: bool,
    ) -> FeedbackRating {
        FeedbackLoop::create_entry(prediction, actual_wake_time, used_prediction)
    }

    /// Finalize and persist a rating
    pub fn submit_rating(
        &mut self,
        entry: FeedbackRating,
        immediate_feeling: u8,
        alertness_after_30_min: Option<u8>,
    ) -> Result<FeedbackRating, WakeError> {
        FeedbackLoop::submit_rating(
            &mut self.store,
            entry,
            immediate_feeling,
            alertness_after_30_min,
        )
    }

    pub fn feedback_stats(&self) -> Result<FeedbackStats, WakeError> {
        Ok(FeedbackLoop::stats(&self.store.ratings()?))
    }

    pub fn insights(&self) -> Result<Vec<String>, WakeError> {
        Ok(FeedbackLoop::insights(&self.store.ratings()?))
    }

    pub fn algorithm_adjustments(&self) -> Result<AlgorithmAdjustments, WakeError> {
        Ok(FeedbackLoop::algorithm_adjustments(&self.store.ratings()?))
    }

    pub fn feedback_report(&self) -> Result<FeedbackReport, WakeError> {
        Ok(FeedbackLoop::report(&self.store.ratings()?))
    }
}
