//! Synheart Wake - On-device sleep pattern analysis and smart-alarm wake prediction
//!
//! Wake turns a history of sleep sessions into a model of the user's sleep
//! cycles and picks the best moment to wake them inside an alarm window:
//! session history → pattern analysis → wake prediction → alarm plan, with a
//! feedback loop that learns from how each wake-up felt.
//!
//! ## Modules
//!
//! - **Pattern Analyzer**: cycle length, light-sleep windows, consistency
//! - **Predictor**: best wake time, calibrated confidence, reasoning
//! - **Feedback Loop**: rating statistics, insights, confidence adjustment
//! - **Engine**: storage-backed orchestration plus stateless JSON entry points

pub mod analyzer;
pub mod config;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod predictor;
pub mod schedule;
pub mod store;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use analyzer::PatternAnalyzer;
pub use config::EngineConfig;
pub use engine::{
    analyze_history_json, feedback_report_json, parse_local_datetime, predict_from_history_json,
    WakeEngine,
};
pub use error::WakeError;
pub use feedback::{FeedbackLoop, FeedbackReport};
pub use predictor::{PredictionInput, WakePredictor};
pub use schedule::{select_wake_time, ScheduledWake};
pub use store::{HistoryStore, SleepStore};
pub use types::{
    AlgorithmAdjustments, FeedbackRating, FeedbackStats, SleepPattern, SleepSession, SleepStage,
    SleepStageType, TimeWindow, UserSettings, WakePrediction, WakeWindow,
};

/// Wake library version
pub const WAKE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "synheart-wake";
