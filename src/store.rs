//! History storage
//!
//! The engine reads everything it needs through the `SleepStore` trait, so the
//! host app can back it with its own database. `HistoryStore` is the bundled
//! in-memory implementation; its JSON snapshot is also the history format the
//! CLI and FFI exchange.
//!
//! Natural keys make every write idempotent:
//! - sessions by `date` (upsert)
//! - ratings by `id` (ratings are immutable; a repeated id is rejected)
//! - wake windows by `id` (upsert)

use crate::config::{validate_retention_days, DEFAULT_RETENTION_DAYS};
use crate::error::WakeError;
use crate::types::{FeedbackRating, SleepSession, UserSettings, WakeWindow};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Storage collaborator the engine reads and writes through
pub trait SleepStore {
    /// All retained sessions, oldest first
    fn sessions(&self) -> Result<Vec<SleepSession>, WakeError>;

    /// Insert or replace the session for its date
    fn upsert_session(&mut self, session: SleepSession) -> Result<(), WakeError>;

    /// All retained ratings, oldest first
    fn ratings(&self) -> Result<Vec<FeedbackRating>, WakeError>;

    /// Append a rating; a rating with a known id is `DuplicateRating`
    fn append_rating(&mut self, rating: FeedbackRating) -> Result<(), WakeError>;

    fn wake_windows(&self) -> Result<Vec<WakeWindow>, WakeError>;

    /// Insert or replace a wake window by id
    fn save_wake_window(&mut self, window: WakeWindow) -> Result<(), WakeError>;

    /// Delete a wake window; returns whether it existed
    fn delete_wake_window(&mut self, id: Uuid) -> Result<bool, WakeError>;

    fn settings(&self) -> Result<UserSettings, WakeError>;

    fn save_settings(&mut self, settings: UserSettings) -> Result<(), WakeError>;

    /// Opaque wearable link tokens
    fn wearable_tokens(&self) -> Result<Option<serde_json::Value>, WakeError>;

    fn save_wearable_tokens(&mut self, tokens: Option<serde_json::Value>) -> Result<(), WakeError>;

    /// Change the rolling retention window (days) and prune to it
    fn set_retention_days(&mut self, retention_days: i64) -> Result<(), WakeError>;
}

/// In-memory history with rolling retention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStore {
    /// Sessions sorted by date
    #[serde(default)]
    sessions: Vec<SleepSession>,
    /// Ratings sorted by actual wake time
    #[serde(default)]
    ratings: Vec<FeedbackRating>,
    #[serde(default)]
    wake_windows: Vec<WakeWindow>,
    #[serde(default)]
    settings: UserSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wearable_tokens: Option<serde_json::Value>,
    /// Rolling retention (days), relative to the newest record
    #[serde(default = "default_retention_days")]
    retention_days: i64,
}

fn default_retention_days() -> i64 {
    DEFAULT_RETENTION_DAYS
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self {
            sessions: Vec::new(),
            ratings: Vec::new(),
            wake_windows: Vec::new(),
            settings: UserSettings::default(),
            wearable_tokens: None,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl HistoryStore {
    /// Create an empty store with the default 90-day retention
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with a specific retention window
    pub fn with_retention(retention_days: i64) -> Result<Self, WakeError> {
        Ok(Self {
            retention_days: validate_retention_days(retention_days)?,
            ..Self::default()
        })
    }

    pub fn retention_days(&self) -> i64 {
        self.retention_days
    }

    /// Load a store from a JSON snapshot, restoring ordering and retention
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut store: Self = serde_json::from_str(json)?;
        validate_retention_days(store.retention_days)
            .map_err(<serde_json::Error as serde::de::Error>::custom)?;
        store.sessions.sort_by_key(|s| s.date);
        store.sessions.dedup_by_key(|s| s.date);
        store.ratings.sort_by_key(|r| r.actual_wake_time);
        store.prune_sessions();
        store.prune_ratings();
        Ok(store)
    }

    /// Serialize the store to a JSON snapshot
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize the store to an indented JSON snapshot
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn cutoff(&self, newest: NaiveDate) -> NaiveDate {
        newest
            .checked_sub_signed(Duration::days(self.retention_days))
            .unwrap_or(NaiveDate::MIN)
    }

    fn prune_sessions(&mut self) {
        let Some(newest) = self.sessions.iter().map(|s| s.date).max() else {
            return;
        };
        let cutoff = self.cutoff(newest);
        let before = self.sessions.len();
        self.sessions.retain(|s| s.date > cutoff);
        if self.sessions.len() != before {
            debug!(
                dropped = before - self.sessions.len(),
                cutoff = %cutoff,
                "Pruned sessions past retention"
            );
        }
    }

    fn prune_ratings(&mut self) {
        let Some(newest) = self.ratings.iter().map(|r| r.date).max() else {
            return;
        };
        let cutoff = self.cutoff(newest);
        let before = self.ratings.len();
        self.ratings.retain(|r| r.date > cutoff);
        if self.ratings.len() != before {
            debug!(
                dropped = before - self.ratings.len(),
                cutoff = %cutoff,
                "Pruned ratings past retention"
            );
        }
    }
}

impl SleepStore for HistoryStore {
    fn sessions(&self) -> Result<Vec<SleepSession>, WakeError> {
        Ok(self.sessions.clone())
    }

    fn upsert_session(&mut self, session: SleepSession) -> Result<(), WakeError> {
        match self.sessions.binary_search_by_key(&session.date, |s| s.date) {
            Ok(index) => self.sessions[index] = session,
            Err(index) => self.sessions.insert(index, session),
        }
        self.prune_sessions();
        Ok(())
    }

    fn ratings(&self) -> Result<Vec<FeedbackRating>, WakeError> {
        Ok(self.ratings.clone())
    }

    fn append_rating(&mut self, rating: FeedbackRating) -> Result<(), WakeError> {
        if self.ratings.iter().any(|r| r.id == rating.id) {
            return Err(WakeError::DuplicateRating(rating.id.to_string()));
        }
        let index = self
            .ratings
            .partition_point(|r| r.actual_wake_time <= rating.actual_wake_time);
        self.ratings.insert(index, rating);
        self.prune_ratings();
        Ok(())
    }

    fn wake_windows(&self) -> Result<Vec<WakeWindow>, WakeError> {
        Ok(self.wake_windows.clone())
    }

    fn save_wake_window(&mut self, window: WakeWindow) -> Result<(), WakeError> {
        window.validate()?;
        match self.wake_windows.iter_mut().find(|w| w.id == window.id) {
            Some(existing) => *existing = window,
            None => self.wake_windows.push(window),
        }
        Ok(())
    }

    fn delete_wake_window(&mut self, id: Uuid) -> Result<bool, WakeError> {
        let before = self.wake_windows.len();
        self.wake_windows.retain(|w| w.id != id);
        Ok(self.wake_windows.len() != before)
    }

    fn settings(&self) -> Result<UserSettings, WakeError> {
        Ok(self.settings.clone())
    }

    fn save_settings(&mut self, settings: UserSettings) -> Result<(), WakeError> {
        self.settings = settings;
        Ok(())
    }

    fn wearable_tokens(&self) -> Result<Option<serde_json::Value>, WakeError> {
        Ok(self.wearable_tokens.clone())
    }

    fn save_wearable_tokens(&mut self, tokens: Option<serde_json::Value>) -> Result<(), WakeError> {
        self.wearable_tokens = tokens;
        Ok(())
    }

    fn set_retention_days(&mut self, retention_days: i64) -> Result<(), WakeError> {
        self.retention_days = validate_retention_days(retention_days)?;
        self.prune_sessions();
        self.prune_ratings();
        Ok(())
    }
}
