//! Error types for Synheart Wake
//!
//! The analysis algorithms never fail; insufficient data degrades to a
//! low-confidence result instead. Errors only arise at the edges: parsing
//! snapshots, validating user input, and talking to the store.

use thiserror::Error;

/// Errors that can occur around the wake engine
#[derive(Debug, Error)]
pub enum WakeError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Date parse error: {0}")]
    DateParseError(String),

    #[error("Invalid rating: {0}")]
    InvalidRating(String),

    #[error("Invalid wake window: {0}")]
    InvalidWakeWindow(String),

    #[error("Duplicate rating: {0}")]
    DuplicateRating(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Wake window not found: {0}")]
    WindowNotFound(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}
