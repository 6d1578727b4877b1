//! Feedback loop
//!
//! Collects the user's rating of each wake-up and turns the rating log into:
//! - Aggregate statistics (average feeling, accuracy, trend)
//! - Plain-language insights
//! - A confidence multiplier the predictor can apply

use crate::error::WakeError;
use crate::store::SleepStore;
use crate::types::{AlgorithmAdjustments, FeedbackRating, FeedbackStats, WakePrediction};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Number of most recent ratings used for adjustments
pub const FEEDBACK_WINDOW: usize = 14;

/// Ratings required before insights go beyond a data-volume prompt
pub const MIN_RATINGS_FOR_INSIGHTS: usize = 7;

/// Ratings required before a trend is reported
pub const MIN_RATINGS_FOR_TREND: usize = 6;

/// Placeholder feeling until the user submits a rating
pub const NEUTRAL_FEELING: u8 = 3;

const RATING_MIN: u8 = 1;
const RATING_MAX: u8 = 5;

/// Feeling at or above this counts as a good wake-up
const GOOD_FEELING: f64 = 4.0;
const POOR_FEELING: f64 = 2.5;
const HIGH_ACCURACY: u8 = 70;
const LOW_ACCURACY: u8 = 50;
const TREND_SIGNIFICANCE: i32 = 10;
const TREND_SCALE: f64 = 20.0;

/// Mean feeling gap between predicted and fallback wake-ups that triggers an adjustment
const ADJUSTMENT_MARGIN: f64 = 0.5;
const DAMPEN_MULTIPLIER: f64 = 0.8;
const BOOST_MULTIPLIER: f64 = 1.1;

/// Everything the feedback screen shows, computed from one rating log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackReport {
    pub stats: FeedbackStats,
    pub insights: Vec<String>,
    pub adjustments: AlgorithmAdjustments,
}

/// Feedback loop over a rating log
pub struct FeedbackLoop;

impl FeedbackLoop {
    /// Start a rating entry for a wake-up, with a neutral placeholder feeling
    pub fn create_entry(
        prediction: &WakePrediction,
        actual_wake_time: NaiveDateTime,
        used_prediction: bool,
    ) -> FeedbackRating {
        FeedbackRating {
            id: Uuid::new_v4(),
            date: actual_wake_time.date(),
            actual_wake_time,
            predicted_wake_time: prediction.predicted_wake_time,
            confidence: prediction.confidence,
            immediate_feeling: NEUTRAL_FEELING,
            alertness_after_30_min: None,
            used_prediction,
        }
    }

    /// Finalize an entry with the user's ratings and persist it
    pub fn submit_rating<S: SleepStore + ?Sized>(
        store: &mut S,
        entry: FeedbackRating,
        immediate_feeling: u8,
        alertness_after_30_min: Option<u8>,
    ) -> Result<FeedbackRating, WakeError> {
        validate_rating("immediate_feeling", immediate_feeling)?;
        if let Some(alertness) = alertness_after_30_min {
            validate_rating("alertness_after_30_min", alertness)?;
        }

        let rating = FeedbackRating {
            immediate_feeling,
            alertness_after_30_min,
            ..entry
        };
        store.append_rating(rating.clone())?;

        debug!(
            id = %rating.id,
            date = %rating.date,
            feeling = rating.immediate_feeling,
            used_prediction = rating.used_prediction,
            "Rating submitted"
        );
        Ok(rating)
    }

    /// Aggregate statistics over a rating log
    pub fn stats(ratings: &[FeedbackRating]) -> FeedbackStats {
        let average_feeling = mean(ratings.iter().map(|r| f64::from(r.immediate_feeling)))
            .map(round_one_decimal)
            .unwrap_or(0.0);
        let average_alertness =
            mean(ratings.iter().filter_map(|r| r.alertness_after_30_min).map(f64::from))
                .map(round_one_decimal);

        FeedbackStats {
            total_ratings: ratings.len(),
            average_feeling,
            average_alertness,
            prediction_accuracy: prediction_accuracy(ratings),
            improvement_trend: improvement_trend(ratings),
        }
    }

    /// Plain-language observations; never empty
    pub fn insights(ratings: &[FeedbackRating]) -> Vec<String> {
        if ratings.len() < MIN_RATINGS_FOR_INSIGHTS {
            let remaining = MIN_RATINGS_FOR_INSIGHTS - ratings.len();
            return vec![format!(
                "Rate {} more wake-up{} to unlock personalized insights.",
                remaining,
                if remaining == 1 { "" } else { "s" }
            )];
        }

        let stats = Self::stats(ratings);
        let mut insights = Vec::new();

        if stats.average_feeling >= GOOD_FEELING {
            insights.push(format!(
                "You usually wake up feeling good ({:.1}/5 on average).",
                stats.average_feeling
            ));
        } else if stats.average_feeling <= POOR_FEELING {
            insights.push(format!(
                "Wake-ups have felt rough ({:.1}/5 on average). A wider wake window \
                 or a more regular bedtime may help.",
                stats.average_feeling
            ));
        }

        if stats.prediction_accuracy >= HIGH_ACCURACY {
            insights.push(format!(
                "Smart wake times felt good {}% of the time.",
                stats.prediction_accuracy
            ));
        } else if stats.prediction_accuracy > 0 && stats.prediction_accuracy < LOW_ACCURACY {
            insights.push(format!(
                "Smart wake times only felt good {}% of the time. Predictions will \
                 be more cautious until they improve.",
                stats.prediction_accuracy
            ));
        }

        if stats.improvement_trend > TREND_SIGNIFICANCE {
            insights.push("Your wake-ups are getting better over time.".to_string());
        } else if stats.improvement_trend < -TREND_SIGNIFICANCE {
            insights.push("Your wake-ups have felt worse recently than before.".to_string());
        }

        if let Some(alertness) = stats.average_alertness {
            if alertness >= GOOD_FEELING {
                insights.push(format!(
                    "You stay alert after waking ({alertness:.1}/5 half an hour later)."
                ));
            } else if alertness <= POOR_FEELING {
                insights.push(format!(
                    "Grogginess tends to linger ({alertness:.1}/5 half an hour later)."
                ));
            }
        }

        if insights.is_empty() {
            insights.push(
                "Your wake-up quality is steady. Keep rating to fine-tune predictions.".to_string(),
            );
        }

        insights
    }

    /// Confidence multiplier from recent predicted vs fallback wake-ups
    pub fn algorithm_adjustments(ratings: &[FeedbackRating]) -> AlgorithmAdjustments {
        if ratings.len() < FEEDBACK_WINDOW {
            return AlgorithmAdjustments::default();
        }

        let recent = recent_ratings(ratings, FEEDBACK_WINDOW);
        let used = mean(
            recent
                .iter()
                .filter(|r| r.used_prediction)
                .map(|r| f64::from(r.immediate_feeling)),
        );
        let fallback = mean(
            recent
                .iter()
                .filter(|r| !r.used_prediction)
                .map(|r| f64::from(r.immediate_feeling)),
        );

        let confidence_multiplier = match (used, fallback) {
            (Some(used), Some(fallback)) if used < fallback - ADJUSTMENT_MARGIN => {
                DAMPEN_MULTIPLIER
            }
            (Some(used), Some(fallback)) if used > fallback + ADJUSTMENT_MARGIN => {
                BOOST_MULTIPLIER
            }
            _ => 1.0,
        };

        debug!(
            used_mean = ?used,
            fallback_mean = ?fallback,
            confidence_multiplier,
            "Feedback adjustments computed"
        );

        AlgorithmAdjustments {
            confidence_multiplier,
            prefer_earlier_wake: false,
        }
    }

    /// Stats, insights and adjustments in one pass
    pub fn report(ratings: &[FeedbackRating]) -> FeedbackReport {
        FeedbackReport {
            stats: Self::stats(ratings),
            insights: Self::insights(ratings),
            adjustments: Self::algorithm_adjustments(ratings),
        }
    }
}

/// The `n` most recent ratings, oldest first
pub(crate) fn recent_ratings(ratings: &[FeedbackRating], n: usize) -> Vec<&FeedbackRating> {
    let mut sorted: Vec<&FeedbackRating> = ratings.iter().collect();
    sorted.sort_by_key(|r| r.actual_wake_time);
    let skip = sorted.len().saturating_sub(n);
    sorted.split_off(skip)
}

fn validate_rating(field: &str, value: u8) -> Result<(), WakeError> {
    if (RATING_MIN..=RATING_MAX).contains(&value) {
        return Ok(());
    }
    warn!(field, value, "Rejected out-of-range rating");
    Err(WakeError::InvalidRating(format!(
        "{field} must be between {RATING_MIN} and {RATING_MAX}, got {value}"
    )))
}

fn prediction_accuracy(ratings: &[FeedbackRating]) -> u8 {
    let used: Vec<&FeedbackRating> = ratings.iter().filter(|r| r.used_prediction).collect();
    if used.is_empty() {
        return 0;
    }
    let good = used
        .iter()
        .filter(|r| f64::from(r.immediate_feeling) >= GOOD_FEELING)
        .count();
    ((good as f64 / used.len() as f64) * 100.0).round() as u8
}

fn improvement_trend(ratings: &[FeedbackRating]) -> i32 {
    if ratings.len() < MIN_RATINGS_FOR_TREND {
        return 0;
    }

    let sorted = recent_ratings(ratings, ratings.len());
    let (first, second) = sorted.split_at(sorted.len() / 2);
    let first_mean = mean(first.iter().map(|r| f64::from(r.immediate_feeling))).unwrap_or(0.0);
    let second_mean = mean(second.iter().map(|r| f64::from(r.immediate_feeling))).unwrap_or(0.0);

    ((second_mean - first_mean) * TREND_SCALE).round() as i32
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
