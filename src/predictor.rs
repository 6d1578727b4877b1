//! Wake time prediction
//!
//! This module picks the best moment to wake the user inside a wake window:
//! 1. Resolve the window into concrete earliest / deadline instants
//! 2. Score every 5-minute candidate by its most likely sleep stage
//! 3. Calibrate a 0-95 confidence from history size, consistency, bedtime
//!    deviation, recent feedback and the feedback multiplier
//! 4. Explain the choice with rule-based reasoning
//!
//! Prediction is a pure function of its inputs. Without a sleep pattern it
//! degrades to the hard deadline with zero confidence.

use crate::analyzer::{night_minutes, PatternAnalyzer, MIN_DATA_DAYS};
use crate::config::EngineConfig;
use crate::feedback::{recent_ratings, FEEDBACK_WINDOW};
use crate::schedule::select_wake_time;
use crate::types::{
    minutes_between, AlgorithmAdjustments, FeedbackRating, SleepPattern, SleepStageType,
    UserSettings, WakePrediction, WakeWindow,
};
use chrono::{Duration, NaiveDateTime, Timelike};
use tracing::{debug, warn};

/// Confidence never reaches 100
pub const MAX_CONFIDENCE: u8 = 95;

/// Spacing between candidate wake times (minutes)
pub const CANDIDATE_STEP_MINUTES: i64 = 5;

/// Bedtimes at or after this hour wake up the next day
const EVENING_HOUR: u32 = 18;

const EARLINESS_BONUS: f64 = 10.0;
const SCORE_TO_CONFIDENCE: f64 = 0.8;

const DATA_BONUS_PER_NIGHT: f64 = 2.0;
const MAX_DATA_BONUS: f64 = 20.0;
const MAX_CONSISTENCY_BONUS: f64 = 15.0;
const BEDTIME_TOLERANCE_MINUTES: f64 = 60.0;
const MAX_BEDTIME_PENALTY: f64 = 30.0;
const FEEDBACK_BONUS: f64 = 10.0;

const LOW_CONFIDENCE: u8 = 30;
const HIGH_CONFIDENCE: u8 = 70;

/// Everything a single prediction depends on
#[derive(Debug, Clone)]
pub struct PredictionInput<'a> {
    /// Derived pattern, absent when history is too short
    pub pattern: Option<&'a SleepPattern>,
    pub wake_window: &'a WakeWindow,
    /// Tonight's estimated bedtime
    pub estimated_bedtime: NaiveDateTime,
    pub settings: &'a UserSettings,
    /// Rating history; only the most recent ratings are used
    pub recent_feedback: &'a [FeedbackRating],
    /// Feedback multiplier, applied after the regular adjustments when present
    pub adjustments: Option<&'a AlgorithmAdjustments>,
    pub config: &'a EngineConfig,
}

/// Best candidate found by the window search
struct Candidate {
    time: NaiveDateTime,
    stage: SleepStageType,
    score: f64,
}

/// Wake predictor
pub struct WakePredictor;

impl WakePredictor {
    /// Generate a wake prediction
    pub fn generate(input: &PredictionInput<'_>) -> WakePrediction {
        let (earliest, hard_wake) = Self::wake_bounds(input.wake_window, input.estimated_bedtime);

        let Some(pattern) = input.pattern else {
            warn!(deadline = %hard_wake, "No sleep pattern available, using deadline");
            return WakePrediction {
                predicted_wake_time: hard_wake,
                confidence: 0,
                reasoning: format!(
                    "Not enough sleep history yet to find your light-sleep windows. \
                     Your alarm will ring at {}.",
                    hard_wake.format("%H:%M")
                ),
                fallback_time: hard_wake,
                predicted_stage: SleepStageType::Light,
            };
        };

        let best = search_window(pattern, input, earliest, hard_wake);
        let base_confidence = (best.score * SCORE_TO_CONFIDENCE)
            .round()
            .min(f64::from(MAX_CONFIDENCE));
        let confidence = adjust_confidence(base_confidence, pattern, input);

        debug!(
            candidate = %best.time,
            stage = best.stage.as_str(),
            score = best.score,
            base_confidence,
            confidence,
            "Wake candidate selected"
        );

        let mut prediction = WakePrediction {
            predicted_wake_time: best.time,
            confidence,
            reasoning: String::new(),
            fallback_time: hard_wake,
            predicted_stage: best.stage,
        };
        prediction.reasoning = reasoning(&prediction, pattern, input.settings);
        prediction
    }

    /// Resolve a wake window into `(earliest, deadline)` for a bedtime.
    ///
    /// Evening bedtimes (18:00 or later) wake up the following day. An
    /// explicit earliest time is placed on the deadline's day, or the day
    /// before when it would otherwise land after the deadline. The earliest
    /// instant never precedes the bedtime.
    pub fn wake_bounds(
        window: &WakeWindow,
        bedtime: NaiveDateTime,
    ) -> (NaiveDateTime, NaiveDateTime) {
        let mut hard_wake = bedtime.date().and_time(window.hard_wake_time);
        if bedtime.hour() >= EVENING_HOUR {
            hard_wake += Duration::days(1);
        }

        let earliest = match window.earliest_wake_time {
            Some(time) => {
                let earliest = hard_wake.date().and_time(time);
                if earliest > hard_wake {
                    earliest - Duration::days(1)
                } else {
                    earliest
                }
            }
            None => hard_wake - Duration::minutes(i64::from(window.window_duration_minutes)),
        };

        (earliest.max(bedtime).min(hard_wake), hard_wake)
    }
}

/// Stage desirability weight for a wake-up
fn stage_weight(stage: SleepStageType) -> f64 {
    match stage {
        SleepStageType::Light => 100.0,
        SleepStageType::Rem => 70.0,
        SleepStageType::Awake => 60.0,
        SleepStageType::Deep => 20.0,
    }
}

/// Scan the window in 5-minute steps; the earliest candidate wins ties
fn search_window(
    pattern: &SleepPattern,
    input: &PredictionInput<'_>,
    earliest: NaiveDateTime,
    hard_wake: NaiveDateTime,
) -> Candidate {
    let window_minutes = f64::from(input.wake_window.window_duration_minutes);
    let mut best = Candidate {
        time: hard_wake,
        stage: SleepStageType::Light,
        score: 0.0,
    };
    let mut best_score = f64::NEG_INFINITY;

    let mut candidate = earliest;
    while candidate <= hard_wake {
        let offset = minutes_between(input.estimated_bedtime, candidate);
        let (stage, probability) = PatternAnalyzer::most_likely_stage(offset, pattern);

        let from_earliest = minutes_between(earliest, candidate);
        let earliness = if window_minutes > 0.0 {
            ((window_minutes - from_earliest) / window_minutes) * EARLINESS_BONUS
        } else {
            0.0
        };
        let score = probability * stage_weight(stage) + earliness;

        if score > best_score {
            best_score = score;
            best = Candidate {
                time: candidate,
                stage,
                score,
            };
        }

        candidate += Duration::minutes(CANDIDATE_STEP_MINUTES);
    }

    best
}

/// Apply history, consistency, bedtime and feedback adjustments, then the
/// optional feedback multiplier; clamped to 0-95 after each stage.
fn adjust_confidence(base: f64, pattern: &SleepPattern, input: &PredictionInput<'_>) -> u8 {
    let mut confidence = base;

    confidence += ((pattern.data_points as f64 - MIN_DATA_DAYS as f64) * DATA_BONUS_PER_NIGHT)
        .min(MAX_DATA_BONUS);
    confidence += f64::from(pattern.consistency_score) / 100.0 * MAX_CONSISTENCY_BONUS;

    let deviation = (night_minutes(input.estimated_bedtime.time())
        - night_minutes(input.config.typical_bedtime))
    .abs();
    if deviation > BEDTIME_TOLERANCE_MINUTES {
        confidence -= ((deviation - BEDTIME_TOLERANCE_MINUTES) / 2.0).min(MAX_BEDTIME_PENALTY);
    }

    let recent = recent_ratings(input.recent_feedback, FEEDBACK_WINDOW);
    if !recent.is_empty() {
        let mean_feeling = recent
            .iter()
            .map(|r| f64::from(r.immediate_feeling))
            .sum::<f64>()
            / recent.len() as f64;
        if mean_feeling >= 4.0 {
            confidence += FEEDBACK_BONUS;
        } else if mean_feeling <= 2.0 {
            confidence -= FEEDBACK_BONUS;
        }
    }

    let mut confidence = clamp_confidence(confidence);

    if let Some(adjustments) = input.adjustments {
        confidence = clamp_confidence(confidence * adjustments.confidence_multiplier);
    }

    confidence as u8
}

fn clamp_confidence(value: f64) -> f64 {
    value.clamp(0.0, f64::from(MAX_CONFIDENCE)).round()
}

/// Rule-based explanation of a prediction
fn reasoning(
    prediction: &WakePrediction,
    pattern: &SleepPattern,
    settings: &UserSettings,
) -> String {
    let wake = prediction.predicted_wake_time.format("%H:%M");
    let deadline = prediction.fallback_time.format("%H:%M");

    if prediction.confidence < LOW_CONFIDENCE {
        return format!(
            "Limited sleep data so far ({} nights), so {} is based on typical \
             {}-minute sleep cycles. Predictions sharpen as more nights are recorded.",
            pattern.data_points, wake, pattern.average_cycle_length
        );
    }

    if prediction.predicted_wake_time == prediction.fallback_time {
        return format!(
            "Your {deadline} deadline already lines up with your sleep pattern, \
             so there is no better moment to wake you earlier."
        );
    }

    let buffer = minutes_between(prediction.predicted_wake_time, prediction.fallback_time).round();
    let stage = prediction.predicted_stage.describe();

    let mut text = if prediction.confidence >= HIGH_CONFIDENCE {
        format!(
            "You are very likely to be in {stage} at {wake}, {buffer} minutes before \
             your {deadline} deadline. Waking then should feel easier."
        )
    } else {
        format!(
            "You will probably be in {stage} around {wake}, {buffer} minutes before \
             your {deadline} deadline."
        )
    };

    if !select_wake_time(prediction, settings.confidence_threshold).uses_prediction {
        text.push_str(&format!(
            " Confidence is below your {}% threshold, so the {} alarm will be used.",
            settings.confidence_threshold, deadline
        ));
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeWindow;
    use chrono::{NaiveDate, NaiveTime};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn window(hour: u32, minute: u32, duration: u32) -> WakeWindow {
        WakeWindow::new(NaiveTime::from_hms_opt(hour, minute, 0).unwrap(), duration)
    }

    fn pattern(data_points: usize, consistency: u8, windows: Vec<TimeWindow>) -> SleepPattern {
        SleepPattern {
            average_sleep_duration: 450,
            average_cycle_length: 90,
            typical_light_sleep_windows: windows,
            consistency_score: consistency,
            data_points,
        }
    }

    fn rating(day: u32, feeling: u8, used_prediction: bool) -> FeedbackRating {
        FeedbackRating {
            id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            actual_wake_time: at(day, 6, 45),
            predicted_wake_time: at(day, 6, 45),
            confidence: 70,
            immediate_feeling: feeling,
            alertness_after_30_min: None,
            used_prediction,
        }
    }

    struct Fixture {
        settings: UserSettings,
        config: EngineConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                settings: UserSettings::default(),
                config: EngineConfig::default(),
            }
        }

        fn input<'a>(
            &'a self,
            pattern: Option<&'a SleepPattern>,
            wake_window: &'a WakeWindow,
            bedtime: NaiveDateTime,
        ) -> PredictionInput<'a> {
            PredictionInput {
                pattern,
                wake_window,
                estimated_bedtime: bedtime,
                settings: &self.settings,
                recent_feedback: &[],
                adjustments: None,
                config: &self.config,
            }
        }
    }

    #[test]
    fn test_no_pattern_falls_back_to_deadline() {
        let fx = Fixture::new();
        let w = window(7, 0, 30);
        let prediction = WakePredictor::generate(&fx.input(None, &w, at(15, 23, 0)));

        assert_eq!(prediction.confidence, 0);
        assert_eq!(prediction.predicted_wake_time, at(16, 7, 0));
        assert_eq!(prediction.fallback_time, at(16, 7, 0));
        assert_eq!(prediction.predicted_stage, SleepStageType::Light);
        assert!(prediction.reasoning.contains("07:00"));
    }

    #[test]
    fn test_wake_bounds_roll_over_for_evening_bedtime() {
        let w = window(7, 0, 30);
        assert_eq!(
            WakePredictor::wake_bounds(&w, at(15, 23, 0)),
            (at(16, 6, 30), at(16, 7, 0))
        );
        assert_eq!(
            WakePredictor::wake_bounds(&w, at(15, 18, 0)),
            (at(16, 6, 30), at(16, 7, 0))
        );
        // After midnight the deadline is the same calendar day
        assert_eq!(
            WakePredictor::wake_bounds(&w, at(16, 1, 0)),
            (at(16, 6, 30), at(16, 7, 0))
        );
    }

    #[test]
    fn test_wake_bounds_explicit_earliest() {
        let mut w = window(7, 0, 30);
        w.earliest_wake_time = NaiveTime::from_hms_opt(6, 15, 0);
        assert_eq!(
            WakePredictor::wake_bounds(&w, at(15, 23, 0)),
            (at(16, 6, 15), at(16, 7, 0))
        );

        let mut w = window(0, 10, 30);
        w.earliest_wake_time = NaiveTime::from_hms_opt(23, 50, 0);
        assert_eq!(
            WakePredictor::wake_bounds(&w, at(15, 19, 0)),
            (at(15, 23, 50), at(16, 0, 10))
        );
    }

    #[test]
    fn test_wake_bounds_never_precede_bedtime() {
        // Earliest later than the deadline rolls back a day, behind bedtime
        let mut w = window(7, 0, 30);
        w.earliest_wake_time = NaiveTime::from_hms_opt(7, 30, 0);
        assert_eq!(
            WakePredictor::wake_bounds(&w, at(15, 23, 0)),
            (at(15, 23, 0), at(16, 7, 0))
        );

        let fx = Fixture::new();
        let p = pattern(10, 50, vec![]);
        let prediction = WakePredictor::generate(&fx.input(Some(&p), &w, at(15, 23, 0)));
        assert!(prediction.predicted_wake_time >= at(15, 23, 0));
        assert!(prediction.predicted_wake_time <= at(16, 7, 0));

        // A short window cut by a late bedtime starts at the bedtime
        let w = window(6, 0, 60);
        assert_eq!(
            WakePredictor::wake_bounds(&w, at(16, 5, 30)),
            (at(16, 5, 30), at(16, 6, 0))
        );
    }

    #[test]
    fn test_cycle_model_confidence() {
        // Bedtime 23:00, window 06:30-07:00 → offsets 450..480 with a
        // 90-minute cycle: 06:30 is light (0.6) with full earliness bonus.
        let fx = Fixture::new();
        let w = window(7, 0, 30);
        let p = pattern(7, 0, vec![]);
        let prediction = WakePredictor::generate(&fx.input(Some(&p), &w, at(15, 23, 0)));

        assert_eq!(prediction.predicted_wake_time, at(16, 6, 30));
        assert_eq!(prediction.predicted_stage, SleepStageType::Light);
        // round(70 * 0.8) = 56, no adjustments
        assert_eq!(prediction.confidence, 56);
        assert!(prediction.reasoning.contains("30 minutes before"));
        assert!(prediction.reasoning.contains("threshold"));
    }

    #[test]
    fn test_light_window_beats_cycle_model() {
        let fx = Fixture::new();
        let w = window(7, 0, 30);
        let p = pattern(
            14,
            80,
            vec![TimeWindow {
                start_minutes_from_sleep: 460,
                end_minutes_from_sleep: 480,
                probability: 0.9,
            }],
        );
        let prediction = WakePredictor::generate(&fx.input(Some(&p), &w, at(15, 23, 0)));

        // 06:40: 0.9 * 100 + (20/30) * 10 = 96.7 beats 06:30's 70
        assert_eq!(prediction.predicted_wake_time, at(16, 6, 40));
        // round(96.7 * 0.8) = 77, +14 history, +12 consistency → clamped
        assert_eq!(prediction.confidence, 95);
        assert!(prediction.reasoning.contains("very likely"));
        assert!(prediction.reasoning.contains("20 minutes before"));
    }

    #[test]
    fn test_deadline_alignment_reasoning() {
        let fx = Fixture::new();
        let w = window(7, 0, 30);
        let p = pattern(
            10,
            50,
            vec![TimeWindow {
                start_minutes_from_sleep: 480,
                end_minutes_from_sleep: 485,
                probability: 1.0,
            }],
        );
        let prediction = WakePredictor::generate(&fx.input(Some(&p), &w, at(15, 23, 0)));

        assert_eq!(prediction.predicted_wake_time, prediction.fallback_time);
        assert!(prediction.reasoning.contains("already lines up"));
    }

    #[test]
    fn test_bedtime_deviation_and_tie_break() {
        // Bedtime 01:00: offsets 330..360. 06:30 (light 0.5 + 10) and 07:00
        // (light 0.6 + 0) tie at 60; the earlier candidate wins.
        let fx = Fixture::new();
        let w = window(7, 0, 30);
        let p = pattern(7, 0, vec![]);
        let prediction = WakePredictor::generate(&fx.input(Some(&p), &w, at(16, 1, 0)));

        assert_eq!(prediction.predicted_wake_time, at(16, 6, 30));
        // round(60 * 0.8) = 48, deviation 120 → -30
        assert_eq!(prediction.confidence, 18);
        assert!(prediction.reasoning.contains("Limited sleep data"));
    }

    #[test]
    fn test_feedback_bonus_uses_recent_ratings() {
        let fx = Fixture::new();
        let w = window(7, 0, 30);
        let p = pattern(7, 0, vec![]);

        // Old bad ratings fall outside the 14 most recent
        let mut ratings: Vec<FeedbackRating> = (1..=5).map(|d| rating(d, 1, true)).collect();
        ratings.extend((6..=19).map(|d| rating(d, 5, true)));

        let mut input = fx.input(Some(&p), &w, at(20, 23, 0));
        input.recent_feedback = &ratings;
        assert_eq!(WakePredictor::generate(&input).confidence, 66);

        let bad: Vec<FeedbackRating> = (1..=3).map(|d| rating(d, 2, false)).collect();
        input.recent_feedback = &bad;
        assert_eq!(WakePredictor::generate(&input).confidence, 46);
    }

    #[test]
    fn test_feedback_multiplier_applied_and_clamped() {
        // Extension point: the multiplier scales the adjusted confidence
        let fx = Fixture::new();
        let w = window(7, 0, 30);
        let p = pattern(7, 0, vec![]);

        let damp = AlgorithmAdjustments {
            confidence_multiplier: 0.8,
            prefer_earlier_wake: false,
        };
        let mut input = fx.input(Some(&p), &w, at(15, 23, 0));
        input.adjustments = Some(&damp);
        // 56 * 0.8 = 44.8
        assert_eq!(WakePredictor::generate(&input).confidence, 45);

        let boost = AlgorithmAdjustments {
            confidence_multiplier: 1.1,
            prefer_earlier_wake: false,
        };
        let rich = pattern(30, 100, vec![]);
        let mut input = fx.input(Some(&rich), &w, at(15, 23, 0));
        input.adjustments = Some(&boost);
        assert_eq!(WakePredictor::generate(&input).confidence, MAX_CONFIDENCE);
    }

    #[test]
    fn test_prediction_stays_within_bounds() {
        let fx = Fixture::new();
        let patterns = [
            pattern(7, 0, vec![]),
            pattern(40, 100, vec![]),
            pattern(
                12,
                60,
                vec![TimeWindow {
                    start_minutes_from_sleep: 300,
                    end_minutes_from_sleep: 345,
                    probability: 0.7,
                }],
            ),
        ];
        let mut windows = vec![
            window(6, 0, 15),
            window(7, 0, 30),
            window(8, 30, 45),
            window(5, 45, 60),
        ];
        for (hard, earliest) in [((7, 0), (6, 20)), ((5, 10), (4, 15)), ((6, 30), (6, 30))] {
            let mut w = window(hard.0, hard.1, 30);
            w.earliest_wake_time = NaiveTime::from_hms_opt(earliest.0, earliest.1, 0);
            assert!(w.validate().is_ok());
            windows.push(w);
        }
        let bedtimes = [at(15, 21, 30), at(15, 23, 0), at(16, 0, 45), at(16, 2, 30)];

        for p in &patterns {
            for w in &windows {
                for bedtime in bedtimes {
                    let prediction = WakePredictor::generate(&fx.input(Some(p), w, bedtime));
                    let (earliest, hard) = WakePredictor::wake_bounds(w, bedtime);
                    assert!(earliest >= bedtime);
                    assert!(hard - earliest <= Duration::minutes(60));
                    assert!(prediction.confidence <= MAX_CONFIDENCE);
                    assert!(prediction.predicted_wake_time >= earliest);
                    assert!(prediction.predicted_wake_time <= hard);
                    assert_eq!(prediction.fallback_time, hard);
                }
            }
        }
    }

    #[test]
    fn test_prediction_is_deterministic() {
        let fx = Fixture::new();
        let w = window(6, 45, 45);
        let p = pattern(
            20,
            72,
            vec![TimeWindow {
                start_minutes_from_sleep: 420,
                end_minutes_from_sleep: 450,
                probability: 0.65,
            }],
        );
        let ratings: Vec<FeedbackRating> = (1..=9).map(|d| rating(d, 4, d % 2 == 0)).collect();
        let mut input = fx.input(Some(&p), &w, at(15, 22, 40));
        input.recent_feedback = &ratings;

        let first = WakePredictor::generate(&input);
        let second = WakePredictor::generate(&input);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
