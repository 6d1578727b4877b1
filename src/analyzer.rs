//! Sleep pattern analysis
//!
//! This module turns a history of sleep sessions into a `SleepPattern`:
//! - Average sleep duration
//! - Cycle length (median of detected light → deep → light cycles)
//! - Light-sleep probability windows from a 15-minute histogram
//! - Consistency of bedtime, wake time and duration
//!
//! It also provides the stage estimator the predictor queries for each
//! candidate wake time.

use crate::types::{minutes_between, SleepPattern, SleepSession, SleepStageType, TimeWindow};
use chrono::{NaiveTime, Timelike};
use tracing::debug;

/// Minimum number of sessions before a pattern is produced
pub const MIN_DATA_DAYS: usize = 7;

/// Cycle length used when no plausible cycle is detected (minutes)
pub const DEFAULT_CYCLE_MINUTES: u32 = 90;

/// Histogram bucket width (minutes)
pub const BUCKET_MINUTES: u32 = 15;

/// Histogram span from sleep onset (minutes)
pub const HISTOGRAM_SPAN_MINUTES: u32 = 600;

/// Bucket light-sleep probability that opens or extends a window
pub const LIGHT_WINDOW_THRESHOLD: f64 = 0.4;

const MIN_CYCLE_MINUTES: f64 = 60.0;
const MAX_CYCLE_MINUTES: f64 = 120.0;
const MIN_STAGES_FOR_CYCLES: usize = 4;

/// Probability given to a window still open at the end of the histogram
const OPEN_WINDOW_PROBABILITY: f64 = 0.5;

const MIN_SESSIONS_FOR_CONSISTENCY: usize = 3;

/// Times of day before this are treated as belonging to the previous night
const NIGHT_BOUNDARY_MINUTES: u32 = 4 * 60;

/// A standard deviation of this many minutes costs half the sub-score
const SD_REFERENCE_MINUTES: f64 = 60.0;

/// Pattern analyzer for converting session history into a sleep pattern
pub struct PatternAnalyzer;

impl PatternAnalyzer {
    /// Analyze session history. Returns `None` below `MIN_DATA_DAYS` sessions.
    pub fn analyze(sessions: &[SleepSession]) -> Option<SleepPattern> {
        if sessions.len() < MIN_DATA_DAYS {
            debug!(
                sessions = sessions.len(),
                required = MIN_DATA_DAYS,
                "Not enough sessions for pattern analysis"
            );
            return None;
        }

        let pattern = SleepPattern {
            average_sleep_duration: average_duration(sessions),
            average_cycle_length: detect_cycle_length(sessions),
            typical_light_sleep_windows: detect_light_windows(sessions),
            consistency_score: consistency_score(sessions),
            data_points: sessions.len(),
        };

        debug!(
            data_points = pattern.data_points,
            cycle_minutes = pattern.average_cycle_length,
            light_windows = pattern.typical_light_sleep_windows.len(),
            consistency = pattern.consistency_score,
            "Sleep pattern derived"
        );

        Some(pattern)
    }

    /// Most likely sleep stage at a given offset from sleep onset, with its
    /// probability. Detected light windows take precedence over the
    /// idealized cycle model.
    pub fn most_likely_stage(
        minutes_from_onset: f64,
        pattern: &SleepPattern,
    ) -> (SleepStageType, f64) {
        if let Some(window) = pattern
            .typical_light_sleep_windows
            .iter()
            .find(|w| w.contains(minutes_from_onset))
        {
            return (SleepStageType::Light, window.probability);
        }

        let cycle = f64::from(pattern.average_cycle_length.max(1));
        let position = minutes_from_onset.rem_euclid(cycle) / cycle;

        if position < 0.20 {
            (SleepStageType::Light, 0.6)
        } else if position < 0.50 {
            (SleepStageType::Deep, 0.5)
        } else if position < 0.75 {
            (SleepStageType::Light, 0.5)
        } else {
            (SleepStageType::Rem, 0.5)
        }
    }
}

/// Mean total duration, rounded to the minute
fn average_duration(sessions: &[SleepSession]) -> u32 {
    let total: f64 = sessions.iter().map(|s| s.total_duration_minutes).sum();
    (total / sessions.len() as f64).round().max(0.0) as u32
}

/// Median plausible cycle length across all sessions
fn detect_cycle_length(sessions: &[SleepSession]) -> u32 {
    let mut candidates: Vec<f64> = sessions
        .iter()
        .filter(|s| s.stages.len() >= MIN_STAGES_FOR_CYCLES)
        .flat_map(cycle_candidates)
        .filter(|len| (MIN_CYCLE_MINUTES..=MAX_CYCLE_MINUTES).contains(len))
        .collect();

    if candidates.is_empty() {
        return DEFAULT_CYCLE_MINUTES;
    }

    candidates.sort_by(|a, b| a.total_cmp(b));
    let mid = candidates.len() / 2;
    let median = if candidates.len() % 2 == 0 {
        (candidates[mid - 1] + candidates[mid]) / 2.0
    } else {
        candidates[mid]
    };

    median.round() as u32
}

/// Walk one session's stages and collect light → deep → light cycle lengths
fn cycle_candidates(session: &SleepSession) -> Vec<f64> {
    let mut lengths = Vec::new();
    let mut cycle_start = None;
    let mut in_deep = false;

    for stage in &session.stages {
        if !stage.is_well_formed() {
            debug!(
                date = %session.date,
                start = %stage.start,
                end = %stage.end,
                "Skipping inverted stage"
            );
            continue;
        }

        match stage.stage {
            SleepStageType::Deep => in_deep = true,
            SleepStageType::Light if in_deep => {
                if let Some(start) = cycle_start {
                    lengths.push(minutes_between(start, stage.start));
                }
                cycle_start = Some(stage.start);
                in_deep = false;
            }
            SleepStageType::Light if cycle_start.is_none() => cycle_start = Some(stage.start),
            _ => {}
        }
    }

    lengths
}

/// Running light/total counts for a contiguous run of buckets
struct WindowRun {
    start_bucket: usize,
    light: u32,
    total: u32,
}

/// Build the onset-relative histogram and merge high-probability buckets
fn detect_light_windows(sessions: &[SleepSession]) -> Vec<TimeWindow> {
    let bucket_count = (HISTOGRAM_SPAN_MINUTES / BUCKET_MINUTES) as usize;
    let mut light_counts = vec![0u32; bucket_count];
    let mut total_counts = vec![0u32; bucket_count];

    for session in sessions {
        for stage in session.stages.iter().filter(|s| s.is_well_formed()) {
            let offset = session.minutes_from_onset(stage.start);
            if offset < 0.0 || offset >= f64::from(HISTOGRAM_SPAN_MINUTES) {
                continue;
            }
            let bucket = (offset / f64::from(BUCKET_MINUTES)).floor() as usize;
            total_counts[bucket] += 1;
            if stage.stage == SleepStageType::Light {
                light_counts[bucket] += 1;
            }
        }
    }

    let mut windows = Vec::new();
    let mut open: Option<WindowRun> = None;

    for bucket in 0..bucket_count {
        let (light, total) = (light_counts[bucket], total_counts[bucket]);
        let probability = if total == 0 {
            0.0
        } else {
            f64::from(light) / f64::from(total)
        };

        if probability >= LIGHT_WINDOW_THRESHOLD {
            match open.as_mut() {
                Some(run) => {
                    run.light += light;
                    run.total += total;
                }
                None => {
                    open = Some(WindowRun {
                        start_bucket: bucket,
                        light,
                        total,
                    })
                }
            }
        } else if let Some(run) = open.take() {
            windows.push(TimeWindow {
                start_minutes_from_sleep: run.start_bucket as u32 * BUCKET_MINUTES,
                end_minutes_from_sleep: bucket as u32 * BUCKET_MINUTES,
                probability: f64::from(run.light) / f64::from(run.total),
            });
        }
    }

    // No data past the span to refine a run that is still open
    if let Some(run) = open {
        windows.push(TimeWindow {
            start_minutes_from_sleep: run.start_bucket as u32 * BUCKET_MINUTES,
            end_minutes_from_sleep: HISTOGRAM_SPAN_MINUTES,
            probability: OPEN_WINDOW_PROBABILITY,
        });
    }

    windows
}

/// Regularity score (0-100) from duration, bedtime and wake-time spread
fn consistency_score(sessions: &[SleepSession]) -> u8 {
    if sessions.len() < MIN_SESSIONS_FOR_CONSISTENCY {
        return 0;
    }

    let durations: Vec<f64> = sessions.iter().map(|s| s.total_duration_minutes).collect();
    let bedtimes: Vec<f64> = sessions
        .iter()
        .map(|s| night_minutes(s.sleep_start.time()))
        .collect();
    let wake_times: Vec<f64> = sessions
        .iter()
        .map(|s| night_minutes(s.sleep_end.time()))
        .collect();

    let sub_score =
        |values: &[f64]| (100.0 - (std_dev(values) / SD_REFERENCE_MINUTES) * 50.0).max(0.0);

    let mean = (sub_score(&durations) + sub_score(&bedtimes) + sub_score(&wake_times)) / 3.0;
    mean.round().clamp(0.0, 100.0) as u8
}

/// Population standard deviation
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Minutes since midnight on a single night axis: times before 04:00 are
/// shifted past midnight so 23:30 and 00:30 are an hour apart.
pub(crate) fn night_minutes(time: NaiveTime) -> f64 {
    let minutes = time.hour() * 60 + time.minute();
    let shifted = if minutes < NIGHT_BOUNDARY_MINUTES {
        minutes + 24 * 60
    } else {
        minutes
    };
    f64::from(shifted) + f64::from(time.second()) / 60.0
}
