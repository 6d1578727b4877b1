//! FFI bindings for Synheart Wake
//!
//! This module provides C-compatible functions for calling the wake engine from
//! the mobile host app. All functions exchange JSON in null-terminated C strings
//! and return allocated memory that must be freed with `wake_free_string`.
//!
//! Local date-times cross the boundary as `"YYYY-MM-DDTHH:MM:SS"` strings.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::engine::{
    analyze_history_json, feedback_report_json, parse_local_datetime, predict_from_history_json,
    WakeEngine,
};
use crate::error::WakeError;
use crate::schedule::select_wake_time;
use crate::store::HistoryStore;
use crate::types::{FeedbackRating, SleepSession, WakePrediction, WakeWindow};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Read a required string argument, recording an error when it is missing
unsafe fn required_arg(ptr: *const c_char, name: &str) -> Option<String> {
    let value = cstr_to_string(ptr);
    if value.is_none() {
        set_last_error(&format!("Invalid {name} string pointer"));
    }
    value
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Hand a JSON result to the caller, or record the error and return NULL
fn json_result(result: Result<String, WakeError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Analyze a history snapshot and return the sleep pattern JSON (`null` when
/// there is not enough history).
///
/// # Safety
/// - `history_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `wake_free_string`.
/// - Returns NULL on error; call `wake_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn wake_analyze_patterns(history_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(history) = required_arg(history_json, "history JSON") else {
        return ptr::null_mut();
    };

    json_result(analyze_history_json(&history))
}

/// Predict a wake time from a history snapshot and return the prediction JSON.
///
/// # Safety
/// - `history_json`, `window_json`, and `bedtime` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `wake_free_string`.
/// - Returns NULL on error; call `wake_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn wake_predict(
    history_json: *const c_char,
    window_json: *const c_char,
    bedtime: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(history) = required_arg(history_json, "history JSON") else {
        return ptr::null_mut();
    };
    let Some(window) = required_arg(window_json, "wake window JSON") else {
        return ptr::null_mut();
    };
    let Some(bedtime) = required_arg(bedtime, "bedtime") else {
        return ptr::null_mut();
    };

    json_result(predict_from_history_json(&history, &window, &bedtime))
}

/// Feedback statistics, insights and adjustments for a history snapshot.
///
/// # Safety
/// - `history_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `wake_free_string`.
/// - Returns NULL on error; call `wake_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn wake_feedback_report(history_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(history) = required_arg(history_json, "history JSON") else {
        return ptr::null_mut();
    };

    json_result(feedback_report_json(&history))
}

/// Decide between the predicted time and the deadline for a prediction.
///
/// # Safety
/// - `prediction_json` must be a valid null-terminated C string.
/// - `confidence_threshold` outside 0-100 is rejected.
/// - Returns a newly allocated `ScheduledWake` JSON string that must be freed
///   with `wake_free_string`.
/// - Returns NULL on error; call `wake_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn wake_select_time(
    prediction_json: *const c_char,
    confidence_threshold: i32,
) -> *mut c_char {
    clear_last_error();

    let Some(prediction) = required_arg(prediction_json, "prediction JSON") else {
        return ptr::null_mut();
    };
    let threshold = match u8::try_from(confidence_threshold) {
        Ok(t) if t <= 100 => t,
        _ => {
            set_last_error(&format!("Invalid confidence threshold: {confidence_threshold}"));
            return ptr::null_mut();
        }
    };

    json_result(
        serde_json::from_str::<WakePrediction>(&prediction)
            .map_err(|e| WakeError::ParseError(e.to_string()))
            .and_then(|p| {
                serde_json::to_string(&select_wake_time(&p, threshold))
                    .map_err(|e| WakeError::EncodingError(e.to_string()))
            }),
    )
}

// ============================================================================
// Stateful Engine API
// ============================================================================

/// Opaque handle to a WakeEngine over an in-memory history
pub struct WakeEngineHandle {
    engine: WakeEngine<HistoryStore>,
}

/// Create an engine, optionally restoring a history snapshot.
///
/// # Safety
/// - `history_json` must be NULL or a valid null-terminated C string.
/// - Returns a pointer that must be freed with `wake_engine_free`.
/// - Returns NULL on error; call `wake_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn wake_engine_new(history_json: *const c_char) -> *mut WakeEngineHandle {
    clear_last_error();

    let store = if history_json.is_null() {
        HistoryStore::default()
    } else {
        let Some(json) = required_arg(history_json, "history JSON") else {
            return ptr::null_mut();
        };
        match HistoryStore::from_json(&json) {
            Ok(store) => store,
            Err(e) => {
                set_last_error(&WakeError::ParseError(e.to_string()).to_string());
                return ptr::null_mut();
            }
        }
    };

    Box::into_raw(Box::new(WakeEngineHandle {
        engine: WakeEngine::new(store),
    }))
}

/// Free an engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `wake_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn wake_engine_free(engine: *mut WakeEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Record a synced sleep session.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `wake_engine_new`.
/// - `session_json` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error; call `wake_last_error` for the message.
#[no_mangle]
pub unsafe extern "C" fn wake_engine_record_session(
    engine: *mut WakeEngineHandle,
    session_json: *const c_char,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &mut *engine;

    let Some(json) = required_arg(session_json, "session JSON") else {
        return -1;
    };

    let result = serde_json::from_str::<SleepSession>(&json)
        .map_err(|e| WakeError::ParseError(e.to_string()))
        .and_then(|session| handle.engine.record_session(session));

    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Predict for a wake window with the engine's history.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `wake_engine_new`.
/// - `window_json` and `bedtime` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `wake_free_string`.
/// - Returns NULL on error; call `wake_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn wake_engine_predict(
    engine: *mut WakeEngineHandle,
    window_json: *const c_char,
    bedtime: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    let Some(window) = required_arg(window_json, "wake window JSON") else {
        return ptr::null_mut();
    };
    let Some(bedtime) = required_arg(bedtime, "bedtime") else {
        return ptr::null_mut();
    };

    let result = serde_json::from_str::<WakeWindow>(&window)
        .map_err(|e| WakeError::ParseError(e.to_string()))
        .and_then(|window| {
            let bedtime = parse_local_datetime(&bedtime)?;
            handle.engine.predict(&window, bedtime)
        })
        .and_then(|prediction| Ok(serde_json::to_string(&prediction)?));

    json_result(result)
}

/// Submit a rating for a feedback entry and return the stored rating JSON.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `wake_engine_new`.
/// - `entry_json` must be a valid null-terminated C string.
/// - Pass a negative `alertness_after_30_min` when there is no alertness rating.
/// - Returns a newly allocated string that must be freed with `wake_free_string`.
/// - Returns NULL on error; call `wake_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn wake_engine_submit_rating(
    engine: *mut WakeEngineHandle,
    entry_json: *const c_char,
    immediate_feeling: i32,
    alertness_after_30_min: i32,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &mut *engine;

    let Some(entry) = required_arg(entry_json, "feedback entry JSON") else {
        return ptr::null_mut();
    };

    let feeling = u8::try_from(immediate_feeling).unwrap_or(0);
    let alertness = if alertness_after_30_min < 0 {
        None
    } else {
        Some(u8::try_from(alertness_after_30_min).unwrap_or(0))
    };

    let result = serde_json::from_str::<FeedbackRating>(&entry)
        .map_err(|e| WakeError::ParseError(e.to_string()))
        .and_then(|entry| handle.engine.submit_rating(entry, feeling, alertness))
        .and_then(|rating| Ok(serde_json::to_string(&rating)?));

    json_result(result)
}

/// Save the engine's history snapshot to JSON.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `wake_engine_new`.
/// - Returns a newly allocated string that must be freed with `wake_free_string`.
/// - Returns NULL on error; call `wake_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn wake_engine_save_history(engine: *mut WakeEngineHandle) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    json_result(
        handle
            .engine
            .store()
            .to_json()
            .map_err(|e| WakeError::EncodingError(e.to_string())),
    )
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by wake functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a wake function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn wake_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next wake function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn wake_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn wake_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SleepStore;
    use crate::types::{SleepStage, SleepStageType};
    use chrono::{Duration, NaiveDate, NaiveTime};

    fn history_json(nights: i64) -> CString {
        let mut store = HistoryStore::default();
        for i in 0..nights {
            let onset = NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(23, 0, 0)
                .unwrap()
                + Duration::days(i);
            let stages = (0..5)
                .flat_map(|c| {
                    let base = onset + Duration::minutes(c * 90);
                    [
                        SleepStage::new(SleepStageType::Light, base, base + Duration::minutes(20)),
                        SleepStage::new(
                            SleepStageType::Deep,
                            base + Duration::minutes(20),
                            base + Duration::minutes(50),
                        ),
                        SleepStage::new(
                            SleepStageType::Rem,
                            base + Duration::minutes(50),
                            base + Duration::minutes(90),
                        ),
                    ]
                })
                .collect();
            let session =
                SleepSession::from_stages((onset + Duration::hours(8)).date(), stages).unwrap();
            store.upsert_session(session).unwrap();
        }
        CString::new(store.to_json().unwrap()).unwrap()
    }

    fn window_json() -> CString {
        let window = WakeWindow::new(NaiveTime::from_hms_opt(7, 0, 0).unwrap(), 30);
        CString::new(serde_json::to_string(&window).unwrap()).unwrap()
    }

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        wake_free_string(ptr);
        s
    }

    #[test]
    fn test_ffi_analyze_patterns() {
        let history = history_json(7);
        unsafe {
            let json = take_string(wake_analyze_patterns(history.as_ptr()));
            let pattern: serde_json::Value = serde_json::from_str(&json).unwrap();
            assert_eq!(pattern["average_cycle_length"], 90);
        }
    }

    #[test]
    fn test_ffi_predict_and_select() {
        let history = history_json(7);
        let window = window_json();
        let bedtime = CString::new("2024-01-08T23:00:00").unwrap();

        unsafe {
            let prediction =
                take_string(wake_predict(history.as_ptr(), window.as_ptr(), bedtime.as_ptr()));
            assert!(prediction.contains("predicted_wake_time"));

            let prediction = CString::new(prediction).unwrap();
            let plan = take_string(wake_select_time(prediction.as_ptr(), 70));
            let plan: serde_json::Value = serde_json::from_str(&plan).unwrap();
            assert_eq!(plan["uses_prediction"], true);
            assert_eq!(plan["primary"], "2024-01-09T06:30:00");

            assert!(wake_select_time(prediction.as_ptr(), 300).is_null());
            assert!(!wake_last_error().is_null());
        }
    }

    #[test]
    fn test_ffi_feedback_report() {
        let history = history_json(1);
        unsafe {
            let json = take_string(wake_feedback_report(history.as_ptr()));
            let report: serde_json::Value = serde_json::from_str(&json).unwrap();
            assert_eq!(report["stats"]["total_ratings"], 0);
            assert_eq!(report["insights"].as_array().unwrap().len(), 1);
        }
    }

    #[test]
    fn test_ffi_engine_lifecycle() {
        unsafe {
            let engine = wake_engine_new(ptr::null());
            assert!(!engine.is_null());

            let history = history_json(7);
            let store = HistoryStore::from_json(history.to_str().unwrap()).unwrap();
            for session in store.sessions().unwrap() {
                let json = CString::new(serde_json::to_string(&session).unwrap()).unwrap();
                assert_eq!(wake_engine_record_session(engine, json.as_ptr()), 0);
            }

            let window = window_json();
            let bedtime = CString::new("2024-01-08T23:00").unwrap();
            let prediction: WakePrediction = serde_json::from_str(&take_string(
                wake_engine_predict(engine, window.as_ptr(), bedtime.as_ptr()),
            ))
            .unwrap();
            assert_eq!(prediction.confidence, 71);

            let entry = (*engine)
                .engine
                .create_feedback_entry(&prediction, prediction.predicted_wake_time, true);
            let entry = CString::new(serde_json::to_string(&entry).unwrap()).unwrap();
            assert!(wake_engine_submit_rating(engine, entry.as_ptr(), 7, -1).is_null());
            let rating = take_string(wake_engine_submit_rating(engine, entry.as_ptr(), 5, -1));
            assert!(rating.contains("\"immediate_feeling\":5"));
            assert!(wake_engine_submit_rating(engine, entry.as_ptr(), 2, -1).is_null());
            let error = CStr::from_ptr(wake_last_error()).to_str().unwrap();
            assert!(error.starts_with("Duplicate rating"));

            let saved = CString::new(take_string(wake_engine_save_history(engine))).unwrap();
            let restored = wake_engine_new(saved.as_ptr());
            assert!(!restored.is_null());
            assert_eq!((*restored).engine.feedback_stats().unwrap().total_ratings, 1);

            wake_engine_free(engine);
            wake_engine_free(restored);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid = CString::new("not json").unwrap();
            let result = wake_analyze_patterns(invalid.as_ptr());
            assert!(result.is_null());

            let error = wake_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(error_str.starts_with("Failed to parse input"));

            assert!(wake_analyze_patterns(ptr::null()).is_null());
            assert_eq!(wake_engine_record_session(ptr::null_mut(), invalid.as_ptr()), -1);
        }
    }

    #[test]
    fn test_ffi_rejects_out_of_range_snapshot_and_window() {
        unsafe {
            for days in ["100000000", "0"] {
                let snapshot = CString::new(format!(r#"{{"retention_days": {days}}}"#)).unwrap();
                assert!(wake_engine_new(snapshot.as_ptr()).is_null());
                assert!(wake_analyze_patterns(snapshot.as_ptr()).is_null());
                let error = CStr::from_ptr(wake_last_error()).to_str().unwrap();
                assert!(error.contains("retention_days"));
            }

            let history = history_json(7);
            let mut window = WakeWindow::new(NaiveTime::from_hms_opt(7, 0, 0).unwrap(), 30);
            window.earliest_wake_time = NaiveTime::from_hms_opt(7, 30, 0);
            let window = CString::new(serde_json::to_string(&window).unwrap()).unwrap();
            let bedtime = CString::new("2024-01-15T23:00").unwrap();
            assert!(wake_predict(history.as_ptr(), window.as_ptr(), bedtime.as_ptr()).is_null());
            let error = CStr::from_ptr(wake_last_error()).to_str().unwrap();
            assert!(error.starts_with("Invalid wake window"));
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = wake_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, env!("CARGO_PKG_VERSION"));
        }
    }
}
