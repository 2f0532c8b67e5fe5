//! FFI bindings for NeuroNudge core
//!
//! C-compatible functions for hosts that embed the engine without Rust. All
//! strings are null-terminated UTF-8. Returned strings are allocated here and
//! must be released with `nn_free_string`. Engines created over FFI keep their
//! state in memory; the host persists snapshots itself.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{DateTime, FixedOffset};

use crate::clock::{Clock, SystemClock};
use crate::config::CoreConfig;
use crate::encoder::SnapshotEncoder;
use crate::engine::{FocusEngine, SignalOutcome};
use crate::error::CoreError;
use crate::rules::RuleIndex;
use crate::signals::Signal;
use crate::storage::MemoryStore;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

unsafe fn required(ptr: *const c_char, what: &str) -> Result<String, CoreError> {
    cstr_to_string(ptr).ok_or_else(|| CoreError::InvalidRequest(format!("Invalid {what} string pointer")))
}

/// NULL means "now"
unsafe fn resolve_time(ptr: *const c_char) -> Result<DateTime<FixedOffset>, CoreError> {
    match cstr_to_string(ptr) {
        None => Ok(SystemClock.now()),
        Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .map_err(|e| CoreError::ParseError(format!("bad timestamp {raw:?}: {e}"))),
    }
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

unsafe fn open_engine(config_json: *const c_char) -> Result<FocusEngine<MemoryStore>, CoreError> {
    let config = match cstr_to_string(config_json) {
        Some(json) => CoreConfig::from_json(&json)?,
        None => CoreConfig::default(),
    };
    FocusEngine::with_config(MemoryStore::new(), config, SystemClock.now())
}

unsafe fn apply_signal(
    handle: &mut NudgeEngineHandle,
    signal_json: *const c_char,
    at_rfc3339: *const c_char,
) -> Result<String, CoreError> {
    let raw = required(signal_json, "signal")?;
    let signal: Signal = serde_json::from_str(&raw).map_err(|e| CoreError::InvalidSignal(e.to_string()))?;
    let at = resolve_time(at_rfc3339)?;

    let json = match handle.engine.handle(signal, at)? {
        SignalOutcome::Applied(output) => serde_json::to_string(&output)?,
        SignalOutcome::Discarded(reason) => serde_json::json!({ "discarded": reason }).to_string(),
    };
    Ok(json)
}

unsafe fn encode_snapshot(handle: &NudgeEngineHandle, at_rfc3339: *const c_char) -> Result<String, CoreError> {
    let at = resolve_time(at_rfc3339)?;
    let snapshot = handle.engine.snapshot(at);
    handle.encoder.to_json(&snapshot)
}

unsafe fn classify_host(rules_json: *const c_char, host: *const c_char) -> Result<String, CoreError> {
    let rules: BTreeMap<String, String> = serde_json::from_str(&required(rules_json, "rules")?)?;
    let host = required(host, "host")?;
    let index = RuleIndex::compile(&rules);
    let json = serde_json::json!({
        "host": host,
        "label": index.classify(&host),
        "category": index.classify_base(&host),
    });
    Ok(json.to_string())
}

fn respond(result: Result<String, CoreError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Engine API
// ============================================================================

/// Opaque handle to an in-memory engine
pub struct NudgeEngineHandle {
    engine: FocusEngine<MemoryStore>,
    encoder: SnapshotEncoder,
}

/// Create an engine from a configuration document.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string, or NULL for defaults.
/// - Must be freed with `nn_engine_free`.
/// - Returns NULL on error; call `nn_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn nn_engine_new(config_json: *const c_char) -> *mut NudgeEngineHandle {
    clear_last_error();

    let created = open_engine(config_json);

    match created {
        Ok(engine) => Box::into_raw(Box::new(NudgeEngineHandle {
            engine,
            encoder: SnapshotEncoder::new(),
        })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free an engine.
///
/// # Safety
/// - `handle` must be a pointer returned by `nn_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn nn_engine_free(handle: *mut NudgeEngineHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Deliver one signal, e.g. `{"type":"tab_activated","url":"https://..."}`.
///
/// Returns the engine output as JSON, or `{"discarded":"<reason>"}` when the
/// signal fell outside the privacy bounds.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `nn_engine_new`.
/// - `signal_json` must be a valid null-terminated C string.
/// - `at_rfc3339` is the observation time, or NULL for the current time.
/// - Returns a newly allocated string that must be freed with `nn_free_string`.
/// - Returns NULL on error; call `nn_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn nn_engine_signal(
    handle: *mut NudgeEngineHandle,
    signal_json: *const c_char,
    at_rfc3339: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    respond(apply_signal(&mut *handle, signal_json, at_rfc3339))
}

/// Current snapshot wrapped in a payload with producer metadata.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `nn_engine_new`.
/// - `at_rfc3339` is the evaluation time, or NULL for the current time.
/// - Returns a newly allocated string that must be freed with `nn_free_string`.
/// - Returns NULL on error; call `nn_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn nn_engine_snapshot(
    handle: *const NudgeEngineHandle,
    at_rfc3339: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    respond(encode_snapshot(&*handle, at_rfc3339))
}

// ============================================================================
// Stateless API
// ============================================================================

/// Classify one host against a rules document (`{"pattern": "Label"}`).
///
/// Returns `{"host":...,"label":...,"category":...}`.
///
/// # Safety
/// - `rules_json` and `host` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `nn_free_string`.
/// - Returns NULL on error; call `nn_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn nn_classify_host(rules_json: *const c_char, host: *const c_char) -> *mut c_char {
    clear_last_error();

    respond(classify_host(rules_json, host))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by NeuroNudge functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a NeuroNudge function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn nn_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next NeuroNudge call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn nn_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn nn_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
