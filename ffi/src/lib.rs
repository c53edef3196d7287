//! C-ABI wrapper around `ahr-core`.
//!
//! # Overview
//! Exposes the asynchronous request processor through `extern "C"`
//! functions: process-wide init, loggers built from C callbacks, the fixed
//! header table layout, and the processor lifecycle and slot API.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Synchronous results are `AhrStatus` codes; transport outcomes reach the
//!   C callbacks on the driver thread, with the caller's `data` pointer
//!   passed back untouched.
//! - The C caller owns every pointer returned by a `*_create` function and
//!   must release it with the matching `*_destroy`.

pub mod types;

use std::ffi::CStr;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use ahr_core::{Logger, Processor, ProcessorConfig, ProcessorError};

use types::*;

fn guard<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or(fallback)
}

// ---------------------------------------------------------------------------
// Process-wide init
// ---------------------------------------------------------------------------

/// Install the library's diagnostic subscriber. Returns `true` if this call
/// did the work.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_initialize() -> bool {
    guard(false, ahr_core::global::initialize)
}

/// Undo `ahr_initialize`. Returns `false` while processors are alive.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_deinitialize() -> bool {
    guard(false, ahr_core::global::deinitialize)
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

/// Create a logger from three message callbacks, any of which may be null.
///
/// `verbosity` is a conventional numeric level (10 debug, 20 info,
/// 30 warning, 40 error, 50 critical). Free with `ahr_logger_destroy`.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_logger_create(
    info: Option<AhrLogFn>,
    warning: Option<AhrLogFn>,
    error: Option<AhrLogFn>,
    verbosity: u32,
) -> *mut AhrLogger {
    guard(std::ptr::null_mut(), || {
        let sink = CLogSink {
            info,
            warning,
            error,
        };
        Box::into_raw(Box::new(AhrLogger::new(sink, verbosity)))
    })
}

/// Change the threshold of a logger. Processors already created from it keep
/// the level they were created with.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_logger_set_level(logger: *mut AhrLogger, verbosity: u32) {
    if logger.is_null() {
        return;
    }
    guard((), || {
        let logger = unsafe { &mut *logger };
        logger
            .inner
            .set_level(ahr_core::Severity::from_verbosity(verbosity));
    });
}

/// Free a logger. Processors created from it keep working. Safe with null.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_logger_destroy(logger: *mut AhrLogger) {
    if !logger.is_null() {
        guard((), || drop(unsafe { Box::from_raw(logger) }));
    }
}

// ---------------------------------------------------------------------------
// Header table
// ---------------------------------------------------------------------------

/// Allocate an empty, zero-filled header table. Free with
/// `ahr_header_destroy`.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_header_create() -> *mut AhrHeader {
    guard(std::ptr::null_mut(), || Box::into_raw(AhrHeader::boxed()))
}

/// Free a header table. Safe with null.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_header_destroy(header: *mut AhrHeader) {
    if !header.is_null() {
        guard((), || drop(unsafe { Box::from_raw(header) }));
    }
}

/// Append a name/value pair.
///
/// Returns `NotEnoughMemory` when the table is full or a string is over its
/// bound, and `UnknownError` for null or empty arguments.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_header_add(
    header: *mut AhrHeader,
    name: *const c_char,
    value: *const c_char,
) -> AhrStatus {
    if header.is_null() || name.is_null() || value.is_null() {
        return AhrStatus::UnknownError;
    }
    guard(AhrStatus::UnknownError, || {
        let header = unsafe { &mut *header };
        let name = unsafe { CStr::from_ptr(name) }.to_bytes();
        let value = unsafe { CStr::from_ptr(value) }.to_bytes();
        header.push(name, value).into()
    })
}

// ---------------------------------------------------------------------------
// Processor lifecycle
// ---------------------------------------------------------------------------

fn logger_or_default(logger: *const AhrLogger) -> Logger {
    if logger.is_null() {
        Logger::default()
    } else {
        unsafe { &*logger }.inner.clone()
    }
}

fn create(config: ProcessorConfig, logger: Logger) -> *mut AhrProcessor {
    match Processor::with_config(config, logger) {
        Ok(inner) => Box::into_raw(Box::new(AhrProcessor { inner })),
        Err(e) => {
            tracing::error!(error = %e, "processor creation failed");
            std::ptr::null_mut()
        }
    }
}

/// Create a processor with `capacity` slots (clamped into `[1, 25]`).
///
/// `base_url` may be null, in which case every request URL must be absolute.
/// `logger` may be null for the default `tracing` sink; otherwise the
/// processor keeps its own reference and the caller may destroy the logger
/// at any time. Returns null on failure. Free with `ahr_processor_destroy`.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_processor_create(
    capacity: usize,
    base_url: *const c_char,
    logger: *const AhrLogger,
) -> *mut AhrProcessor {
    guard(std::ptr::null_mut(), || {
        let logger = logger_or_default(logger);
        let mut config = ProcessorConfig::new(capacity).with_log_level(logger.level());
        if !base_url.is_null() {
            match unsafe { CStr::from_ptr(base_url) }.to_str() {
                Ok(url) => config = config.with_base_url(url),
                Err(_) => {
                    logger.error("base url is not valid UTF-8");
                    return std::ptr::null_mut();
                }
            }
        }
        create(config, logger)
    })
}

/// Create a processor from a JSON configuration object.
///
/// Missing fields take their defaults; a missing `log_level` keeps the
/// logger's own level. Returns null if `config_json` is null or does not
/// parse.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_processor_create_with_config(
    config_json: *const c_char,
    logger: *const AhrLogger,
) -> *mut AhrProcessor {
    if config_json.is_null() {
        return std::ptr::null_mut();
    }
    guard(std::ptr::null_mut(), || {
        let logger = logger_or_default(logger);
        let defaults = ProcessorConfig::default().with_log_level(logger.level());
        let parsed = unsafe { CStr::from_ptr(config_json) }
            .to_str()
            .map_err(|e| ProcessorError::Config(e.to_string()))
            .and_then(|raw| ProcessorConfig::from_json_with(raw, defaults));
        match parsed {
            Ok(config) => create(config, logger),
            Err(e) => {
                logger.error(&format!("unable to create processor: {e}"));
                std::ptr::null_mut()
            }
        }
    })
}

/// Stop the processor if needed and free it. Safe with null.
///
/// Must not be called from inside one of the processor's own callbacks.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_processor_destroy(processor: *mut AhrProcessor) {
    if !processor.is_null() {
        guard((), || drop(unsafe { Box::from_raw(processor) }));
    }
}

/// Start the transport driver. Returns `false` if already started or stopped.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_processor_start(processor: *const AhrProcessor) -> bool {
    if processor.is_null() {
        return false;
    }
    guard(false, || unsafe { &*processor }.inner.start())
}

/// Stop the transport driver. In-flight requests fail with the cancelled
/// error code before this returns.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_processor_stop(processor: *const AhrProcessor) {
    if !processor.is_null() {
        guard((), || unsafe { &*processor }.inner.stop());
    }
}

// ---------------------------------------------------------------------------
// Slot API
// ---------------------------------------------------------------------------

/// Reserve a free slot and write its handle to `handle_out`.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_processor_acquire(
    processor: *const AhrProcessor,
    handle_out: *mut usize,
) -> AhrStatus {
    if processor.is_null() || handle_out.is_null() {
        return AhrStatus::UnknownError;
    }
    guard(AhrStatus::UnknownError, || {
        let processor = unsafe { &*processor };
        match processor.inner.acquire_slot() {
            Ok(handle) => {
                unsafe { *handle_out = handle };
                AhrStatus::Ok
            }
            Err(e) => (&e).into(),
        }
    })
}

/// Attach a request and callbacks to a reserved slot.
///
/// Headers, URL and body are copied; the caller may reuse `data` as soon as
/// this returns. `user_data.data` must stay valid until a callback fires.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_processor_configure(
    processor: *const AhrProcessor,
    handle: usize,
    method: u32,
    data: *const AhrRequestData,
    user_data: *const AhrUserData,
) -> AhrStatus {
    if processor.is_null() || data.is_null() || user_data.is_null() {
        return AhrStatus::UnknownError;
    }
    guard(AhrStatus::UnknownError, || {
        let processor = unsafe { &*processor };
        let Ok(method) = AhrMethod::try_from(method) else {
            processor
                .inner
                .logger()
                .warning(&format!("unknown request method {method}"));
            return AhrStatus::UnknownError;
        };
        let request = match unsafe { (*data).to_request(method) } {
            Ok(request) => request,
            Err(e) => {
                processor
                    .inner
                    .logger()
                    .warning(&format!("unable to configure slot {handle}: {e}"));
                return (&e).into();
            }
        };
        let callbacks = unsafe { *user_data }.to_callbacks();
        processor.inner.configure(handle, request, callbacks).into()
    })
}

/// Hand a configured slot to the transport driver.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_processor_submit(processor: *const AhrProcessor, handle: usize) -> AhrStatus {
    if processor.is_null() {
        return AhrStatus::UnknownError;
    }
    guard(AhrStatus::UnknownError, || {
        unsafe { &*processor }.inner.submit(handle).into()
    })
}

/// Acquire, configure and submit in one call, writing the handle used to
/// `handle_out` (which may be null).
#[unsafe(no_mangle)]
pub extern "C" fn ahr_processor_request(
    processor: *const AhrProcessor,
    method: u32,
    data: *const AhrRequestData,
    user_data: *const AhrUserData,
    handle_out: *mut usize,
) -> AhrStatus {
    if processor.is_null() || data.is_null() || user_data.is_null() {
        return AhrStatus::UnknownError;
    }
    guard(AhrStatus::UnknownError, || {
        let processor = unsafe { &*processor };
        let Ok(method) = AhrMethod::try_from(method) else {
            processor
                .inner
                .logger()
                .warning(&format!("unknown request method {method}"));
            return AhrStatus::UnknownError;
        };
        let request = match unsafe { (*data).to_request(method) } {
            Ok(request) => request,
            Err(e) => {
                processor
                    .inner
                    .logger()
                    .warning(&format!("unable to build request: {e}"));
                return (&e).into();
            }
        };
        let callbacks = unsafe { *user_data }.to_callbacks();
        match processor.inner.request(request, callbacks) {
            Ok(handle) => {
                if !handle_out.is_null() {
                    unsafe { *handle_out = handle };
                }
                AhrStatus::Ok
            }
            Err(e) => (&e).into(),
        }
    })
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

/// Number of slots that are not free.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_processor_pending_count(processor: *const AhrProcessor) -> usize {
    if processor.is_null() {
        return 0;
    }
    guard(0, || unsafe { &*processor }.inner.pending_count())
}

/// Write up to `cap` busy handles into `out` in ascending order and return
/// the total number of busy handles.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_processor_pending_handles(
    processor: *const AhrProcessor,
    out: *mut usize,
    cap: usize,
) -> usize {
    if processor.is_null() {
        return 0;
    }
    guard(0, || {
        let handles = unsafe { &*processor }.inner.pending_handles();
        if !out.is_null() {
            let n = handles.len().min(cap);
            let out = unsafe { std::slice::from_raw_parts_mut(out, n) };
            out.copy_from_slice(&handles[..n]);
        }
        handles.len()
    })
}

/// Number of slots after clamping.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_processor_capacity(processor: *const AhrProcessor) -> usize {
    if processor.is_null() {
        return 0;
    }
    guard(0, || unsafe { &*processor }.inner.capacity())
}

/// Number of free slots.
#[unsafe(no_mangle)]
pub extern "C" fn ahr_processor_free_count(processor: *const AhrProcessor) -> usize {
    if processor.is_null() {
        return 0;
    }
    guard(0, || unsafe { &*processor }.inner.free_count())
}
