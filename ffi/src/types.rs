//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! The header table uses the fixed wire layout C callers allocate themselves:
//! `HEADER_CAPACITY` entries of NUL-padded name/value arrays plus a count.
//! A name or value that fills its whole array carries no terminator, so
//! decoding stops at the first NUL or at the array end.
//!
//! Conversion functions live here to keep `lib.rs` focused on the
//! `extern "C"` surface.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;

use ahr_core::header::{HEADER_CAPACITY, HEADER_NAME_LEN, HEADER_VALUE_LEN};
use ahr_core::{
    Callbacks, HeaderTable, HttpMethod, HttpRequest, LogSink, Logger, Processor, ProcessorError,
    Severity, Status,
};
use bytes::Bytes;

/// Opaque handle to a `Processor`.
pub struct AhrProcessor {
    pub(crate) inner: Processor,
}

/// Opaque handle to a logger built from C callbacks.
pub struct AhrLogger {
    pub(crate) inner: Logger,
}

/// Synchronous result code.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AhrStatus {
    Ok = 0,
    ObjectBusy = 1,
    UnknownObject = 2,
    NotEnoughMemory = 3,
    Timeout = 4,
    UnknownError = 5,
}

impl From<Status> for AhrStatus {
    fn from(s: Status) -> Self {
        match s {
            Status::Ok => AhrStatus::Ok,
            Status::ObjectBusy => AhrStatus::ObjectBusy,
            Status::UnknownObject => AhrStatus::UnknownObject,
            Status::NotEnoughMemory => AhrStatus::NotEnoughMemory,
            Status::Timeout => AhrStatus::Timeout,
            Status::UnknownError => AhrStatus::UnknownError,
        }
    }
}

impl From<&ProcessorError> for AhrStatus {
    fn from(e: &ProcessorError) -> Self {
        e.status().into()
    }
}

impl<T> From<Result<T, ProcessorError>> for AhrStatus {
    fn from(r: Result<T, ProcessorError>) -> Self {
        match r {
            Ok(_) => AhrStatus::Ok,
            Err(e) => (&e).into(),
        }
    }
}

/// HTTP method codes. C callers pass the discriminant as a `uint32_t`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AhrMethod {
    Get = 0,
    Post = 1,
    Put = 2,
    Delete = 3,
}

impl TryFrom<u32> for AhrMethod {
    type Error = u32;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(AhrMethod::Get),
            1 => Ok(AhrMethod::Post),
            2 => Ok(AhrMethod::Put),
            3 => Ok(AhrMethod::Delete),
            other => Err(other),
        }
    }
}

impl From<AhrMethod> for HttpMethod {
    fn from(m: AhrMethod) -> Self {
        match m {
            AhrMethod::Get => HttpMethod::Get,
            AhrMethod::Post => HttpMethod::Post,
            AhrMethod::Put => HttpMethod::Put,
            AhrMethod::Delete => HttpMethod::Delete,
        }
    }
}

// ---------------------------------------------------------------------------
// Header wire layout
// ---------------------------------------------------------------------------

pub const AHR_HEADER_CAPACITY: usize = 256;
pub const AHR_HEADER_NAME_LEN: usize = 256;
pub const AHR_HEADER_VALUE_LEN: usize = 3840;

const _: () = assert!(
    AHR_HEADER_CAPACITY == HEADER_CAPACITY
        && AHR_HEADER_NAME_LEN == HEADER_NAME_LEN
        && AHR_HEADER_VALUE_LEN == HEADER_VALUE_LEN
);

/// One name/value pair, NUL-padded.
#[repr(C)]
pub struct AhrHeaderEntry {
    pub name: [c_char; AHR_HEADER_NAME_LEN],
    pub value: [c_char; AHR_HEADER_VALUE_LEN],
}

/// Fixed-capacity header table. Entries past `nheaders` are zero-filled.
#[repr(C)]
pub struct AhrHeader {
    pub header: [AhrHeaderEntry; AHR_HEADER_CAPACITY],
    pub nheaders: usize,
}

fn copy_padded(dst: &mut [c_char], src: &[u8]) {
    dst.fill(0);
    for (d, s) in dst.iter_mut().zip(src) {
        *d = *s as c_char;
    }
}

fn read_padded(src: &[c_char]) -> Vec<u8> {
    src.iter()
        .take_while(|c| **c != 0)
        .map(|c| *c as u8)
        .collect()
}

impl AhrHeader {
    /// Allocate an empty table on the heap.
    pub(crate) fn boxed() -> Box<Self> {
        // SAFETY: every field is an integer or an array of integers, so the
        // all-zero bit pattern is a valid empty table.
        unsafe { Box::<Self>::new_zeroed().assume_init() }
    }

    /// Append an entry, applying the same bounds as `HeaderTable::insert`.
    pub(crate) fn push(&mut self, name: &[u8], value: &[u8]) -> Result<(), ProcessorError> {
        if self.nheaders >= HEADER_CAPACITY
            || name.len() > HEADER_NAME_LEN
            || value.len() > HEADER_VALUE_LEN
        {
            return Err(ProcessorError::CapacityExceeded);
        }
        if name.is_empty() {
            return Err(ProcessorError::InvalidHeader(String::new()));
        }
        let entry = &mut self.header[self.nheaders];
        copy_padded(&mut entry.name, name);
        copy_padded(&mut entry.value, value);
        self.nheaders += 1;
        Ok(())
    }

    /// Decode the populated entries. Names and values must be UTF-8.
    pub(crate) fn to_table(&self) -> Result<HeaderTable, ProcessorError> {
        if self.nheaders > HEADER_CAPACITY {
            return Err(ProcessorError::CapacityExceeded);
        }
        let mut table = HeaderTable::new();
        for entry in &self.header[..self.nheaders] {
            let name = String::from_utf8(read_padded(&entry.name))
                .map_err(|e| ProcessorError::InvalidHeader(e.to_string()))?;
            let value = String::from_utf8(read_padded(&entry.value))
                .map_err(|_| ProcessorError::InvalidHeader(name.clone()))?;
            table.insert(&name, &value)?;
        }
        Ok(table)
    }
}

// ---------------------------------------------------------------------------
// Request descriptor and callbacks
// ---------------------------------------------------------------------------

/// Request descriptor.
///
/// `header` may be null. `url` is a NUL-terminated absolute URL or a path
/// relative to the processor's base URL. `body` may be null when `body_len`
/// is zero. `log_level` is the 0/1/2 severity index.
#[repr(C)]
pub struct AhrRequestData {
    pub header: *const AhrHeader,
    pub url: *const c_char,
    pub body: *const u8,
    pub body_len: usize,
    pub log_level: usize,
}

/// Success callback: `(context, handle, http_status, body, body_len)`.
///
/// `body` is only valid for the duration of the call.
pub type AhrSuccessFn = extern "C" fn(*mut c_void, usize, usize, *const u8, usize);

/// Error callback: `(context, handle, error_code)`.
pub type AhrErrorFn = extern "C" fn(*mut c_void, usize, usize);

/// Completion callbacks plus an opaque context pointer handed back to both.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct AhrUserData {
    pub data: *mut c_void,
    pub on_success: Option<AhrSuccessFn>,
    pub on_error: Option<AhrErrorFn>,
}

/// Caller context carried to the driver thread. The caller guarantees it
/// stays valid until one of its callbacks has fired.
#[derive(Clone, Copy)]
struct Context(*mut c_void);

unsafe impl Send for Context {}

impl Context {
    fn get(self) -> *mut c_void {
        self.0
    }
}

impl AhrUserData {
    pub(crate) fn to_callbacks(self) -> Callbacks {
        let ctx = Context(self.data);
        let on_success = self.on_success;
        let on_error = self.on_error;
        Callbacks::new(
            move |handle, response| {
                if let Some(f) = on_success {
                    f(
                        ctx.get(),
                        handle,
                        usize::from(response.status),
                        response.body.as_ptr(),
                        response.body.len(),
                    );
                }
            },
            move |handle, error| {
                if let Some(f) = on_error {
                    f(ctx.get(), handle, error.code() as usize);
                }
            },
        )
    }
}

impl AhrRequestData {
    /// Copy the descriptor into an owned request.
    ///
    /// # Safety
    /// Every non-null pointer must be valid for reads as documented on the
    /// struct.
    pub(crate) unsafe fn to_request(&self, method: AhrMethod) -> Result<HttpRequest, ProcessorError> {
        if self.url.is_null() {
            return Err(ProcessorError::InvalidUrl(String::new()));
        }
        let url = unsafe { CStr::from_ptr(self.url) }
            .to_str()
            .map_err(|e| ProcessorError::InvalidUrl(e.to_string()))?;
        let mut request = HttpRequest::new(method.into(), url)
            .with_log_level(Severity::from_index(self.log_level));
        if !self.header.is_null() {
            request = request.with_headers(unsafe { &*self.header }.to_table()?);
        }
        if !self.body.is_null() && self.body_len > 0 {
            let body = unsafe { std::slice::from_raw_parts(self.body, self.body_len) };
            request = request.with_body(Bytes::copy_from_slice(body));
        }
        Ok(request)
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

/// Logger callback receiving a NUL-terminated UTF-8 message.
pub type AhrLogFn = extern "C" fn(*const c_char);

/// `LogSink` forwarding each channel to a C function. Null channels are
/// silent.
pub(crate) struct CLogSink {
    pub(crate) info: Option<AhrLogFn>,
    pub(crate) warning: Option<AhrLogFn>,
    pub(crate) error: Option<AhrLogFn>,
}

impl CLogSink {
    fn emit(f: Option<AhrLogFn>, msg: &str) {
        let Some(f) = f else { return };
        if let Ok(msg) = CString::new(msg.replace('\0', " ")) {
            f(msg.as_ptr());
        }
    }
}

impl LogSink for CLogSink {
    fn info(&self, msg: &str) {
        Self::emit(self.info, msg);
    }

    fn warning(&self, msg: &str) {
        Self::emit(self.warning, msg);
    }

    fn error(&self, msg: &str) {
        Self::emit(self.error, msg);
    }
}

impl AhrLogger {
    pub(crate) fn new(sink: CLogSink, verbosity: u32) -> Self {
        Self {
            inner: Logger::new(Arc::new(sink), Severity::from_verbosity(verbosity)),
        }
    }
}
