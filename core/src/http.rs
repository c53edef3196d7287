//! HTTP request and response values exchanged with the processor.
//!
//! # Design
//! An `HttpRequest` is plain data owned by the caller until it is handed to
//! `Processor::configure`, which takes it by value. From then on the slot owns
//! its copy, so later changes on the caller side can never race with the
//! transport driver.
//!
//! An `HttpResponse` exists only for the duration of one success callback.

use bytes::Bytes;

use crate::error::TransportError;
use crate::header::HeaderTable;
use crate::logger::Severity;
use crate::pool::Handle;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    /// Whether a body is sent for this method.
    pub fn carries_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl From<HttpMethod> for http::Method {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Delete => http::Method::DELETE,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request described as plain data.
///
/// `target` is either an absolute `http://` URL or a resource path that the
/// processor resolves against its base URL.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub target: String,
    pub headers: HeaderTable,
    pub body: Option<Bytes>,
    pub log_level: Severity,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderTable::new(),
            body: None,
            log_level: Severity::Warning,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, target)
    }

    pub fn post(target: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(HttpMethod::Post, target).with_body(body)
    }

    pub fn put(target: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(HttpMethod::Put, target).with_body(body)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, target)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderTable) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_log_level(mut self, level: Severity) -> Self {
        self.log_level = level;
        self
    }
}

/// A completed response handed to the success callback.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderTable,
    pub body: Bytes,
}

type SuccessFn = Box<dyn FnOnce(Handle, HttpResponse) + Send + 'static>;
type ErrorFn = Box<dyn FnOnce(Handle, TransportError) + Send + 'static>;

/// The pair of completion callbacks attached to a configured slot.
///
/// Exactly one of the two is invoked per submission, on the driver thread.
pub struct Callbacks {
    pub(crate) on_success: SuccessFn,
    pub(crate) on_error: ErrorFn,
}

impl Callbacks {
    pub fn new<S, E>(on_success: S, on_error: E) -> Self
    where
        S: FnOnce(Handle, HttpResponse) + Send + 'static,
        E: FnOnce(Handle, TransportError) + Send + 'static,
    {
        Self {
            on_success: Box::new(on_success),
            on_error: Box::new(on_error),
        }
    }

    /// Route both outcomes into one closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce(Handle, Result<HttpResponse, TransportError>) + Send + Clone + 'static,
    {
        let g = f.clone();
        Self::new(move |h, r| f(h, Ok(r)), move |h, e| g(h, Err(e)))
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}
