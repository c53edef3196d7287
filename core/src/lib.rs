//! Asynchronous HTTP request processor.
//!
//! # Overview
//! A fixed pool of reusable request slots feeds a background transport
//! driver that performs non-blocking HTTP I/O and reports each completion to
//! per-slot callbacks. The pool size is the only admission bound: when every
//! slot is busy, `acquire_slot` fails fast with `NotEnoughMemory` and the
//! caller decides when to retry.
//!
//! # Design
//! - `Processor` is the entry point: `create` → `start` → `acquire_slot` →
//!   `configure` → `submit`, then `stop` (or drop).
//! - Slots are addressed by integer handles that stay valid for the
//!   processor's lifetime.
//! - Exactly one of the success/error callbacks fires per submission, on the
//!   driver thread, and the slot is released only after it returns.
//! - Synchronous failures are `ProcessorError`; transport failures are
//!   `TransportError` and only ever reach the error callback.
//! - The C boundary lives in the separate `ahr-ffi` crate.

pub mod config;
pub mod driver;
pub mod error;
pub mod global;
pub mod header;
pub mod http;
pub mod logger;
pub mod pool;
pub mod processor;

pub use config::ProcessorConfig;
pub use driver::Lifecycle;
pub use error::{ProcessorError, Status, TransportError};
pub use header::{HeaderEntry, HeaderTable};
pub use http::{Callbacks, HttpMethod, HttpRequest, HttpResponse};
pub use logger::{LogSink, Logger, Severity, TracingSink};
pub use pool::{Handle, PendingRequest, SlotState};
pub use processor::Processor;
