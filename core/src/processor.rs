//! Top-level request processor.
//!
//! # Design
//! `Processor` composes a `SlotPool`, a `Logger`, and a `TransportDriver`.
//! All methods take `&self`, so one processor can be shared across threads
//! (for example in an `Arc`) and slots can be acquired and submitted
//! concurrently.
//!
//! Two locks are involved: the driver mutex guards the lifecycle and the pool
//! mutex guards slot state. `submit` takes them in that order; the driver
//! thread only ever takes the pool lock.
//!
//! Dropping a processor stops it first. The logger is dropped after the
//! driver thread has been joined.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{ProcessorConfig, MAX_BODY_SIZE};
use crate::driver::{describe, DriverContext, Lifecycle, TransportDriver};
use crate::error::ProcessorError;
use crate::global::Registration;
use crate::http::{Callbacks, HttpRequest};
use crate::logger::Logger;
use crate::pool::{Handle, PendingRequest, ResolvedRequest, SlotPool, SlotState};

pub struct Processor {
    config: ProcessorConfig,
    pool: Arc<SlotPool>,
    driver: Mutex<TransportDriver>,
    logger: Logger,
    _registration: Registration,
}

impl Processor {
    /// Create a processor with `capacity` slots (clamped into `[1, 25]`)
    /// and default timeouts.
    pub fn create(capacity: usize, logger: Logger) -> Result<Self, ProcessorError> {
        let config = ProcessorConfig::new(capacity).with_log_level(logger.level());
        Self::with_config(config, logger)
    }

    /// Create a processor from a full configuration. The logger's threshold
    /// is taken from `config.log_level`.
    pub fn with_config(config: ProcessorConfig, mut logger: Logger) -> Result<Self, ProcessorError> {
        logger.set_level(config.log_level);
        let capacity = config.effective_capacity();
        if capacity != config.capacity {
            logger.warning(&format!(
                "requested capacity {} clamped to {capacity}",
                config.capacity
            ));
        }
        let pool = Arc::new(SlotPool::new(capacity));
        let driver = TransportDriver::new(DriverContext {
            pool: pool.clone(),
            logger: logger.clone(),
            request_timeout: config.request_timeout(),
            connect_timeout: config.connect_timeout(),
        })
        .inspect_err(|e| logger.error(&format!("unable to create processor: {}", describe(e))))?;
        tracing::debug!(capacity, base_url = ?config.base_url, "processor created");

        Ok(Self {
            config,
            pool,
            driver: Mutex::new(driver),
            logger,
            _registration: Registration::new(),
        })
    }

    /// Start the transport driver.
    ///
    /// Returns `false` if the processor was already started or stopped, or if
    /// the driver thread could not be spawned.
    pub fn start(&self) -> bool {
        match self.driver.lock().start() {
            Ok(true) => {
                tracing::debug!("processor started");
                true
            }
            Ok(false) => {
                self.logger
                    .warning("unable to start processor: it was already started");
                false
            }
            Err(e) => {
                self.logger.error(&format!("unable to start processor: {e}"));
                false
            }
        }
    }

    /// Stop the transport driver.
    ///
    /// In-flight requests are cancelled: each receives its error callback
    /// with `TransportError::Cancelled` and its slot is released. When this
    /// returns no further callbacks will run, unless it is called from inside
    /// a callback. In that case the driver finishes after that callback
    /// returns, and the next `stop` from another thread (or dropping the
    /// processor) waits for it. Further submissions fail with `NotStarted`.
    pub fn stop(&self) {
        let mut driver = self.driver.lock();
        let Some(thread) = driver.stop() else {
            return;
        };
        if thread.thread().id() == std::thread::current().id() {
            driver.defer_join(thread);
            return;
        }
        drop(driver);
        if thread.join().is_err() {
            self.logger.error("transport driver thread panicked");
        }
        tracing::debug!("processor stopped");
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.driver.lock().lifecycle()
    }

    pub fn is_running(&self) -> bool {
        self.driver.lock().is_running()
    }

    /// Reserve a free slot. Fails fast with `NotEnoughMemory` when every
    /// slot is in use.
    pub fn acquire_slot(&self) -> Result<Handle, ProcessorError> {
        self.pool.acquire().inspect_err(|_| {
            self.logger.warning("unable to retrieve an unused request slot");
        })
    }

    /// Attach a request and its callbacks to a reserved slot.
    ///
    /// May be called again to replace the configuration before `submit`.
    pub fn configure(
        &self,
        handle: Handle,
        request: HttpRequest,
        callbacks: Callbacks,
    ) -> Result<(), ProcessorError> {
        let resolved = self.resolve(request).inspect_err(|e| {
            self.logger
                .warning(&format!("unable to configure slot {handle}: {e}"));
        })?;
        self.pool
            .configure(handle, resolved, callbacks)
            .inspect_err(|e| self.log_usage_error(e))
    }

    /// Hand a configured slot to the transport driver.
    pub fn submit(&self, handle: Handle) -> Result<(), ProcessorError> {
        let driver = self.driver.lock();
        if !driver.is_running() {
            self.logger
                .warning(&format!("unable to submit slot {handle}: processor is not running"));
            return Err(ProcessorError::NotStarted);
        }
        let job = self
            .pool
            .take_for_flight(handle)
            .inspect_err(|e| self.log_usage_error(e))?;
        tracing::trace!(handle, transaction_id = %job.transaction_id, "submitting");
        if let Err(job) = driver.dispatch(job) {
            self.pool.restore(job);
            self.logger
                .error(&format!("transport driver rejected slot {handle}"));
            return Err(ProcessorError::NotStarted);
        }
        Ok(())
    }

    /// Acquire, configure and submit in one call.
    ///
    /// If configuration or submission fails the reserved slot goes back to
    /// the pool.
    pub fn request(&self, request: HttpRequest, callbacks: Callbacks) -> Result<Handle, ProcessorError> {
        let handle = self.acquire_slot()?;
        let submitted = self
            .configure(handle, request, callbacks)
            .and_then(|()| self.submit(handle));
        if let Err(e) = submitted {
            self.pool.unreserve(handle);
            return Err(e);
        }
        Ok(handle)
    }

    /// Number of slots that are not free.
    pub fn pending_count(&self) -> usize {
        self.pool.count_total() - self.pool.count_free()
    }

    pub fn pending_handles(&self) -> Vec<Handle> {
        self.pool.pending_handles()
    }

    pub fn pending_request(&self, handle: Handle) -> Option<PendingRequest> {
        self.pool.pending(handle)
    }

    pub fn slot_state(&self, handle: Handle) -> Option<SlotState> {
        self.pool.state(handle)
    }

    pub fn capacity(&self) -> usize {
        self.pool.count_total()
    }

    pub fn free_count(&self) -> usize {
        self.pool.count_free()
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    fn resolve(&self, request: HttpRequest) -> Result<ResolvedRequest, ProcessorError> {
        let HttpRequest {
            method,
            target,
            headers,
            body,
            log_level,
        } = request;
        let url = self.config.resolve_url(&target)?;
        let headers = headers.to_header_map()?;
        let body = match body {
            Some(body) if body.len() > MAX_BODY_SIZE => {
                return Err(ProcessorError::BodyTooLarge {
                    len: body.len(),
                    max: MAX_BODY_SIZE,
                });
            }
            Some(body) if !method.carries_body() => {
                tracing::debug!(%method, len = body.len(), "ignoring body");
                None
            }
            other => other,
        };
        Ok(ResolvedRequest {
            method,
            url,
            headers,
            body,
            log_level,
        })
    }

    fn log_usage_error(&self, e: &ProcessorError) {
        match e {
            ProcessorError::ObjectBusy { .. } => self.logger.info(&e.to_string()),
            _ => self.logger.warning(&e.to_string()),
        }
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HeaderTable;
    use crate::logger::tests::RecordingSink;
    use crate::logger::Severity;

    fn processor(capacity: usize) -> (Processor, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let config = ProcessorConfig::new(capacity).with_base_url("http://127.0.0.1:9");
        let processor = Processor::with_config(config, Logger::new(sink.clone(), Severity::Info)).unwrap();
        (processor, sink)
    }

    fn noop() -> Callbacks {
        Callbacks::new(|_, _| {}, |_, _| {})
    }

    #[test]
    fn capacity_is_clamped_and_logged() {
        let (p, sink) = processor(40);
        assert_eq!(p.capacity(), 25);
        assert!(sink
            .lines
            .lock()
            .iter()
            .any(|(s, m)| *s == Severity::Warning && m.contains("clamped")));

        let (p, _) = processor(0);
        assert_eq!(p.capacity(), 1);
    }

    #[test]
    fn lifecycle_is_created_started_stopped() {
        let (p, _) = processor(1);
        assert_eq!(p.lifecycle(), Lifecycle::Created);
        assert!(p.start());
        assert!(!p.start());
        assert_eq!(p.lifecycle(), Lifecycle::Started);
        p.stop();
        assert_eq!(p.lifecycle(), Lifecycle::Stopped);
        assert!(!p.start());
        p.stop();
    }

    #[test]
    fn submit_before_start_fails_and_keeps_configuration() {
        let (p, _) = processor(1);
        let h = p.acquire_slot().unwrap();
        p.configure(h, HttpRequest::get("items"), noop()).unwrap();
        assert!(matches!(p.submit(h), Err(ProcessorError::NotStarted)));
        assert_eq!(p.slot_state(h), Some(SlotState::Configured));
    }

    #[test]
    fn submit_after_stop_fails() {
        let (p, _) = processor(1);
        assert!(p.start());
        p.stop();
        let h = p.acquire_slot().unwrap();
        p.configure(h, HttpRequest::get("items"), noop()).unwrap();
        assert!(matches!(p.submit(h), Err(ProcessorError::NotStarted)));
    }

    #[test]
    fn submit_unknown_or_unconfigured_handle() {
        let (p, _) = processor(2);
        assert!(p.start());
        assert!(matches!(
            p.submit(5),
            Err(ProcessorError::UnknownObject { handle: 5 })
        ));
        let h = p.acquire_slot().unwrap();
        assert!(matches!(
            p.submit(h),
            Err(ProcessorError::UnknownObject { .. })
        ));
    }

    #[test]
    fn configure_rejects_invalid_input() {
        let (p, _) = processor(1);
        let h = p.acquire_slot().unwrap();

        let big = vec![0u8; MAX_BODY_SIZE + 1];
        let err = p.configure(h, HttpRequest::post("items", big), noop()).unwrap_err();
        assert!(matches!(err, ProcessorError::BodyTooLarge { .. }));

        let mut headers = HeaderTable::new();
        headers.insert("bad header", "v").unwrap();
        let err = p
            .configure(h, HttpRequest::get("items").with_headers(headers), noop())
            .unwrap_err();
        assert!(matches!(err, ProcessorError::InvalidHeader(_)));

        let err = p.configure(h, HttpRequest::get("http://"), noop()).unwrap_err();
        assert!(matches!(err, ProcessorError::InvalidUrl(_)));

        assert_eq!(p.slot_state(h), Some(SlotState::Reserved));
    }

    #[test]
    fn body_is_dropped_for_get() {
        let (p, _) = processor(1);
        let resolved = p
            .resolve(HttpRequest::get("items").with_body("ignored"))
            .unwrap();
        assert!(resolved.body.is_none());
        let resolved = p.resolve(HttpRequest::put("items", "kept")).unwrap();
        assert_eq!(resolved.body.as_deref(), Some(&b"kept"[..]));
    }

    #[test]
    fn failed_request_returns_slot() {
        let (p, _) = processor(1);
        let err = p.request(HttpRequest::get("items"), noop()).unwrap_err();
        assert!(matches!(err, ProcessorError::NotStarted));
        assert_eq!(p.free_count(), 1);
        assert_eq!(p.pending_count(), 0);
    }

    #[test]
    fn pending_tracks_reserved_slots() {
        let (p, _) = processor(3);
        let a = p.acquire_slot().unwrap();
        let b = p.acquire_slot().unwrap();
        assert_eq!(p.pending_count(), 2);
        assert_eq!(p.pending_handles(), vec![a, b]);
        assert_eq!(p.pending_request(a).unwrap().state, SlotState::Reserved);
        assert!(p.pending_request(2).is_none());
    }

    #[test]
    fn processor_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Processor>();
    }
}
