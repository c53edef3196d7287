//! Background transport driver.
//!
//! # Design
//! The driver owns a single-threaded Tokio runtime on a dedicated OS thread.
//! Submitted slots arrive over an unbounded channel; the pool capacity is the
//! only admission bound, so the channel never holds more than `capacity`
//! jobs. Each job runs as its own task with a hyper client, under a
//! whole-exchange timeout.
//!
//! Completion invokes exactly one callback and then releases the slot. A
//! panicking callback is caught and logged and the slot is still released.
//!
//! Shutdown force-fails: every in-flight task and every queued job completes
//! with `TransportError::Cancelled`, then the thread exits. `stop` joins the
//! thread, so no callback runs after it returns.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{ProcessorError, TransportError};
use crate::header::HeaderTable;
use crate::http::{Callbacks, HttpResponse};
use crate::logger::{Logger, Severity};
use crate::pool::{Handle, Job, ResolvedRequest, SlotPool};

type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Everything the driver thread shares with the processor.
pub(crate) struct DriverContext {
    pub(crate) pool: Arc<SlotPool>,
    pub(crate) logger: Logger,
    pub(crate) request_timeout: Duration,
    pub(crate) connect_timeout: Duration,
}

/// Observable lifecycle of the driver, and so of the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Started,
    Stopped,
}

enum DriverState {
    Idle {
        runtime: tokio::runtime::Runtime,
        context: Arc<DriverContext>,
    },
    Running {
        jobs: mpsc::UnboundedSender<Job>,
        shutdown: watch::Sender<bool>,
        thread: JoinHandle<()>,
    },
    /// Shutdown was signalled from the driver thread itself; the handle is
    /// kept for the next `stop` made from another thread.
    Stopping {
        thread: JoinHandle<()>,
    },
    Stopped,
}

pub(crate) struct TransportDriver {
    state: DriverState,
}

impl TransportDriver {
    /// Build the runtime up front so creation failures surface immediately.
    pub(crate) fn new(context: DriverContext) -> Result<Self, ProcessorError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .thread_name("ahr-driver")
            .build()
            .map_err(ProcessorError::InitializationFailed)?;
        Ok(Self {
            state: DriverState::Idle {
                runtime,
                context: Arc::new(context),
            },
        })
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        match self.state {
            DriverState::Idle { .. } => Lifecycle::Created,
            DriverState::Running { .. } => Lifecycle::Started,
            DriverState::Stopping { .. } | DriverState::Stopped => Lifecycle::Stopped,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        matches!(self.state, DriverState::Running { .. })
    }

    /// Spawn the driver thread. Returns `false` unless the driver was idle.
    pub(crate) fn start(&mut self) -> Result<bool, ProcessorError> {
        let (runtime, context) = match std::mem::replace(&mut self.state, DriverState::Stopped) {
            DriverState::Idle { runtime, context } => (runtime, context),
            other => {
                self.state = other;
                return Ok(false);
            }
        };
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let thread = std::thread::Builder::new()
            .name("ahr-driver".to_string())
            .spawn(move || runtime.block_on(run(context, jobs_rx, shutdown_rx)))
            .map_err(ProcessorError::InitializationFailed)?;
        self.state = DriverState::Running {
            jobs: jobs_tx,
            shutdown: shutdown_tx,
            thread,
        };
        Ok(true)
    }

    /// Hand a job to the driver. The job comes back if the driver is not
    /// accepting work.
    pub(crate) fn dispatch(&self, job: Job) -> Result<(), Job> {
        match &self.state {
            DriverState::Running { jobs, .. } => jobs.send(job).map_err(|e| e.0),
            _ => Err(job),
        }
    }

    /// Signal shutdown and return the thread to join.
    ///
    /// The join happens outside whatever lock guards the driver, so callbacks
    /// running during shutdown can still call back into the processor.
    pub(crate) fn stop(&mut self) -> Option<JoinHandle<()>> {
        match std::mem::replace(&mut self.state, DriverState::Stopped) {
            DriverState::Running {
                jobs,
                shutdown,
                thread,
            } => {
                // receivers may already be gone if the thread died
                let _ = shutdown.send(true);
                drop(jobs);
                Some(thread)
            }
            // never started; shut down without blocking the caller
            DriverState::Idle { runtime, .. } => {
                runtime.shutdown_background();
                None
            }
            DriverState::Stopping { thread } => Some(thread),
            DriverState::Stopped => None,
        }
    }

    /// Keep a thread handle returned by `stop` that could not be joined from
    /// the calling thread.
    pub(crate) fn defer_join(&mut self, thread: JoinHandle<()>) {
        if matches!(self.state, DriverState::Stopped) {
            self.state = DriverState::Stopping { thread };
        }
    }
}

fn build_client(context: &DriverContext) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(context.connect_timeout));
    connector.set_nodelay(true);
    Client::builder(TokioExecutor::new())
        .pool_timer(TokioTimer::new())
        .build(connector)
}

async fn run(
    context: Arc<DriverContext>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    mut shutdown: watch::Receiver<bool>,
) {
    let client = build_client(&context);
    let mut in_flight = JoinSet::new();
    tracing::debug!("transport driver started");

    loop {
        tokio::select! {
            _ = cancelled(&mut shutdown) => break,
            job = jobs.recv() => match job {
                Some(job) => {
                    in_flight.spawn(execute(
                        context.clone(),
                        client.clone(),
                        job,
                        shutdown.clone(),
                    ));
                }
                None => break,
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    context.logger.error(&format!("transport task failed: {e}"));
                }
            }
        }
    }

    // Jobs that were queued but never started.
    jobs.close();
    while let Ok(job) = jobs.try_recv() {
        let Job {
            handle,
            transaction_id,
            callbacks,
            ..
        } = job;
        tracing::debug!(handle, %transaction_id, "cancelling queued request");
        complete(&context, handle, callbacks, Err(TransportError::Cancelled));
    }

    // In-flight tasks observe the shutdown flag and fail themselves.
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            context.logger.error(&format!("transport task failed: {e}"));
        }
    }
    tracing::debug!("transport driver stopped");
}

/// Resolves once shutdown is signalled or the processor side is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn execute(
    context: Arc<DriverContext>,
    client: HttpClient,
    job: Job,
    mut shutdown: watch::Receiver<bool>,
) {
    let Job {
        handle,
        transaction_id,
        request,
        callbacks,
    } = job;
    let method = request.method;
    let url = request.url.to_string();
    let verbose = request.log_level == Severity::Info;
    let span = tracing::debug_span!("request", handle, %transaction_id, %method, %url);

    async move {
        if verbose {
            context
                .logger
                .info(&format!("{method} {url} started on slot {handle} ({transaction_id})"));
        }
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => Err(TransportError::Cancelled),
            result = tokio::time::timeout(
                context.request_timeout,
                send(&context, &client, transaction_id, request),
            ) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Timeout),
            },
        };

        let elapsed = started.elapsed();
        match &outcome {
            Ok(response) => {
                tracing::debug!(status = response.status, ?elapsed, "request completed");
                if verbose {
                    context.logger.info(&format!(
                        "{method} {url} -> {} in {} ms",
                        response.status,
                        elapsed.as_millis()
                    ));
                }
            }
            Err(TransportError::Cancelled) => {
                tracing::debug!("request cancelled");
            }
            Err(e) => {
                tracing::debug!(error = %e, ?elapsed, "request failed");
                context
                    .logger
                    .warning(&format!("{method} {url} on slot {handle} failed: {e}"));
            }
        }

        complete(&context, handle, callbacks, outcome);
    }
    .instrument(span)
    .await
}

async fn send(
    context: &DriverContext,
    client: &HttpClient,
    transaction_id: Uuid,
    request: ResolvedRequest,
) -> Result<HttpResponse, TransportError> {
    let ResolvedRequest {
        method,
        url,
        headers,
        body,
        ..
    } = request;
    let body = match body {
        Some(bytes) if method.carries_body() => Full::new(bytes),
        _ => Full::new(Bytes::new()),
    };
    let mut req = http::Request::builder()
        .method(http::Method::from(method))
        .uri(url)
        .body(body)
        .map_err(|e| TransportError::Protocol(e.to_string()))?;
    *req.headers_mut() = headers;

    let response = client.request(req).await.map_err(|e| {
        let msg = describe(&e);
        if e.is_connect() {
            TransportError::Connect(msg)
        } else {
            TransportError::Protocol(msg)
        }
    })?;

    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| TransportError::Protocol(describe(&e)))?
        .to_bytes();

    let (headers, dropped) = HeaderTable::from_header_map(&parts.headers);
    if dropped > 0 {
        context.logger.warning(&format!(
            "{dropped} response header(s) did not fit the header table ({transaction_id})"
        ));
    }

    Ok(HttpResponse {
        status: parts.status.as_u16(),
        headers,
        body,
    })
}

/// Invoke exactly one callback, then release the slot.
fn complete(
    context: &DriverContext,
    handle: Handle,
    callbacks: Callbacks,
    outcome: Result<HttpResponse, TransportError>,
) {
    let Callbacks {
        on_success,
        on_error,
    } = callbacks;
    let result = match outcome {
        Ok(response) => catch_unwind(AssertUnwindSafe(move || on_success(handle, response))),
        Err(error) => catch_unwind(AssertUnwindSafe(move || on_error(handle, error))),
    };
    if result.is_err() {
        tracing::error!(handle, "completion callback panicked");
        context
            .logger
            .error(&format!("completion callback for slot {handle} panicked"));
    }
    if let Err(e) = context.pool.release(handle) {
        tracing::error!(handle, error = %e, "failed to release slot");
        context.logger.error(&format!("failed to release slot {handle}: {e}"));
    }
}

/// Flatten an error and its sources into one line.
pub(crate) fn describe(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use crate::logger::tests::RecordingSink;
    use crate::pool::tests::resolved;
    use std::sync::mpsc as std_mpsc;

    fn context(pool: Arc<SlotPool>, sink: Arc<RecordingSink>) -> DriverContext {
        DriverContext {
            pool,
            logger: Logger::new(sink, Severity::Info),
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(1),
        }
    }

    fn in_flight_job(pool: &SlotPool, callbacks: Callbacks) -> Job {
        let h = pool.acquire().unwrap();
        pool.configure(h, resolved(HttpMethod::Get), callbacks).unwrap();
        pool.take_for_flight(h).unwrap()
    }

    #[test]
    fn complete_invokes_success_then_releases() {
        let pool = Arc::new(SlotPool::new(1));
        let sink = Arc::new(RecordingSink::default());
        let ctx = context(pool.clone(), sink);
        let (tx, rx) = std_mpsc::channel();
        let job = in_flight_job(
            &pool,
            Callbacks::new(
                move |h, r: HttpResponse| tx.send((h, r.status)).unwrap(),
                |_, _| panic!("error callback must not run"),
            ),
        );

        let response = HttpResponse {
            status: 204,
            headers: HeaderTable::new(),
            body: Bytes::new(),
        };
        complete(&ctx, job.handle, job.callbacks, Ok(response));

        assert_eq!(rx.try_recv().unwrap(), (0, 204));
        assert_eq!(pool.count_free(), 1);
    }

    #[test]
    fn panicking_callback_still_releases_slot() {
        let pool = Arc::new(SlotPool::new(1));
        let sink = Arc::new(RecordingSink::default());
        let ctx = context(pool.clone(), sink.clone());
        let job = in_flight_job(
            &pool,
            Callbacks::new(|_, _| {}, |_, _| panic!("boom")),
        );

        complete(&ctx, job.handle, job.callbacks, Err(TransportError::Timeout));

        assert_eq!(pool.count_free(), 1);
        let lines = sink.lines.lock();
        assert!(lines
            .iter()
            .any(|(s, m)| *s == Severity::Error && m.contains("panicked")));
    }

    #[test]
    fn driver_lifecycle_transitions() {
        let pool = Arc::new(SlotPool::new(1));
        let sink = Arc::new(RecordingSink::default());
        let mut driver = TransportDriver::new(context(pool, sink)).unwrap();
        assert_eq!(driver.lifecycle(), Lifecycle::Created);
        assert!(driver.start().unwrap());
        assert_eq!(driver.lifecycle(), Lifecycle::Started);
        assert!(!driver.start().unwrap());

        let thread = driver.stop().unwrap();
        thread.join().unwrap();
        assert_eq!(driver.lifecycle(), Lifecycle::Stopped);
        assert!(driver.stop().is_none());
        assert!(!driver.start().unwrap());
    }

    #[test]
    fn deferred_join_is_handed_out_once() {
        let pool = Arc::new(SlotPool::new(1));
        let sink = Arc::new(RecordingSink::default());
        let mut driver = TransportDriver::new(context(pool, sink)).unwrap();
        assert!(driver.start().unwrap());

        let thread = driver.stop().unwrap();
        driver.defer_join(thread);
        assert_eq!(driver.lifecycle(), Lifecycle::Stopped);
        assert!(!driver.is_running());

        driver.stop().unwrap().join().unwrap();
        assert!(driver.stop().is_none());
    }

    #[test]
    fn dispatch_before_start_returns_job() {
        let pool = Arc::new(SlotPool::new(1));
        let sink = Arc::new(RecordingSink::default());
        let driver = TransportDriver::new(context(pool.clone(), sink)).unwrap();
        let job = in_flight_job(&pool, Callbacks::new(|_, _| {}, |_, _| {}));
        let back = driver.dispatch(job).unwrap_err();
        assert_eq!(back.handle, 0);
    }

    #[test]
    fn describe_walks_sources() {
        let inner = std::io::Error::other("refused");
        let outer = ProcessorError::InitializationFailed(inner);
        assert_eq!(
            describe(&outer),
            "transport driver initialization failed: refused"
        );
    }
}
