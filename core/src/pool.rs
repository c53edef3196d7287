//! Fixed-size pool of reusable request slots.
//!
//! # Design
//! Slots live in a `Vec` allocated once at construction and are addressed by
//! their index, which doubles as the stable handle. Every state transition
//! happens under a single `parking_lot::Mutex`, so no thread ever observes a
//! slot halfway through a transition.
//!
//! Lifecycle of a slot:
//!
//! ```text
//! Free -> Reserved -> Configured -> InFlight -> Free
//!                      ^      |
//!                      +------+   (reconfigure before submit)
//! ```
//!
//! Only the transport driver moves a slot from `InFlight` back to `Free`.
//! Pending requests are tracked per slot, keyed by handle; nothing outside
//! the pool points back into it.

use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::ProcessorError;
use crate::http::{Callbacks, HttpMethod};
use crate::logger::Severity;

/// Stable integer identifier of a slot.
pub type Handle = usize;

pub const MIN_CAPACITY: usize = 1;
pub const MAX_CAPACITY: usize = 25;

/// Clamp a requested capacity into `[MIN_CAPACITY, MAX_CAPACITY]`.
pub fn clamp_capacity(requested: usize) -> usize {
    requested.clamp(MIN_CAPACITY, MAX_CAPACITY)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    Free,
    Reserved,
    Configured,
    InFlight,
}

/// A request whose URL and headers have been validated for the transport.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedRequest {
    pub(crate) method: HttpMethod,
    pub(crate) url: http::Uri,
    pub(crate) headers: http::HeaderMap,
    pub(crate) body: Option<Bytes>,
    pub(crate) log_level: Severity,
}

/// Work item handed to the transport driver.
#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) handle: Handle,
    pub(crate) transaction_id: Uuid,
    pub(crate) request: ResolvedRequest,
    pub(crate) callbacks: Callbacks,
}

/// Snapshot of a slot that is not free.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub handle: Handle,
    pub state: SlotState,
    pub method: Option<HttpMethod>,
    pub url: Option<String>,
    /// Set once the slot has been submitted.
    pub transaction_id: Option<Uuid>,
    pub submitted_at: Option<Instant>,
}

struct Flight {
    transaction_id: Uuid,
    submitted_at: Instant,
    method: HttpMethod,
    url: String,
}

struct Slot {
    state: SlotState,
    request: Option<ResolvedRequest>,
    callbacks: Option<Callbacks>,
    flight: Option<Flight>,
}

impl Slot {
    fn free() -> Self {
        Self {
            state: SlotState::Free,
            request: None,
            callbacks: None,
            flight: None,
        }
    }
}

pub struct SlotPool {
    slots: Mutex<Vec<Slot>>,
}

impl SlotPool {
    /// Create a pool; `capacity` is clamped into `[1, 25]`.
    pub fn new(capacity: usize) -> Self {
        let capacity = clamp_capacity(capacity);
        let slots = (0..capacity).map(|_| Slot::free()).collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Reserve the lowest-numbered free slot.
    pub fn acquire(&self) -> Result<Handle, ProcessorError> {
        let mut slots = self.slots.lock();
        let (handle, slot) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.state == SlotState::Free)
            .ok_or(ProcessorError::NotEnoughMemory)?;
        slot.state = SlotState::Reserved;
        Ok(handle)
    }

    /// Attach a request and its callbacks to a reserved or configured slot.
    pub(crate) fn configure(
        &self,
        handle: Handle,
        request: ResolvedRequest,
        callbacks: Callbacks,
    ) -> Result<(), ProcessorError> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(handle)
            .ok_or(ProcessorError::UnknownObject { handle })?;
        match slot.state {
            SlotState::Reserved | SlotState::Configured => {
                slot.request = Some(request);
                slot.callbacks = Some(callbacks);
                slot.state = SlotState::Configured;
                Ok(())
            }
            SlotState::InFlight => Err(ProcessorError::ObjectBusy { handle }),
            SlotState::Free => Err(ProcessorError::UnknownObject { handle }),
        }
    }

    /// Move a configured slot in flight and hand its contents to the caller.
    pub(crate) fn take_for_flight(&self, handle: Handle) -> Result<Job, ProcessorError> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(handle)
            .ok_or(ProcessorError::UnknownObject { handle })?;
        match slot.state {
            SlotState::Configured => {}
            SlotState::InFlight => return Err(ProcessorError::ObjectBusy { handle }),
            SlotState::Free | SlotState::Reserved => {
                return Err(ProcessorError::UnknownObject { handle })
            }
        }
        let (Some(request), Some(callbacks)) = (slot.request.take(), slot.callbacks.take()) else {
            return Err(ProcessorError::UnknownObject { handle });
        };
        let transaction_id = Uuid::new_v4();
        slot.flight = Some(Flight {
            transaction_id,
            submitted_at: Instant::now(),
            method: request.method,
            url: request.url.to_string(),
        });
        slot.state = SlotState::InFlight;
        Ok(Job {
            handle,
            transaction_id,
            request,
            callbacks,
        })
    }

    /// Put a job that never reached the driver back into `Configured`.
    pub(crate) fn restore(&self, job: Job) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(job.handle) {
            slot.request = Some(job.request);
            slot.callbacks = Some(job.callbacks);
            slot.flight = None;
            slot.state = SlotState::Configured;
        }
    }

    /// Return an in-flight slot to the pool once its callback has run.
    pub(crate) fn release(&self, handle: Handle) -> Result<(), ProcessorError> {
        let mut slots = self.slots.lock();
        match slots.get_mut(handle) {
            Some(slot) if slot.state == SlotState::InFlight => {
                *slot = Slot::free();
                Ok(())
            }
            _ => Err(ProcessorError::UnknownObject { handle }),
        }
    }

    /// Give back a slot that was reserved but never submitted.
    pub(crate) fn unreserve(&self, handle: Handle) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(handle) {
            if matches!(slot.state, SlotState::Reserved | SlotState::Configured) {
                *slot = Slot::free();
            }
        }
    }

    pub fn state(&self, handle: Handle) -> Option<SlotState> {
        self.slots.lock().get(handle).map(|s| s.state)
    }

    pub fn count_free(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|s| s.state == SlotState::Free)
            .count()
    }

    pub fn count_total(&self) -> usize {
        self.slots.lock().len()
    }

    /// Handles of all slots that are not free, in ascending order.
    pub fn pending_handles(&self) -> Vec<Handle> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state != SlotState::Free)
            .map(|(h, _)| h)
            .collect()
    }

    pub fn pending(&self, handle: Handle) -> Option<PendingRequest> {
        let slots = self.slots.lock();
        let slot = slots.get(handle)?;
        if slot.state == SlotState::Free {
            return None;
        }
        let (method, url) = match (&slot.flight, &slot.request) {
            (Some(f), _) => (Some(f.method), Some(f.url.clone())),
            (None, Some(r)) => (Some(r.method), Some(r.url.to_string())),
            (None, None) => (None, None),
        };
        Some(PendingRequest {
            handle,
            state: slot.state,
            method,
            url,
            transaction_id: slot.flight.as_ref().map(|f| f.transaction_id),
            submitted_at: slot.flight.as_ref().map(|f| f.submitted_at),
        })
    }
}

impl std::fmt::Debug for SlotPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotPool")
            .field("total", &self.count_total())
            .field("free", &self.count_free())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn resolved(method: HttpMethod) -> ResolvedRequest {
        ResolvedRequest {
            method,
            url: http::Uri::from_static("http://localhost/items"),
            headers: http::HeaderMap::new(),
            body: None,
            log_level: Severity::Warning,
        }
    }

    fn noop() -> Callbacks {
        Callbacks::new(|_, _| {}, |_, _| {})
    }

    #[test]
    fn capacity_is_clamped() {
        assert_eq!(SlotPool::new(0).count_total(), 1);
        assert_eq!(SlotPool::new(7).count_total(), 7);
        assert_eq!(SlotPool::new(100).count_total(), 25);
    }

    #[test]
    fn acquire_prefers_lowest_free_handle() {
        let pool = SlotPool::new(3);
        assert_eq!(pool.acquire().unwrap(), 0);
        assert_eq!(pool.acquire().unwrap(), 1);
        pool.unreserve(0);
        assert_eq!(pool.acquire().unwrap(), 0);
    }

    #[test]
    fn acquire_fails_when_exhausted() {
        for capacity in MIN_CAPACITY..=MAX_CAPACITY {
            let pool = SlotPool::new(capacity);
            for _ in 0..capacity {
                pool.acquire().unwrap();
            }
            assert!(matches!(pool.acquire(), Err(ProcessorError::NotEnoughMemory)));
            assert_eq!(pool.count_free(), 0);
            assert_eq!(pool.pending_handles().len(), capacity);
        }
    }

    #[test]
    fn full_lifecycle() {
        let pool = SlotPool::new(1);
        let h = pool.acquire().unwrap();
        assert_eq!(pool.state(h), Some(SlotState::Reserved));

        pool.configure(h, resolved(HttpMethod::Get), noop()).unwrap();
        assert_eq!(pool.state(h), Some(SlotState::Configured));

        // reconfiguring before submission is allowed
        pool.configure(h, resolved(HttpMethod::Delete), noop()).unwrap();

        let job = pool.take_for_flight(h).unwrap();
        assert_eq!(job.handle, h);
        assert_eq!(job.request.method, HttpMethod::Delete);
        assert_eq!(pool.state(h), Some(SlotState::InFlight));

        pool.release(h).unwrap();
        assert_eq!(pool.state(h), Some(SlotState::Free));
        assert_eq!(pool.count_free(), 1);
    }

    #[test]
    fn submit_rules() {
        let pool = SlotPool::new(2);
        assert!(matches!(
            pool.take_for_flight(0),
            Err(ProcessorError::UnknownObject { handle: 0 })
        ));
        assert!(matches!(
            pool.take_for_flight(99),
            Err(ProcessorError::UnknownObject { handle: 99 })
        ));

        let h = pool.acquire().unwrap();
        assert!(matches!(
            pool.take_for_flight(h),
            Err(ProcessorError::UnknownObject { .. })
        ));

        pool.configure(h, resolved(HttpMethod::Get), noop()).unwrap();
        let _job = pool.take_for_flight(h).unwrap();
        assert!(matches!(
            pool.take_for_flight(h),
            Err(ProcessorError::ObjectBusy { .. })
        ));
        assert!(matches!(
            pool.configure(h, resolved(HttpMethod::Get), noop()),
            Err(ProcessorError::ObjectBusy { .. })
        ));
    }

    #[test]
    fn configure_requires_reservation() {
        let pool = SlotPool::new(1);
        assert!(matches!(
            pool.configure(0, resolved(HttpMethod::Get), noop()),
            Err(ProcessorError::UnknownObject { handle: 0 })
        ));
    }

    #[test]
    fn release_only_from_in_flight() {
        let pool = SlotPool::new(1);
        assert!(pool.release(0).is_err());
        let h = pool.acquire().unwrap();
        assert!(pool.release(h).is_err());
        assert_eq!(pool.state(h), Some(SlotState::Reserved));

        pool.configure(h, resolved(HttpMethod::Get), noop()).unwrap();
        let _job = pool.take_for_flight(h).unwrap();
        pool.release(h).unwrap();
        assert!(pool.release(h).is_err());
    }

    #[test]
    fn restore_returns_job_to_configured() {
        let pool = SlotPool::new(1);
        let h = pool.acquire().unwrap();
        pool.configure(h, resolved(HttpMethod::Put), noop()).unwrap();
        let job = pool.take_for_flight(h).unwrap();
        pool.restore(job);
        assert_eq!(pool.state(h), Some(SlotState::Configured));
        assert!(pool.take_for_flight(h).is_ok());
    }

    #[test]
    fn pending_reports_flight_metadata() {
        let pool = SlotPool::new(2);
        assert!(pool.pending(0).is_none());

        let h = pool.acquire().unwrap();
        let reserved = pool.pending(h).unwrap();
        assert_eq!(reserved.state, SlotState::Reserved);
        assert!(reserved.method.is_none());

        pool.configure(h, resolved(HttpMethod::Post), noop()).unwrap();
        let job = pool.take_for_flight(h).unwrap();
        let pending = pool.pending(h).unwrap();
        assert_eq!(pending.state, SlotState::InFlight);
        assert_eq!(pending.method, Some(HttpMethod::Post));
        assert_eq!(pending.url.as_deref(), Some("http://localhost/items"));
        assert_eq!(pending.transaction_id, Some(job.transaction_id));
        assert!(pending.submitted_at.is_some());
    }
}
