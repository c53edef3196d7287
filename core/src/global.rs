//! Process-wide initialization.
//!
//! `initialize` marks the library initialized and, the first time in the
//! process, installs the `tracing` subscriber used by the library. It is safe
//! to call any number of times. `deinitialize` refuses while processors are
//! still alive.
//!
//! The initialized flag and the live-processor count share one lock, so a
//! processor created concurrently with `deinitialize` is either counted or
//! created after the flag was cleared.
//!
//! Processors do not require `initialize`; without it their diagnostics go to
//! whatever subscriber the host has installed.

use std::sync::Once;

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

struct GlobalState {
    initialized: bool,
    live_processors: usize,
}

static STATE: Mutex<GlobalState> = Mutex::new(GlobalState {
    initialized: false,
    live_processors: 0,
});

static SUBSCRIBER: Once = Once::new();

/// Environment variable holding the `tracing` filter directive.
pub const LOG_ENV: &str = "AHR_LOG";

fn install_subscriber() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    // the host may already own the global subscriber
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_err()
    {
        tracing::debug!("global tracing subscriber already installed");
    }
}

/// Returns `true` if this call moved the library from uninitialized to
/// initialized. The subscriber is only installed on the first such call in
/// the process; later ones after a `deinitialize` just set the flag again.
pub fn initialize() -> bool {
    let mut state = STATE.lock();
    if state.initialized {
        return false;
    }
    state.initialized = true;
    SUBSCRIBER.call_once(install_subscriber);
    true
}

/// Returns `false` while processors are alive or if not initialized.
pub fn deinitialize() -> bool {
    let mut state = STATE.lock();
    if state.live_processors > 0 {
        tracing::warn!(
            live = state.live_processors,
            "refusing to deinitialize with live processors"
        );
        return false;
    }
    std::mem::replace(&mut state.initialized, false)
}

pub fn is_initialized() -> bool {
    STATE.lock().initialized
}

pub fn live_processors() -> usize {
    STATE.lock().live_processors
}

/// Counts a processor as alive for as long as it exists.
#[derive(Debug)]
pub(crate) struct Registration(());

impl Registration {
    pub(crate) fn new() -> Self {
        STATE.lock().live_processors += 1;
        Registration(())
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        STATE.lock().live_processors -= 1;
    }
}
