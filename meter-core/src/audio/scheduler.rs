//! Wake-signal relay
//!
//! One relay thread per capture pipeline turns the stream's data-ready
//! signal into a host recompute request. The thread never touches audio
//! buffers; it blocks on a dual-event wait with no timeout and exits only
//! when the stop event is signaled. Teardown joins the thread before any
//! pipeline buffer is released.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// Host callback invoked on the relay thread when a recompute is due.
pub type DataReadyFn = Box<dyn Fn() + Send>;

#[derive(Default)]
struct EventFlags {
    data_ready: bool,
    stop: bool,
}

/// Dual-event pair shared between the stream callback, the relay thread,
/// and teardown. Data-ready is auto-reset on wake; stop is latched.
pub struct CaptureEvents {
    flags: Mutex<EventFlags>,
    cv: Condvar,
}

pub enum Wake {
    DataReady,
    Stop,
}

impl CaptureEvents {
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(EventFlags::default()),
            cv: Condvar::new(),
        }
    }

    pub fn signal_data_ready(&self) {
        self.lock().data_ready = true;
        self.cv.notify_one();
    }

    pub fn signal_stop(&self) {
        self.lock().stop = true;
        self.cv.notify_one();
    }

    /// Block until either event fires. Stop takes priority when both are
    /// pending, so teardown always wins.
    pub fn wait(&self) -> Wake {
        let mut flags = self.lock();
        loop {
            if flags.stop {
                return Wake::Stop;
            }
            if flags.data_ready {
                flags.data_ready = false;
                return Wake::DataReady;
            }
            flags = match self.cv.wait(flags) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    fn lock(&self) -> MutexGuard<'_, EventFlags> {
        match self.flags.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for CaptureEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Relay thread handle; stopping is signaled once and joined.
pub struct CaptureScheduler {
    events: Arc<CaptureEvents>,
    relay: Option<JoinHandle<()>>,
}

impl CaptureScheduler {
    /// Spawn the relay loop: forward every data-ready wake to the host
    /// callback until stop is signaled.
    pub fn spawn(events: Arc<CaptureEvents>, on_data_ready: DataReadyFn) -> Self {
        let wait_events = Arc::clone(&events);
        let relay = std::thread::spawn(move || loop {
            match wait_events.wait() {
                Wake::Stop => break,
                Wake::DataReady => on_data_ready(),
            }
        });

        Self {
            events,
            relay: Some(relay),
        }
    }

    /// Signal stop and join the relay thread. Buffers owned by the caller
    /// must outlive this call, never the reverse.
    pub fn stop(&mut self) {
        if let Some(relay) = self.relay.take() {
            self.events.signal_stop();
            let _ = relay.join();
        }
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
