use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use super::device::Device;

#[derive(Debug, Default)]
struct Pending {
    requested: bool,
    shutdown: bool,
}

/// Hand-off between driver message handlers and the reset worker.
///
/// A request made while one is pending is coalesced into it; a request made
/// while a reset is running is absorbed by that reset.
#[derive(Debug, Default)]
pub(crate) struct ResetSignal {
    pending: Mutex<Pending>,
    wake: Condvar,
    in_flight: AtomicBool,
}

/// What happened to a reset request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResetRequest {
    Queued,
    Coalesced,
    Absorbed,
}

impl ResetSignal {
    pub fn request(&self) -> ResetRequest {
        if self.in_flight.load(Ordering::Acquire) {
            return ResetRequest::Absorbed;
        }
        let mut pending = self.pending.lock();
        if pending.requested {
            return ResetRequest::Coalesced;
        }
        pending.requested = true;
        self.wake.notify_one();
        ResetRequest::Queued
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().requested || self.in_flight.load(Ordering::Acquire)
    }

    /// Block until a reset is requested. Returns false once shut down.
    fn wait(&self) -> bool {
        let mut pending = self.pending.lock();
        while !pending.requested && !pending.shutdown {
            self.wake.wait(&mut pending);
        }
        if pending.shutdown {
            return false;
        }
        pending.requested = false;
        self.in_flight.store(true, Ordering::Release);
        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.pending.lock().shutdown
    }

    fn finish(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    pub fn shutdown(&self) {
        self.pending.lock().shutdown = true;
        self.wake.notify_all();
    }
}

/// Start the thread that services deferred resets for `device`.
pub(crate) fn spawn_reset_worker(
    device: Weak<Device>,
    signal: Arc<ResetSignal>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name("asio-reset".into()).spawn(move || {
        while signal.wait() {
            let Some(device) = device.upgrade() else {
                break;
            };
            device.run_deferred_reset();
            drop(device);
            signal.finish();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_coalesce_while_pending() {
        let signal = ResetSignal::default();
        assert_eq!(signal.request(), ResetRequest::Queued);
        assert_eq!(signal.request(), ResetRequest::Coalesced);
        assert!(signal.is_pending());
    }

    #[test]
    fn requests_are_absorbed_while_running() {
        let signal = ResetSignal::default();
        signal.request();
        assert!(signal.wait());
        assert_eq!(signal.request(), ResetRequest::Absorbed);

        signal.finish();
        assert!(!signal.is_pending());
        assert_eq!(signal.request(), ResetRequest::Queued);
    }

    #[test]
    fn shutdown_releases_the_waiter() {
        let signal = Arc::new(ResetSignal::default());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait())
        };
        signal.shutdown();
        assert!(!waiter.join().unwrap());
    }
}
