use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::RwLock;

/// Opaque identity linking driver callbacks to the stream that owns them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceToken(u64);

impl DeviceToken {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// Receiver side of the driver callback set.
pub(crate) trait CallbackTarget: Send + Sync {
    /// A buffer half is ready. Runs on the real-time thread.
    fn buffer_switch(&self, index: usize);

    /// `asioMessage`. Returns the selector-specific answer.
    fn message(&self, selector: i32, value: i32) -> i32;

    fn sample_rate_changed(&self, rate: f64);
}

type Table = RwLock<HashMap<u64, Weak<dyn CallbackTarget>>>;

fn table() -> &'static Table {
    static TABLE: OnceLock<Table> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(HashMap::new()))
}

pub(crate) fn register(token: DeviceToken, target: Weak<dyn CallbackTarget>) {
    table().write().insert(token.raw(), target);
}

pub(crate) fn unregister(token: DeviceToken) {
    table().write().remove(&token.raw());
}

fn lookup(token: u64, blocking: bool) -> Option<Arc<dyn CallbackTarget>> {
    let guard = if blocking {
        table().read()
    } else {
        table().try_read()?
    };
    guard.get(&token).and_then(Weak::upgrade)
}

/// The callback set handed to `AsioDriver::create_buffers`.
///
/// Drivers call these entry points; each forwards to the owning stream
/// through the process-wide token table. Unknown tokens are ignored. Panics
/// are contained so nothing unwinds into driver code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCallbacks {
    token: DeviceToken,
}

impl HostCallbacks {
    pub(crate) fn new(token: DeviceToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> DeviceToken {
        self.token
    }

    /// `bufferSwitch` / `bufferSwitchTimeInfo`. Never blocks on the table.
    pub fn buffer_switch(&self, index: usize) {
        dispatch_buffer_switch(self.token.raw(), index);
    }

    /// `asioMessage`.
    pub fn message(&self, selector: i32, value: i32) -> i32 {
        dispatch_message(self.token.raw(), selector, value)
    }

    /// `sampleRateDidChange`.
    pub fn sample_rate_changed(&self, rate: f64) {
        dispatch_sample_rate_changed(self.token.raw(), rate);
    }
}

pub fn dispatch_buffer_switch(token: u64, index: usize) {
    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
        if let Some(target) = lookup(token, false) {
            target.buffer_switch(index);
        }
    }));
}

pub fn dispatch_message(token: u64, selector: i32, value: i32) -> i32 {
    panic::catch_unwind(AssertUnwindSafe(|| {
        lookup(token, true).map_or(0, |target| target.message(selector, value))
    }))
    .unwrap_or(0)
}

pub fn dispatch_sample_rate_changed(token: u64, rate: f64) {
    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
        if let Some(target) = lookup(token, true) {
            target.sample_rate_changed(rate);
        }
    }));
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        switches: AtomicUsize,
        last_index: AtomicUsize,
    }

    impl CallbackTarget for Recorder {
        fn buffer_switch(&self, index: usize) {
            self.switches.fetch_add(1, Ordering::SeqCst);
            self.last_index.store(index, Ordering::SeqCst);
        }

        fn message(&self, selector: i32, _value: i32) -> i32 {
            selector * 10
        }

        fn sample_rate_changed(&self, _rate: f64) {
            panic!("boom");
        }
    }

    #[test]
    fn routes_by_token() {
        let target = Arc::new(Recorder::default());
        let token = DeviceToken::next();
        let weak: Weak<dyn CallbackTarget> = Arc::downgrade(&target) as Weak<dyn CallbackTarget>;
        register(token, weak);

        let callbacks = HostCallbacks::new(token);
        callbacks.buffer_switch(1);
        assert_eq!(target.switches.load(Ordering::SeqCst), 1);
        assert_eq!(target.last_index.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.message(3, 0), 30);

        unregister(token);
        callbacks.buffer_switch(0);
        assert_eq!(target.switches.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.message(3, 0), 0);
    }

    #[test]
    fn dropped_targets_are_ignored() {
        let token = DeviceToken::next();
        {
            let target = Arc::new(Recorder::default());
            let weak: Weak<dyn CallbackTarget> = Arc::downgrade(&target) as Weak<dyn CallbackTarget>;
            register(token, weak);
        }
        assert_eq!(dispatch_message(token.raw(), 1, 0), 0);
        unregister(token);
    }

    #[test]
    fn panics_do_not_escape_dispatch() {
        let target = Arc::new(Recorder::default());
        let token = DeviceToken::next();
        let weak: Weak<dyn CallbackTarget> = Arc::downgrade(&target) as Weak<dyn CallbackTarget>;
        register(token, weak);

        dispatch_sample_rate_changed(token.raw(), 44100.0);

        unregister(token);
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(DeviceToken::next(), DeviceToken::next());
    }
}
