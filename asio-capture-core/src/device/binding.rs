use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::models::device_models::Route;
use crate::models::error::AsioError;
use crate::traits::audio_sink::AudioSink;

/// Most channels a single consumer can expect.
pub const MAX_AUDIO_CHANNELS: usize = 8;

/// Capacity of a device's binding list.
pub const MAX_BINDINGS: usize = 64;

/// One consumer attached to a device, with its own routing table.
///
/// Routing entries are atomics so they can change while the stream runs.
pub struct ClientBinding {
    sink: Arc<dyn AudioSink>,
    channels: usize,
    routing: [AtomicI32; MAX_AUDIO_CHANNELS],
    stopping: AtomicBool,
}

impl ClientBinding {
    /// A binding expecting `channels` channels, all muted.
    pub fn new(sink: Arc<dyn AudioSink>, channels: usize) -> Result<Self, AsioError> {
        if channels == 0 || channels > MAX_AUDIO_CHANNELS {
            return Err(AsioError::Configuration(format!(
                "a binding expects 1..={} channels, got {}",
                MAX_AUDIO_CHANNELS, channels
            )));
        }
        Ok(Self {
            sink,
            channels,
            routing: std::array::from_fn(|_| AtomicI32::new(Route::MUTED_RAW)),
            stopping: AtomicBool::new(false),
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn route(&self, channel: usize) -> Route {
        self.routing
            .get(channel)
            .filter(|_| channel < self.channels)
            .map_or(Route::Muted, |raw| Route::from_raw(raw.load(Ordering::Acquire)))
    }

    pub fn set_route(&self, channel: usize, route: Route) -> Result<(), AsioError> {
        if channel >= self.channels {
            return Err(AsioError::InvalidRoute {
                channel,
                channels: self.channels,
            });
        }
        self.routing[channel].store(route.to_raw(), Ordering::Release);
        Ok(())
    }

    /// The full routing table, one entry per expected channel.
    pub fn routing(&self) -> Vec<Route> {
        (0..self.channels).map(|c| self.route(c)).collect()
    }

    /// A fresh binding with the same sink and routing.
    pub fn rebound(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            channels: self.channels,
            routing: std::array::from_fn(|i| AtomicI32::new(self.routing[i].load(Ordering::Acquire))),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub(crate) fn mark_stopping(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    pub(crate) fn sink(&self) -> &dyn AudioSink {
        self.sink.as_ref()
    }

    /// Raw input index for `channel`, negative when muted.
    #[inline]
    pub(crate) fn raw_route(&self, channel: usize) -> i32 {
        self.routing[channel].load(Ordering::Relaxed)
    }
}

/// Fixed-capacity list of bindings shared with the real-time thread.
///
/// Positions are append-only while the device is live: removing a binding
/// empties its slot but never reuses it, so indices held by callers stay
/// valid. `clear` (on close) starts the list over.
pub struct BindingList {
    slots: [RwLock<Option<Arc<ClientBinding>>>; MAX_BINDINGS],
    len: AtomicUsize,
    active: AtomicUsize,
}

impl BindingList {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| RwLock::new(None)),
            len: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
        }
    }

    /// Append a binding and return its position.
    pub fn insert(&self, binding: Arc<ClientBinding>) -> Result<usize, AsioError> {
        let index = self.len.load(Ordering::Acquire);
        if index >= MAX_BINDINGS {
            return Err(AsioError::BindingLimitReached(MAX_BINDINGS));
        }
        *self.slots[index].write() = Some(binding);
        self.len.store(index + 1, Ordering::Release);
        self.active.fetch_add(1, Ordering::AcqRel);
        Ok(index)
    }

    /// Flag the binding as stopping, empty its slot, and hand it back.
    pub fn remove(&self, index: usize) -> Option<Arc<ClientBinding>> {
        let slot = self.slots.get(index)?;
        if let Some(binding) = slot.read().as_ref() {
            binding.mark_stopping();
        }
        let removed = slot.write().take();
        if removed.is_some() {
            self.active.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    pub fn get(&self, index: usize) -> Option<Arc<ClientBinding>> {
        self.slots.get(index)?.read().clone()
    }

    /// Remove every binding.
    pub fn clear(&self) -> Vec<Arc<ClientBinding>> {
        let len = self.len.load(Ordering::Acquire);
        let mut removed = Vec::new();
        for slot in &self.slots[..len] {
            if let Some(binding) = slot.read().as_ref() {
                binding.mark_stopping();
            }
        }
        for slot in &self.slots[..len] {
            if let Some(binding) = slot.write().take() {
                removed.push(binding);
            }
        }
        self.len.store(0, Ordering::Release);
        self.active.store(0, Ordering::Release);
        removed
    }

    /// Bindings currently attached.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Positions used since the last clear, including emptied ones.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.active() == 0
    }

    /// Visit every live, non-stopping binding without blocking.
    ///
    /// A slot whose lock is held by the control thread is skipped for this
    /// call. No `Arc` is cloned or dropped.
    #[inline]
    pub(crate) fn for_each_live(&self, mut f: impl FnMut(&ClientBinding)) {
        let len = self.len.load(Ordering::Acquire).min(MAX_BINDINGS);
        for slot in &self.slots[..len] {
            if let Some(guard) = slot.try_read() {
                if let Some(binding) = guard.as_deref() {
                    if !binding.is_stopping() {
                        f(binding);
                    }
                }
            }
        }
    }
}

impl Default for BindingList {
    fn default() -> Self {
        Self::new()
    }
}
