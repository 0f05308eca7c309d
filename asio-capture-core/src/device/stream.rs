use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::binding::{BindingList, MAX_AUDIO_CHANNELS};
use super::messages::{self, MessageContext};
use super::reset::{ResetRequest, ResetSignal};
use crate::clock;
use crate::driver::buffers::DoubleBuffer;
use crate::driver::callbacks::CallbackTarget;
use crate::models::device_models::BufferRequest;
use crate::processing::sample_format::SampleFormat;
use crate::traits::audio_sink::AudioFrame;
use crate::traits::driver::AsioDriver;

/// Hardware buffers and conversion space for one open.
///
/// Built by the control thread while the stream is stopped, then handed to
/// `StreamShared`. The real-time thread only reaches it through `try_lock`.
pub(crate) struct BufferSet {
    inputs: Vec<DoubleBuffer>,
    outputs: Vec<DoubleBuffer>,
    input_formats: Vec<SampleFormat>,
    output_formats: Vec<SampleFormat>,
    scratch: Vec<f32>,
    silence: Vec<f32>,
    block_size: usize,
    sample_rate: f64,
    post_output: bool,
    driver: Arc<dyn AsioDriver>,
}

impl BufferSet {
    /// `layout` pairs each buffer request with the buffer the driver
    /// returned for it and the channel's format.
    pub fn new(
        driver: Arc<dyn AsioDriver>,
        layout: Vec<(BufferRequest, DoubleBuffer, SampleFormat)>,
        block_size: usize,
        sample_rate: f64,
        post_output: bool,
    ) -> Self {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut input_formats = Vec::new();
        let mut output_formats = Vec::new();

        for (request, buffer, format) in layout {
            if request.is_input {
                inputs.push(buffer);
                input_formats.push(format);
            } else {
                outputs.push(buffer);
                output_formats.push(format);
            }
        }

        Self {
            scratch: vec![0.0; inputs.len() * block_size],
            silence: vec![0.0; block_size],
            inputs,
            outputs,
            input_formats,
            output_formats,
            block_size,
            sample_rate,
            post_output,
            driver,
        }
    }
}

/// Stream state shared between the control thread and the real-time
/// callback.
pub(crate) struct StreamShared {
    name: String,
    buffers: Mutex<Option<BufferSet>>,
    installed: AtomicBool,
    bindings: BindingList,
    started: AtomicBool,
    called_back: AtomicBool,
    heartbeat_lock: Mutex<()>,
    heartbeat: Condvar,
    callback_count: AtomicU64,
    xruns: AtomicU64,
    reset: Arc<ResetSignal>,
}

impl StreamShared {
    pub fn new(name: &str, reset: Arc<ResetSignal>) -> Self {
        // Prime the epoch off the real-time path
        let _ = clock::monotonic_ns();
        Self {
            name: name.to_string(),
            buffers: Mutex::new(None),
            installed: AtomicBool::new(false),
            bindings: BindingList::new(),
            started: AtomicBool::new(false),
            called_back: AtomicBool::new(false),
            heartbeat_lock: Mutex::new(()),
            heartbeat: Condvar::new(),
            callback_count: AtomicU64::new(0),
            xruns: AtomicU64::new(0),
            reset,
        }
    }

    pub fn bindings(&self) -> &BindingList {
        &self.bindings
    }

    /// Publish a buffer set. Only call while the driver is stopped.
    pub fn install(&self, set: BufferSet) {
        *self.buffers.lock() = Some(set);
        self.installed.store(true, Ordering::Release);
    }

    /// Withdraw the buffer set, waiting out any in-flight callback.
    pub fn take(&self) -> Option<BufferSet> {
        let set = self.buffers.lock().take();
        self.installed.store(false, Ordering::Release);
        set
    }

    /// Whether a buffer set is installed. Never touches the buffer lock, so
    /// it is safe to poll while streaming.
    pub fn has_buffers(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    pub fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn clear_heartbeat(&self) {
        self.called_back.store(false, Ordering::Release);
    }

    pub fn has_called_back(&self) -> bool {
        self.called_back.load(Ordering::Acquire)
    }

    /// Wait until a callback has been observed, in `slice`-long waits, for
    /// at most `timeout`.
    pub fn wait_for_heartbeat(&self, timeout: Duration, slice: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.heartbeat_lock.lock();
        while !self.has_called_back() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let _ = self.heartbeat.wait_for(&mut guard, slice.min(deadline - now));
        }
        true
    }

    pub fn callback_count(&self) -> u64 {
        self.callback_count.load(Ordering::Relaxed)
    }

    pub fn xruns(&self) -> u64 {
        self.xruns.load(Ordering::Relaxed)
    }

    /// Zero the per-open counters.
    pub fn reset_counters(&self) {
        self.callback_count.store(0, Ordering::Relaxed);
        self.xruns.store(0, Ordering::Relaxed);
    }

    // --- Real-time path ---

    fn process(&self, set: &mut BufferSet, index: usize) {
        let block = set.block_size;
        let inputs = set.inputs.len();

        // Inputs some live binding listens to
        let mut wanted: u64 = 0;
        self.bindings.for_each_live(|binding| {
            for channel in 0..binding.channels() {
                let route = binding.raw_route(channel);
                if route >= 0 && (route as usize) < inputs.min(64) {
                    wanted |= 1u64 << route;
                }
            }
        });

        for i in 0..inputs.min(64) {
            if wanted & (1u64 << i) == 0 {
                continue;
            }
            let dst = &mut set.scratch[i * block..(i + 1) * block];
            let src = unsafe { set.inputs[i].half(index) };
            match set.input_formats[i].convert_to_float(src, dst) {
                Ok(n) => dst[n..].fill(0.0),
                Err(_) => dst.fill(0.0),
            }
        }

        let timestamp_ns = clock::monotonic_ns();
        let scratch = &set.scratch;
        let silence = &set.silence[..];

        self.bindings.for_each_live(|binding| {
            let count = binding.channels().min(MAX_AUDIO_CHANNELS);
            let mut channels: [&[f32]; MAX_AUDIO_CHANNELS] = [silence; MAX_AUDIO_CHANNELS];
            for (channel, slot) in channels.iter_mut().enumerate().take(count) {
                let route = binding.raw_route(channel);
                if route >= 0 && (route as usize) < inputs.min(64) && wanted & (1u64 << route) != 0 {
                    let start = route as usize * block;
                    *slot = &scratch[start..start + block];
                }
            }
            binding.sink().on_audio(&AudioFrame {
                sample_rate: set.sample_rate,
                frames: block,
                timestamp_ns,
                channels: &channels[..count],
            });
        });

        // Unsupported outputs are left alone: their real layout is unknown
        for (buffer, format) in set.outputs.iter().zip(&set.output_formats) {
            if format.is_supported() {
                let dst = unsafe { buffer.half_mut(index) };
                let _ = format.convert_from_float(silence, dst);
            }
        }
    }
}

impl CallbackTarget for StreamShared {
    fn buffer_switch(&self, index: usize) {
        self.callback_count.fetch_add(1, Ordering::Relaxed);

        if let Some(mut guard) = self.buffers.try_lock() {
            if let Some(set) = guard.as_mut() {
                if self.started.load(Ordering::Acquire) {
                    self.process(set, index & 1);
                }
                if set.post_output {
                    let _ = set.driver.output_ready();
                }
            }
        }

        self.called_back.store(true, Ordering::Release);
        self.heartbeat.notify_all();
    }

    fn message(&self, selector: i32, value: i32) -> i32 {
        messages::handle_message(self, selector, value)
    }

    fn sample_rate_changed(&self, rate: f64) {
        log::info!("{}: driver sample rate changed to {}", self.name, rate);
        self.request_reset("sample rate change");
    }
}

impl MessageContext for StreamShared {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn request_reset(&self, reason: &str) {
        match self.reset.request() {
            ResetRequest::Queued => log::info!("{}: restart requested ({})", self.name, reason),
            ResetRequest::Coalesced => log::debug!("{}: restart already pending ({})", self.name, reason),
            ResetRequest::Absorbed => log::debug!("{}: restart in progress ({})", self.name, reason),
        }
    }

    fn record_overload(&self) {
        self.xruns.fetch_add(1, Ordering::Relaxed);
    }
}
