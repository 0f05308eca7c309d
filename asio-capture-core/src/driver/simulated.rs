//! In-process driver for tests and development.
//!
//! `SimulatedDriver` behaves like a well-mannered hardware driver: it
//! allocates real double buffers, and once started a timer thread fills the
//! input halves and raises buffer switches on alternating halves. Input
//! channel `c` carries the constant `(c + 1) / 100` encoded in the channel's
//! sample format, so routing is observable in delivered frames.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use super::buffers::DoubleBuffer;
use super::callbacks::HostCallbacks;
use crate::models::device_models::{
    BufferRequest, BufferSizes, ChannelInfo, ClockSource, DriverId, DriverInfo, SampleType,
};
use crate::models::error::{AsioError, DriverError};
use crate::processing::sample_format::SampleFormat;
use crate::traits::driver::{AsioDriver, DriverEnumerator, DriverLoader};

/// Behaviour of one simulated driver.
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    pub name: String,
    pub inputs: usize,
    pub outputs: usize,
    pub input_type: SampleType,
    pub output_type: SampleType,
    /// Per-channel input format overrides.
    pub input_type_overrides: Vec<(usize, SampleType)>,
    pub buffer_sizes: BufferSizes,
    pub supported_rates: Vec<f64>,
    pub initial_rate: f64,
    pub clock_sources: usize,
    /// `setSampleRate` answers `NoClock` until a clock source is set.
    pub rate_needs_clock: bool,
    pub post_output: bool,
    pub can_report_overload: bool,
    /// When false the driver starts but never calls back.
    pub delivers_callbacks: bool,
    /// `createBuffers` fails for any size but the preferred one.
    pub reject_non_preferred_sizes: bool,
    pub init_succeeds: bool,
    pub error_message: String,
    pub panic_on_load: bool,
    pub panic_on_release: bool,
    pub control_panel_delay: Duration,
    pub tick_interval: Duration,
}

impl SimulatedConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn input_type_for(&self, channel: usize) -> SampleType {
        self.input_type_overrides
            .iter()
            .find(|(c, _)| *c == channel)
            .map(|(_, t)| *t)
            .unwrap_or(self.input_type)
    }
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            name: "Simulated ASIO".into(),
            inputs: 8,
            outputs: 2,
            input_type: SampleType::Float32Lsb,
            output_type: SampleType::Int32Lsb,
            input_type_overrides: Vec::new(),
            buffer_sizes: BufferSizes {
                min: 64,
                max: 4096,
                preferred: 256,
                granularity: 64,
            },
            supported_rates: vec![44100.0, 48000.0, 96000.0],
            initial_rate: 48000.0,
            clock_sources: 1,
            rate_needs_clock: false,
            post_output: true,
            can_report_overload: true,
            delivers_callbacks: true,
            reject_non_preferred_sizes: false,
            init_succeeds: true,
            error_message: String::new(),
            panic_on_load: false,
            panic_on_release: false,
            control_panel_delay: Duration::ZERO,
            tick_interval: Duration::from_millis(2),
        }
    }
}

/// The constant a simulated input channel carries.
pub fn simulated_input_level(channel: usize) -> f32 {
    (channel as f32 + 1.0) / 100.0
}

struct Allocation {
    // Backing memory for the handed-out double buffers
    _storage: Vec<Box<[u8]>>,
    requests: Vec<BufferRequest>,
    buffers: Vec<DoubleBuffer>,
    block_size: usize,
}

struct State {
    rate: f64,
    preferred: usize,
    current_clock: Option<i32>,
    allocation: Option<Allocation>,
    callbacks: Option<HostCallbacks>,
    initialised: bool,
}

/// Call counters, for assertions.
#[derive(Debug, Default)]
pub struct SimulatedStats {
    pub inits: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub creates: AtomicUsize,
    pub disposes: AtomicUsize,
    pub output_ready_calls: AtomicUsize,
    pub buffer_switches: AtomicUsize,
    pub control_panels: AtomicUsize,
    created_sizes: Mutex<Vec<usize>>,
}

impl SimulatedStats {
    /// Block sizes passed to `createBuffers`, in call order.
    pub fn created_sizes(&self) -> Vec<usize> {
        self.created_sizes.lock().clone()
    }
}

pub struct SimulatedDriver {
    config: SimulatedConfig,
    state: Mutex<State>,
    stats: Arc<SimulatedStats>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedDriver {
    pub fn new(config: SimulatedConfig) -> Self {
        let state = State {
            rate: config.initial_rate,
            preferred: config.buffer_sizes.preferred,
            current_clock: None,
            allocation: None,
            callbacks: None,
            initialised: false,
        };
        Self {
            config,
            state: Mutex::new(state),
            stats: Arc::new(SimulatedStats::default()),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SimulatedConfig {
        &self.config
    }

    pub fn stats(&self) -> &SimulatedStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn current_block_size(&self) -> Option<usize> {
        self.state.lock().allocation.as_ref().map(|a| a.block_size)
    }

    /// Change the preferred size, as a user would from the control panel.
    pub fn set_preferred_size(&self, size: usize) {
        self.state.lock().preferred = size;
    }

    /// Deliver `asioMessage(selector, value)` from the driver side.
    pub fn send_message(&self, selector: i32, value: i32) -> i32 {
        let callbacks = self.state.lock().callbacks;
        callbacks.map_or(0, |cb| cb.message(selector, value))
    }

    /// Deliver `sampleRateDidChange(rate)` from the driver side.
    pub fn notify_sample_rate_changed(&self, rate: f64) {
        let callbacks = {
            let mut state = self.state.lock();
            state.rate = rate;
            state.callbacks
        };
        if let Some(cb) = callbacks {
            cb.sample_rate_changed(rate);
        }
    }

    fn stop_worker(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn spawn_worker(&self, allocation: &Allocation, callbacks: HostCallbacks) {
        let inputs: Vec<(DoubleBuffer, SampleFormat, f32)> = allocation
            .requests
            .iter()
            .zip(&allocation.buffers)
            .filter(|(request, _)| request.is_input)
            .map(|(request, buffer)| {
                (
                    *buffer,
                    SampleFormat::from_type(self.config.input_type_for(request.channel)),
                    simulated_input_level(request.channel),
                )
            })
            .collect();
        let block_size = allocation.block_size;
        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);
        let interval = self.config.tick_interval;

        let spawned = thread::Builder::new()
            .name("simulated-asio".into())
            .spawn(move || {
                let mut samples = vec![0.0f32; block_size];
                let mut half = 0;
                while running.load(Ordering::SeqCst) {
                    for (buffer, format, level) in &inputs {
                        samples.fill(*level);
                        // Unsupported formats are left as whatever bytes are there
                        let _ = format.convert_from_float(&samples, unsafe { buffer.half_mut(half) });
                    }
                    stats.buffer_switches.fetch_add(1, Ordering::SeqCst);
                    callbacks.buffer_switch(half);
                    half ^= 1;
                    thread::sleep(interval);
                }
            });

        match spawned {
            Ok(handle) => *self.worker.lock() = Some(handle),
            Err(e) => log::error!("simulated driver: can't spawn worker: {}", e),
        }
    }
}

impl AsioDriver for SimulatedDriver {
    fn init(&self) -> bool {
        self.stats.inits.fetch_add(1, Ordering::SeqCst);
        self.state.lock().initialised = self.config.init_succeeds;
        self.config.init_succeeds
    }

    fn driver_name(&self) -> String {
        self.config.name.clone()
    }

    fn error_message(&self) -> String {
        self.config.error_message.clone()
    }

    fn start(&self) -> Result<(), DriverError> {
        let state = self.state.lock();
        let (Some(allocation), Some(callbacks)) = (state.allocation.as_ref(), state.callbacks) else {
            return Err(DriverError::InvalidMode);
        };
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stats.starts.fetch_add(1, Ordering::SeqCst);
        if self.config.delivers_callbacks {
            self.spawn_worker(allocation, callbacks);
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), DriverError> {
        self.stats.stops.fetch_add(1, Ordering::SeqCst);
        self.stop_worker();
        Ok(())
    }

    fn channels(&self) -> Result<(usize, usize), DriverError> {
        if !self.state.lock().initialised {
            return Err(DriverError::NotPresent);
        }
        Ok((self.config.inputs, self.config.outputs))
    }

    fn latencies(&self) -> Result<(usize, usize), DriverError> {
        let state = self.state.lock();
        let block = state
            .allocation
            .as_ref()
            .map_or(state.preferred, |a| a.block_size);
        Ok((block + 32, block + 64))
    }

    fn buffer_sizes(&self) -> Result<BufferSizes, DriverError> {
        Ok(BufferSizes {
            preferred: self.state.lock().preferred,
            ..self.config.buffer_sizes
        })
    }

    fn can_sample_rate(&self, rate: f64) -> Result<(), DriverError> {
        if self.config.supported_rates.contains(&rate) {
            Ok(())
        } else {
            Err(DriverError::NoClock)
        }
    }

    fn sample_rate(&self) -> Result<f64, DriverError> {
        Ok(self.state.lock().rate)
    }

    fn set_sample_rate(&self, rate: f64) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        if self.config.rate_needs_clock && state.current_clock.is_none() {
            return Err(DriverError::NoClock);
        }
        if !self.config.supported_rates.contains(&rate) {
            return Err(DriverError::InvalidParameter);
        }
        state.rate = rate;
        Ok(())
    }

    fn clock_sources(&self) -> Result<Vec<ClockSource>, DriverError> {
        let current = self.state.lock().current_clock;
        Ok((0..self.config.clock_sources as i32)
            .map(|index| ClockSource {
                index,
                associated_channel: -1,
                associated_group: -1,
                is_current: current == Some(index),
                name: if index == 0 {
                    "Internal".to_string()
                } else {
                    format!("External {}", index)
                },
            })
            .collect())
    }

    fn set_clock_source(&self, index: i32) -> Result<(), DriverError> {
        if index < 0 || index as usize >= self.config.clock_sources {
            return Err(DriverError::InvalidParameter);
        }
        self.state.lock().current_clock = Some(index);
        Ok(())
    }

    fn channel_info(&self, channel: usize, is_input: bool) -> Result<ChannelInfo, DriverError> {
        let count = if is_input {
            self.config.inputs
        } else {
            self.config.outputs
        };
        if channel >= count {
            return Err(DriverError::InvalidParameter);
        }

        let is_active = self.state.lock().allocation.as_ref().is_some_and(|a| {
            a.requests
                .iter()
                .any(|r| r.is_input == is_input && r.channel == channel)
        });
        let (sample_type, prefix) = if is_input {
            (self.config.input_type_for(channel), "Input")
        } else {
            (self.config.output_type, "Output")
        };

        Ok(ChannelInfo {
            channel,
            is_input,
            is_active,
            group: 0,
            sample_type,
            name: format!("{} {}", prefix, channel + 1),
        })
    }

    fn create_buffers(
        &self,
        requests: &[BufferRequest],
        block_size: usize,
        callbacks: HostCallbacks,
    ) -> Result<Vec<DoubleBuffer>, DriverError> {
        self.stats.creates.fetch_add(1, Ordering::SeqCst);
        self.stats.created_sizes.lock().push(block_size);

        let mut state = self.state.lock();
        if state.allocation.is_some() {
            return Err(DriverError::InvalidMode);
        }
        let sizes = self.config.buffer_sizes;
        if block_size < sizes.min || block_size > sizes.max {
            return Err(DriverError::InvalidParameter);
        }
        if self.config.reject_non_preferred_sizes && block_size != state.preferred {
            return Err(DriverError::InvalidMode);
        }

        let mut storage = Vec::with_capacity(requests.len());
        let mut buffers = Vec::with_capacity(requests.len());
        for request in requests {
            let sample_type = if request.is_input {
                self.config.input_type_for(request.channel)
            } else {
                self.config.output_type
            };
            let len = SampleFormat::from_type(sample_type).bytes_for(block_size);
            let mut memory = vec![0u8; len * 2].into_boxed_slice();
            let base = memory.as_mut_ptr();
            // Both halves live inside `memory`, which outlives the allocation
            buffers.push(unsafe { DoubleBuffer::from_raw([base, base.add(len)], len) });
            storage.push(memory);
        }

        state.allocation = Some(Allocation {
            _storage: storage,
            requests: requests.to_vec(),
            buffers: buffers.clone(),
            block_size,
        });
        state.callbacks = Some(callbacks);
        Ok(buffers)
    }

    fn dispose_buffers(&self) -> Result<(), DriverError> {
        self.stop_worker();
        let mut state = self.state.lock();
        state.callbacks = None;
        match state.allocation.take() {
            Some(_) => {
                self.stats.disposes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(DriverError::InvalidMode),
        }
    }

    fn control_panel(&self) -> Result<(), DriverError> {
        self.stats.control_panels.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.config.control_panel_delay);
        Ok(())
    }

    fn output_ready(&self) -> Result<(), DriverError> {
        if !self.config.post_output {
            return Err(DriverError::NotPresent);
        }
        self.stats.output_ready_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn can_report_overload(&self) -> bool {
        self.config.can_report_overload
    }
}

impl Drop for SimulatedDriver {
    fn drop(&mut self) {
        self.stop_worker();
        if self.config.panic_on_release && !thread::panicking() {
            panic!("simulated driver crashed while being released");
        }
    }
}

/// Loads `SimulatedDriver`s by name.
#[derive(Default)]
pub struct SimulatedLoader {
    configs: Mutex<HashMap<String, SimulatedConfig>>,
    loaded: Mutex<HashMap<String, Weak<SimulatedDriver>>>,
    loads: AtomicUsize,
}

impl SimulatedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_driver(self, config: SimulatedConfig) -> Self {
        self.add(config);
        self
    }

    pub fn add(&self, config: SimulatedConfig) {
        self.configs.lock().insert(config.name.clone(), config);
    }

    /// The live instance most recently loaded under `name`.
    pub fn driver(&self, name: &str) -> Option<Arc<SimulatedDriver>> {
        self.loaded.lock().get(name).and_then(Weak::upgrade)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// An enumerator listing every configured driver.
    pub fn enumerator(&self) -> SimulatedEnumerator {
        let mut names: Vec<String> = self.configs.lock().keys().cloned().collect();
        names.sort();
        SimulatedEnumerator::new(names)
    }
}

impl DriverLoader for SimulatedLoader {
    fn load(&self, info: &DriverInfo) -> Result<Arc<dyn AsioDriver>, AsioError> {
        let config = self
            .configs
            .lock()
            .get(&info.name)
            .cloned()
            .ok_or_else(|| AsioError::DriverNotFound(info.name.clone()))?;

        if config.panic_on_load {
            panic!("simulated driver crashed during instantiation");
        }

        self.loads.fetch_add(1, Ordering::SeqCst);
        let driver = Arc::new(SimulatedDriver::new(config));
        self.loaded
            .lock()
            .insert(info.name.clone(), Arc::downgrade(&driver));
        Ok(driver)
    }
}

/// A fixed driver list.
#[derive(Debug, Clone, Default)]
pub struct SimulatedEnumerator {
    drivers: Vec<DriverInfo>,
}

impl SimulatedEnumerator {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let drivers = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| DriverInfo {
                name: name.into(),
                id: DriverId(format!("{{00000000-0000-0000-0000-{:012X}}}", i + 1)),
            })
            .collect();
        Self { drivers }
    }
}

impl DriverEnumerator for SimulatedEnumerator {
    fn enumerate(&self) -> Result<Vec<DriverInfo>, AsioError> {
        Ok(self.drivers.clone())
    }
}
