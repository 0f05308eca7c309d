use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use super::binding::ClientBinding;
use super::reset::{spawn_reset_worker, ResetSignal};
use super::stream::{BufferSet, StreamShared};
use crate::driver::buffers::DoubleBuffer;
use crate::driver::callbacks::{self, CallbackTarget, DeviceToken, HostCallbacks};
use crate::driver::guard::guarded;
use crate::models::config::DeviceConfiguration;
use crate::models::device_models::{
    BufferRequest, BufferSizes, ClockSource, DeviceDiagnostics, DriverInfo,
};
use crate::models::error::{log_driver_error, AsioError, DriverError};
use crate::models::state::DeviceState;
use crate::processing::negotiation::{self, MAX_REQUEST_SIZE, MIN_REQUEST_SIZE, STANDARD_SAMPLE_RATES};
use crate::processing::sample_format::SampleFormat;
use crate::traits::device_delegate::DeviceDelegate;
use crate::traits::driver::{AsioDriver, DriverLoader};

/// Control-side state, guarded by `Device::control`.
struct ControlState {
    driver: Option<Arc<dyn AsioDriver>>,
    state: DeviceState,
    need_to_reset: bool,
    should_use_preferred_size: bool,
    post_output: bool,
    buffers_created: bool,
    can_report_overload: bool,
    input_count: usize,
    output_count: usize,
    input_names: Vec<String>,
    output_names: Vec<String>,
    sample_rates: Vec<f64>,
    buffer_sizes: BufferSizes,
    legal_sizes: Vec<usize>,
    clocks: Vec<ClockSource>,
    sample_rate: f64,
    block_size: usize,
    bit_depth: u32,
    input_latency: usize,
    output_latency: usize,
    input_format: String,
    output_format: String,
    unsupported_channels: Vec<String>,
    opened_at: Option<String>,
    last_error: Option<AsioError>,
}

impl ControlState {
    fn new() -> Self {
        Self {
            driver: None,
            state: DeviceState::Closed,
            need_to_reset: false,
            should_use_preferred_size: false,
            post_output: true,
            buffers_created: false,
            can_report_overload: false,
            input_count: 0,
            output_count: 0,
            input_names: Vec::new(),
            output_names: Vec::new(),
            sample_rates: Vec::new(),
            buffer_sizes: BufferSizes::default(),
            legal_sizes: Vec::new(),
            clocks: Vec::new(),
            sample_rate: 0.0,
            block_size: 0,
            bit_depth: 16,
            input_latency: 0,
            output_latency: 0,
            input_format: String::new(),
            output_format: String::new(),
            unsupported_channels: Vec::new(),
            opened_at: None,
            last_error: None,
        }
    }
}

/// One hardware interface driven through its ASIO driver.
///
/// A `Device` owns the driver instance, negotiates rate, block size and
/// clock, allocates the hardware buffers, and fans captured audio out to its
/// attached bindings. It is shared as `Arc<Device>`; every method takes
/// `&self` and control operations serialise on an internal lock.
///
/// ```text
/// driver thread ──buffer_switch──► StreamShared ──► BindingList ──► AudioSink
///        │
///        └──asio_message──► ResetSignal ──► "asio-reset" worker ──► close/open
/// ```
///
/// Delegate callbacks run while the control lock is held; a delegate must
/// not call back into the device.
pub struct Device {
    name: String,
    driver_info: DriverInfo,
    config: DeviceConfiguration,
    loader: Arc<dyn DriverLoader>,
    token: DeviceToken,
    control: Mutex<ControlState>,
    busy: Mutex<bool>,
    idle: Condvar,
    stream: Arc<StreamShared>,
    reset: Arc<ResetSignal>,
    delegate: RwLock<Option<Arc<dyn DeviceDelegate>>>,
    reset_worker: Mutex<Option<JoinHandle<()>>>,
}

impl Device {
    /// Create a device and open its control connection.
    ///
    /// Driver failures here don't fail construction: they are recorded as
    /// the last error and `open` retries the connection.
    pub fn new(
        driver_info: DriverInfo,
        config: DeviceConfiguration,
        loader: Arc<dyn DriverLoader>,
    ) -> Result<Arc<Self>, AsioError> {
        config.validate()?;

        let name = driver_info.name.clone();
        let reset = Arc::new(ResetSignal::default());
        let stream = Arc::new(StreamShared::new(&name, Arc::clone(&reset)));
        let token = DeviceToken::next();
        let target: Weak<dyn CallbackTarget> = Arc::downgrade(&stream) as Weak<dyn CallbackTarget>;
        callbacks::register(token, target);

        let device = Arc::new(Self {
            name,
            driver_info,
            config,
            loader,
            token,
            control: Mutex::new(ControlState::new()),
            busy: Mutex::new(false),
            idle: Condvar::new(),
            stream,
            reset: Arc::clone(&reset),
            delegate: RwLock::new(None),
            reset_worker: Mutex::new(None),
        });

        let worker = spawn_reset_worker(Arc::downgrade(&device), reset).map_err(|e| {
            AsioError::DriverInitFailed(format!("can't spawn reset worker: {}", e))
        })?;
        *device.reset_worker.lock() = Some(worker);

        {
            let mut c = device.control.lock();
            let _ = device.open_control_connection(&mut c);
        }

        Ok(device)
    }

    pub fn set_delegate(&self, delegate: Arc<dyn DeviceDelegate>) {
        *self.delegate.write() = Some(delegate);
    }

    // --- Lifecycle ---

    /// Open and start the stream.
    ///
    /// Closes first if already open. `block_size` is a request; see
    /// `current_block_size` for what was negotiated.
    pub fn open(&self, sample_rate: f64, block_size: usize) -> Result<(), AsioError> {
        let mut c = self.control.lock();
        self.set_busy(true);
        let result = self.open_locked(&mut c, sample_rate, block_size);
        self.set_busy(false);
        result
    }

    /// Stop the stream, release the buffers and detach every binding.
    ///
    /// Idempotent. The driver stays loaded for the next `open`.
    pub fn close(&self) {
        let mut c = self.control.lock();
        self.close_locked(&mut c);
    }

    fn close_locked(&self, c: &mut ControlState) {
        self.set_busy(true);
        if !c.state.is_closed() {
            log::info!("{}: closing", self.name);
        }
        self.shutdown_stream(c);
        self.stream.bindings().clear();
        self.stream.reset_counters();
        self.set_busy(false);
    }

    /// Show the driver's settings panel.
    ///
    /// Returns true when the panel stayed up long enough that the user
    /// probably changed the buffer size; the next open then uses the
    /// preferred size.
    pub fn show_control_panel(&self) -> Result<bool, AsioError> {
        let driver = self
            .control
            .lock()
            .driver
            .clone()
            .ok_or_else(|| AsioError::DriverNotFound(self.name.clone()))?;

        log::info!("{}: showing control panel", self.name);
        self.set_busy(true);
        let started = Instant::now();
        let result = guarded("control panel", || driver.control_panel());
        let spent = started.elapsed();
        self.set_busy(false);
        log::debug!("{}: control panel spent {:?}", self.name, spent);

        let _ = log_driver_error("controlPanel", result?);

        let changed = spent > self.config.control_panel_slow();
        if changed {
            self.control.lock().should_use_preferred_size = true;
        }
        Ok(changed)
    }

    // --- Bindings ---

    /// Attach a binding to the stream and return its position.
    pub fn add_binding(&self, binding: Arc<ClientBinding>) -> Result<usize, AsioError> {
        let _c = self.control.lock();
        self.stream.bindings().insert(binding)
    }

    /// Detach the binding at `index`. Closes the device when it was the
    /// last one. Returns the number of bindings left.
    pub fn remove_binding(&self, index: usize) -> Result<usize, AsioError> {
        let mut c = self.control.lock();
        if self.stream.bindings().remove(index).is_none() {
            return Err(AsioError::InvalidHandle);
        }

        let active = self.stream.bindings().active();
        if active == 0 {
            log::info!("{}: last binding detached", self.name);
            self.close_locked(&mut c);
        }
        Ok(active)
    }

    pub fn binding(&self, index: usize) -> Option<Arc<ClientBinding>> {
        self.stream.bindings().get(index)
    }

    pub fn active_bindings(&self) -> usize {
        self.stream.bindings().active()
    }

    // --- Queries ---

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver_info(&self) -> &DriverInfo {
        &self.driver_info
    }

    pub fn config(&self) -> &DeviceConfiguration {
        &self.config
    }

    pub fn state(&self) -> DeviceState {
        self.control.lock().state.clone()
    }

    /// Whether hardware buffers are allocated.
    pub fn is_open(&self) -> bool {
        self.control.lock().state.holds_buffers()
    }

    pub fn is_started(&self) -> bool {
        self.stream.is_started()
    }

    /// Whether a callback has arrived since the last start.
    pub fn has_called_back(&self) -> bool {
        self.stream.has_called_back()
    }

    pub fn input_channel_names(&self) -> Vec<String> {
        self.control.lock().input_names.clone()
    }

    pub fn output_channel_names(&self) -> Vec<String> {
        self.control.lock().output_names.clone()
    }

    pub fn input_channel_count(&self) -> usize {
        self.control.lock().input_count
    }

    pub fn output_channel_count(&self) -> usize {
        self.control.lock().output_count
    }

    pub fn available_sample_rates(&self) -> Vec<f64> {
        self.control.lock().sample_rates.clone()
    }

    pub fn available_buffer_sizes(&self) -> Vec<usize> {
        self.control.lock().legal_sizes.clone()
    }

    pub fn default_buffer_size(&self) -> usize {
        self.control.lock().buffer_sizes.preferred
    }

    /// Clock sources as last read from the driver.
    pub fn clock_sources(&self) -> Vec<ClockSource> {
        self.control.lock().clocks.clone()
    }

    pub fn current_block_size(&self) -> usize {
        self.control.lock().block_size
    }

    pub fn current_sample_rate(&self) -> f64 {
        self.control.lock().sample_rate
    }

    pub fn current_bit_depth(&self) -> u32 {
        self.control.lock().bit_depth
    }

    pub fn input_latency(&self) -> usize {
        self.control.lock().input_latency
    }

    pub fn output_latency(&self) -> usize {
        self.control.lock().output_latency
    }

    /// Overloads since the last open, or `None` if the driver can't
    /// report them.
    pub fn xrun_count(&self) -> Option<u64> {
        let reports = self.control.lock().can_report_overload;
        reports.then(|| self.stream.xruns())
    }

    pub fn last_error(&self) -> Option<AsioError> {
        self.control.lock().last_error.clone()
    }

    pub fn diagnostics(&self) -> DeviceDiagnostics {
        let c = self.control.lock();
        DeviceDiagnostics {
            callback_count: self.stream.callback_count(),
            xruns: c.can_report_overload.then(|| self.stream.xruns()),
            input_latency: c.input_latency,
            output_latency: c.output_latency,
            sample_rate: c.sample_rate,
            block_size: c.block_size,
            bit_depth: c.bit_depth,
            input_format: c.input_format.clone(),
            output_format: c.output_format.clone(),
            unsupported_channels: c.unsupported_channels.clone(),
            opened_at: c.opened_at.clone(),
        }
    }

    // --- Deferred reset ---

    /// Body of the reset worker: wait for the device to go idle, then
    /// close and re-open it with the previous settings.
    pub(crate) fn run_deferred_reset(&self) {
        if !self.wait_until_idle() {
            return;
        }

        let mut c = self.control.lock();
        if !c.state.holds_buffers() {
            log::info!("{}: restart requested while closed, reloading driver on next open", self.name);
            c.need_to_reset = true;
            return;
        }

        self.set_busy(true);
        log::info!("{}: restart request!", self.name);
        self.transition(&mut c, DeviceState::Resetting);

        let (rate, block) = (c.sample_rate, c.block_size);
        self.shutdown_stream(&mut c);
        c.need_to_reset = true;
        let result = self.open_locked(&mut c, rate, block);
        self.reload_channel_names(&mut c);
        self.set_busy(false);
        drop(c);

        match result {
            Ok(()) => {
                if let Some(delegate) = self.delegate.read().clone() {
                    delegate.on_reset(&self.name);
                }
            }
            Err(e) => log::error!("{}: restart failed: {}", self.name, e),
        }
    }

    /// Wait in bounded slices until no open, close or control panel is in
    /// progress. Returns false if the device is shutting down.
    fn wait_until_idle(&self) -> bool {
        let bound = self.config.reset_wait_interval() * self.config.reset_wait_iterations;
        let mut busy = self.busy.lock();
        loop {
            let deadline = Instant::now() + bound;
            while *busy {
                if self.idle.wait_until(&mut busy, deadline).timed_out() {
                    break;
                }
            }
            if !*busy {
                return true;
            }
            if self.reset.is_shutdown() {
                return false;
            }
            log::debug!("{}: device busy, waiting again before restart", self.name);
        }
    }

    fn set_busy(&self, value: bool) {
        *self.busy.lock() = value;
        if !value {
            self.idle.notify_all();
        }
    }

    // --- Internal helpers ---

    fn transition(&self, c: &mut ControlState, state: DeviceState) {
        log::debug!("{}: {} -> {}", self.name, c.state.name(), state.name());
        if let DeviceState::Error(ref e) = state {
            c.last_error = Some(e.clone());
        }
        c.state = state.clone();

        if let Some(delegate) = self.delegate.read().clone() {
            delegate.on_state_changed(&self.name, &state);
            if let DeviceState::Error(ref e) = state {
                delegate.on_error(&self.name, e);
            }
        }
    }

    fn open_locked(
        &self,
        c: &mut ControlState,
        sample_rate: f64,
        block_size: usize,
    ) -> Result<(), AsioError> {
        if c.state.holds_buffers() || self.stream.has_buffers() {
            self.shutdown_stream(c);
        }

        if !(MIN_REQUEST_SIZE..=MAX_REQUEST_SIZE).contains(&block_size) {
            c.should_use_preferred_size = true;
        }

        if c.driver.is_none() {
            if let Err(e) = self.open_control_connection(c) {
                self.transition(c, DeviceState::Error(e.clone()));
                return Err(e);
            }
        }
        let Some(driver) = c.driver.clone() else {
            let e = AsioError::DriverNotFound(self.name.clone());
            self.transition(c, DeviceState::Error(e.clone()));
            return Err(e);
        };

        self.transition(c, DeviceState::Opening);
        self.stream.set_started(false);
        c.last_error = None;

        match self.start_stream(c, driver, sample_rate, block_size) {
            Ok(()) => {
                c.need_to_reset = false;
                Ok(())
            }
            Err(e) => {
                log::error!("{}: {}", self.name, e);
                self.stream.set_started(false);
                self.dispose_buffers(c);
                c.need_to_reset = false;
                if !c.state.is_closed() {
                    self.transition(c, DeviceState::Closed);
                }
                self.transition(c, DeviceState::Error(e.clone()));
                Err(e)
            }
        }
    }

    fn start_stream(
        &self,
        c: &mut ControlState,
        mut driver: Arc<dyn AsioDriver>,
        requested_rate: f64,
        requested_block: usize,
    ) -> Result<(), AsioError> {
        let (inputs, outputs) = driver
            .channels()
            .map_err(|e| AsioError::DriverInitFailed(format!("can't detect asio channels: {}", e)))?;
        self.apply_channel_counts(c, inputs, outputs);

        self.update_sample_rates(c, &driver);
        let target_rate = negotiation::choose_sample_rate(
            requested_rate,
            &c.sample_rates,
            self.config.fallback_sample_rate,
        );

        self.update_clock_sources(c, &driver);
        c.sample_rate = log_driver_error("getSampleRate", driver.sample_rate()).unwrap_or(0.0);
        self.set_sample_rate(c, &driver, target_rate);

        let mut block = self.read_buffer_sizes(c, &driver, requested_block);

        // a rate change can change the channel count
        if let Ok((inputs, outputs)) = log_driver_error("getChannels", driver.channels()) {
            self.apply_channel_counts(c, inputs, outputs);
        }

        c.can_report_overload = driver.can_report_overload();
        self.stream.reset_counters();

        if c.need_to_reset {
            log::info!("{}: resetting driver", self.name);
            let stale = driver;
            let _ = guarded("driver release", move || drop(stale));
            self.release_driver(c);
            driver = self.load_driver()?;
            c.driver = Some(Arc::clone(&driver));
            match self.init_driver(&driver) {
                Ok(()) => {
                    let _ = log_driver_error("setSampleRate", driver.set_sample_rate(c.sample_rate));
                }
                Err(e) => log::error!("{}: ASIOInit: {}", self.name, e),
            }
            c.need_to_reset = false;
        }

        let requests: Vec<BufferRequest> = (0..c.input_count)
            .map(|channel| BufferRequest { is_input: true, channel })
            .chain((0..c.output_count).map(|channel| BufferRequest { is_input: false, channel }))
            .collect();

        self.stream.take();
        log::debug!("{}: disposing buffers", self.name);
        let _ = driver.dispose_buffers();
        c.buffers_created = false;

        let callbacks = HostCallbacks::new(self.token);
        log::info!("{}: creating buffers: {}, size: {}", self.name, requests.len(), block);
        let buffers = match driver.create_buffers(&requests, block, callbacks) {
            Ok(buffers) => buffers,
            Err(e) => {
                log::error!("{}: error create buffers, retrying with preferred size - {}", self.name, e);
                block = negotiation::clamped_preferred(&c.buffer_sizes);
                let _ = driver.dispose_buffers();
                log_driver_error("createBuffers", driver.create_buffers(&requests, block, callbacks))
                    .map_err(AsioError::BufferCreationFailed)?
            }
        };
        c.buffers_created = true;
        c.block_size = block;

        if buffers.len() != requests.len() {
            return Err(AsioError::BufferCreationFailed(DriverError::InvalidParameter));
        }

        let layout = self.read_formats(c, &driver, &requests, buffers);
        let first_format = |is_input: bool| {
            layout
                .iter()
                .find(|(request, _, _)| request.is_input == is_input)
                .map(|(_, _, format)| format.describe())
                .unwrap_or_default()
        };
        c.input_format = first_format(true);
        c.output_format = first_format(false);
        log::info!(
            "{}: input sample format: {}, output sample format: {}",
            self.name,
            c.input_format,
            c.output_format
        );
        let set = BufferSet::new(Arc::clone(&driver), layout, block, c.sample_rate, c.post_output);

        self.read_latencies(c, &driver);
        if let Err(e) = self.refresh_buffer_sizes(c, &driver) {
            log::error!("{}: error getBufferSize - {}", self.name, e);
        }

        self.stream.install(set);
        c.opened_at = Some(chrono::Utc::now().to_rfc3339());
        self.transition(c, DeviceState::Open);

        log::info!("{}: starting", self.name);
        self.stream.clear_heartbeat();
        if let Err(e) = driver.start() {
            log::error!("{}: stop on failure", self.name);
            let _ = driver.stop();
            return Err(AsioError::StartFailed(e));
        }

        if !self
            .stream
            .wait_for_heartbeat(self.config.start_timeout(), self.config.start_poll_interval())
        {
            log::error!("{}: no callbacks - stopping..", self.name);
            let _ = driver.stop();
            return Err(AsioError::DeviceDidNotStart {
                timeout_ms: self.config.start_timeout_ms,
            });
        }

        self.stream.set_started(true);
        self.transition(c, DeviceState::Started);
        log::info!(
            "{}: started at {} Hz, {} frames, {} in / {} out",
            self.name,
            c.sample_rate,
            c.block_size,
            c.input_count,
            c.output_count
        );
        Ok(())
    }

    /// Stop and release the buffers, keeping the bindings.
    fn shutdown_stream(&self, c: &mut ControlState) {
        let was_open = c.state.holds_buffers() || self.stream.has_buffers();
        self.stream.set_started(false);

        if was_open {
            if let Some(driver) = c.driver.clone() {
                log::info!("{}: stopping", self.name);
                let _ = log_driver_error("stop", driver.stop());
            }
        }
        self.dispose_buffers(c);
        c.need_to_reset = false;

        if !c.state.is_closed() {
            self.transition(c, DeviceState::Closed);
        }
    }

    fn dispose_buffers(&self, c: &mut ControlState) {
        self.stream.take();
        c.input_format.clear();
        c.output_format.clear();
        if c.buffers_created {
            c.buffers_created = false;
            if let Some(driver) = c.driver.as_ref() {
                let _ = log_driver_error("disposeBuffers", driver.dispose_buffers());
            }
        }
    }

    // --- Driver connection ---

    fn load_driver(&self) -> Result<Arc<dyn AsioDriver>, AsioError> {
        guarded("driver instantiation", || self.loader.load(&self.driver_info))?
    }

    /// Release the driver behind a fault boundary.
    fn release_driver(&self, c: &mut ControlState) {
        self.stream.take();
        c.buffers_created = false;
        if let Some(driver) = c.driver.take() {
            if let Err(e) = guarded("driver release", move || drop(driver)) {
                log::warn!("{}: driver crashed while being closed: {}", self.name, e);
            }
        }
    }

    fn init_driver(&self, driver: &Arc<dyn AsioDriver>) -> Result<(), AsioError> {
        let ok = driver.init();
        let mut message = String::new();

        // Some drivers report success from init() even when it failed
        if !ok || self.config.needs_init_error_check(&self.name) {
            message = driver.error_message();
        }
        if !ok && message.is_empty() {
            message = "driver failed to initialise".into();
        }

        if message.is_empty() {
            Ok(())
        } else {
            log::info!(
                "{}: initialization failure reported by driver: {}. The device is likely used \
                 concurrently in another application, but ASIO usually supports a single host.",
                self.name,
                message
            );
            Err(AsioError::DriverInitFailed(message))
        }
    }

    fn open_control_connection(&self, c: &mut ControlState) -> Result<(), AsioError> {
        log::info!("{}: opening device", self.name);

        c.need_to_reset = false;
        c.input_names.clear();
        c.output_names.clear();
        c.legal_sizes.clear();
        c.sample_rates.clear();
        c.input_count = 0;
        c.output_count = 0;
        c.last_error = None;
        self.stream.reset_counters();

        let result = self
            .load_driver()
            .and_then(|driver| {
                c.driver = Some(Arc::clone(&driver));
                self.prepare_driver(c, &driver)
            });

        match result {
            Ok(()) => log::info!("{}: device opened but not started yet", self.name),
            Err(ref e) => {
                log::error!("{}: {}", self.name, e);
                self.dispose_buffers(c);
                self.release_driver(c);
                c.last_error = Some(e.clone());
                if let Some(delegate) = self.delegate.read().clone() {
                    delegate.on_error(&self.name, e);
                }
            }
        }
        result
    }

    fn prepare_driver(&self, c: &mut ControlState, driver: &Arc<dyn AsioDriver>) -> Result<(), AsioError> {
        self.init_driver(driver)?;

        let (inputs, outputs) = driver
            .channels()
            .map_err(|e| AsioError::DriverInitFailed(format!("can't detect asio channels: {}", e)))?;
        log::info!("{}: channels in: {}, channels out: {}", self.name, inputs, outputs);
        self.apply_channel_counts(c, inputs, outputs);

        self.refresh_buffer_sizes(c, driver)
            .map_err(|e| AsioError::DriverInitFailed(format!("can't detect buffer sizes: {}", e)))?;

        let mut rate = log_driver_error("getSampleRate", driver.sample_rate()).unwrap_or(0.0);
        if !(1.0..=192001.0).contains(&rate) {
            log::info!("{}: setting default sample rate", self.name);
            let _ = log_driver_error(
                "setting sample rate",
                driver.set_sample_rate(self.config.fallback_sample_rate),
            );
            rate = driver.sample_rate().unwrap_or(self.config.fallback_sample_rate);
        }
        c.sample_rate = rate;

        c.post_output = driver.output_ready().is_ok();
        if c.post_output {
            log::debug!("{}: outputReady true", self.name);
        }

        self.update_sample_rates(c, driver);

        // Some drivers fail unless they see this dummy create/start/stop
        // sequence first
        self.read_latencies(c, driver);
        self.create_dummy_buffers(c, driver);
        self.read_latencies(c, driver);
        self.reload_channel_names(c);

        let _ = log_driver_error("start", driver.start());
        thread::sleep(Duration::from_millis(self.config.warmup_run_ms));
        let _ = log_driver_error("stop", driver.stop());
        self.dispose_buffers(c);

        Ok(())
    }

    fn create_dummy_buffers(&self, c: &mut ControlState, driver: &Arc<dyn AsioDriver>) {
        let preferred = c.buffer_sizes.preferred;
        if preferred == 0 {
            return;
        }

        let requests: Vec<BufferRequest> = (0..c.input_count.min(2))
            .map(|channel| BufferRequest { is_input: true, channel })
            .chain((0..c.output_count.min(2)).map(|channel| BufferRequest { is_input: false, channel }))
            .collect();
        log::info!(
            "{}: creating buffers (dummy): {} channels, size: {}",
            self.name,
            requests.len(),
            preferred
        );

        match driver.create_buffers(&requests, preferred, HostCallbacks::new(self.token)) {
            Ok(buffers) => {
                c.buffers_created = true;
                let layout = requests
                    .iter()
                    .zip(buffers)
                    .map(|(request, buffer)| {
                        let format = driver
                            .channel_info(request.channel, request.is_input)
                            .map(|info| SampleFormat::from_type(info.sample_type))
                            .unwrap_or_default();
                        (*request, buffer, format)
                    })
                    .collect();
                self.stream.install(BufferSet::new(
                    Arc::clone(driver),
                    layout,
                    preferred,
                    c.sample_rate,
                    c.post_output,
                ));
            }
            Err(e) => log::error!("{}: error create dummy buffers - {}", self.name, e),
        }
    }

    // --- Negotiation ---

    fn apply_channel_counts(&self, c: &mut ControlState, inputs: usize, outputs: usize) {
        let cap = self.config.max_channels;
        if inputs > cap || outputs > cap {
            log::warn!(
                "{}: only up to {} input + {} output channels are enabled; higher channel counts are disabled",
                self.name,
                cap,
                cap
            );
        }
        c.input_count = inputs.min(cap);
        c.output_count = outputs.min(cap);
    }

    fn refresh_buffer_sizes(&self, c: &mut ControlState, driver: &Arc<dyn AsioDriver>) -> Result<(), DriverError> {
        let sizes = driver.buffer_sizes()?;
        log::info!(
            "{}: buffer sizes {} -> {}, preferred: {}, step: {}",
            self.name,
            sizes.min,
            sizes.max,
            sizes.preferred,
            sizes.granularity
        );
        c.buffer_sizes = sizes;
        c.legal_sizes = negotiation::legal_buffer_sizes(&sizes);
        Ok(())
    }

    fn read_buffer_sizes(&self, c: &mut ControlState, driver: &Arc<dyn AsioDriver>, requested: usize) -> usize {
        let mut force = c.should_use_preferred_size;
        c.should_use_preferred_size = false;

        let sizes = match driver.buffer_sizes() {
            Ok(sizes) => sizes,
            Err(e) => {
                log::error!("{}: error getBufferSize1 - {}", self.name, e);
                return self.config.fallback_block_size;
            }
        };

        let previous = c.buffer_sizes.preferred;
        if previous != 0 && sizes.preferred != 0 && sizes.preferred != previous {
            log::info!("{}: preferred size changed from {} to {}", self.name, previous, sizes.preferred);
            force = true;
        }
        if self.config.forces_preferred_size(&self.name) {
            force = true;
        }

        c.buffer_sizes = sizes;
        c.legal_sizes = negotiation::legal_buffer_sizes(&sizes);

        let block = negotiation::negotiate_block_size(&sizes, requested, force);
        if block != requested {
            log::info!("{}: using preferred size {} for buffer (requested {})", self.name, block, requested);
        }
        block
    }

    fn update_sample_rates(&self, c: &mut ControlState, driver: &Arc<dyn AsioDriver>) {
        c.sample_rates = STANDARD_SAMPLE_RATES
            .iter()
            .copied()
            .filter(|&rate| driver.can_sample_rate(rate).is_ok())
            .collect();

        if c.sample_rates.is_empty() {
            if let Ok(current) = driver.sample_rate() {
                if current > 0.0 {
                    c.sample_rates.push(current);
                }
            }
        }
        log::debug!("{}: sample rates {:?}", self.name, c.sample_rates);
    }

    fn update_clock_sources(&self, c: &mut ControlState, driver: &Arc<dyn AsioDriver>) {
        c.clocks = match log_driver_error("getClockSources", driver.clock_sources()) {
            Ok(clocks) => clocks,
            Err(_) => Vec::new(),
        };

        if c.clocks.is_empty() {
            log::warn!("{}: driver reports no clock sources", self.name);
            return;
        }

        if c.clocks.len() > 1 && !c.clocks.iter().any(|clock| clock.is_current) {
            let first = c.clocks[0].index;
            log::info!("{}: setting clock source {}", self.name, c.clocks[0].name);
            if log_driver_error("setClockSource1", driver.set_clock_source(first)).is_ok() {
                c.clocks[0].is_current = true;
            }
        }
    }

    fn set_sample_rate(&self, c: &mut ControlState, driver: &Arc<dyn AsioDriver>, rate: f64) {
        if c.sample_rate == rate {
            return;
        }
        log::info!("{}: rate change: {} to {}", self.name, c.sample_rate, rate);

        let mut result = driver.set_sample_rate(rate);
        if result == Err(DriverError::NoClock) && !c.clocks.is_empty() {
            log::info!("{}: trying to set a clock source..", self.name);
            let _ = log_driver_error("setClockSource2", driver.set_clock_source(c.clocks[0].index));
            result = driver.set_sample_rate(rate);
        }

        match log_driver_error("setSampleRate", result) {
            Ok(()) => c.sample_rate = driver.sample_rate().unwrap_or(rate),
            Err(_) => log::warn!("{}: keeping sample rate {}", self.name, c.sample_rate),
        }
    }

    fn read_formats(
        &self,
        c: &mut ControlState,
        driver: &Arc<dyn AsioDriver>,
        requests: &[BufferRequest],
        buffers: Vec<DoubleBuffer>,
    ) -> Vec<(BufferRequest, DoubleBuffer, SampleFormat)> {
        c.unsupported_channels.clear();
        let mut bit_depth = 16;

        let layout = requests
            .iter()
            .zip(buffers)
            .map(|(request, buffer)| {
                let direction = if request.is_input { "input" } else { "output" };
                let format = match driver.channel_info(request.channel, request.is_input) {
                    Ok(info) => SampleFormat::from_type(info.sample_type),
                    Err(e) => {
                        log::error!("{}: error getChannelInfo - {}", self.name, e);
                        SampleFormat::default()
                    }
                };
                if !format.is_supported() {
                    log::warn!(
                        "{}: {} channel {} uses unsupported format {:?}; it will be silent",
                        self.name,
                        direction,
                        request.channel,
                        format.sample_type
                    );
                    c.unsupported_channels
                        .push(format!("{} {} ({:?})", direction, request.channel, format.sample_type));
                }
                bit_depth = bit_depth.max(format.bit_depth);
                (*request, buffer, format)
            })
            .collect();

        c.bit_depth = bit_depth;
        layout
    }

    fn read_latencies(&self, c: &mut ControlState, driver: &Arc<dyn AsioDriver>) {
        match driver.latencies() {
            Ok((input, output)) => {
                c.input_latency = input;
                c.output_latency = output;
                log::debug!("{}: latencies in: {}, out: {}", self.name, input, output);
            }
            Err(e) => {
                log::error!("{}: error getLatencies - {}", self.name, e);
                c.input_latency = 0;
                c.output_latency = 0;
            }
        }
    }

    fn reload_channel_names(&self, c: &mut ControlState) {
        let Some(driver) = c.driver.clone() else {
            return;
        };
        let name_of = |channel: usize, is_input: bool| {
            driver
                .channel_info(channel, is_input)
                .map(|info| info.name)
                .unwrap_or_else(|_| {
                    format!("{} {}", if is_input { "Input" } else { "Output" }, channel + 1)
                })
        };
        c.input_names = (0..c.input_count).map(|i| name_of(i, true)).collect();
        c.output_names = (0..c.output_count).map(|i| name_of(i, false)).collect();
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.reset.shutdown();
        if let Some(handle) = self.reset_worker.get_mut().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        callbacks::unregister(self.token);

        let mut c = self.control.lock();
        self.shutdown_stream(&mut c);
        self.stream.bindings().clear();
        self.release_driver(&mut c);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::device::messages;
    use crate::driver::simulated::{simulated_input_level, SimulatedConfig, SimulatedDriver, SimulatedLoader};
    use crate::models::device_models::{DriverId, Route, SampleType};
    use crate::traits::audio_sink::{AudioFrame, AudioSink};

    const NAME: &str = "Simulated ASIO";

    fn fast_config() -> DeviceConfiguration {
        DeviceConfiguration {
            start_timeout_ms: 1000,
            warmup_run_ms: 5,
            ..Default::default()
        }
    }

    fn setup(sim: SimulatedConfig, config: DeviceConfiguration) -> (Arc<Device>, Arc<SimulatedLoader>) {
        let info = DriverInfo {
            name: sim.name.clone(),
            id: DriverId("{SIM}".into()),
        };
        let loader = Arc::new(SimulatedLoader::new().with_driver(sim));
        let device = Device::new(info, config, loader.clone()).unwrap();
        (device, loader)
    }

    fn driver(loader: &SimulatedLoader, name: &str) -> Arc<SimulatedDriver> {
        loader.driver(name).unwrap()
    }

    fn wait_until(timeout: Duration, f: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        f()
    }

    #[derive(Default)]
    struct Capture {
        frames: Mutex<Vec<Vec<Vec<f32>>>>,
    }

    impl Capture {
        fn count(&self) -> usize {
            self.frames.lock().len()
        }
    }

    impl AudioSink for Capture {
        fn on_audio(&self, frame: &AudioFrame<'_>) {
            self.frames
                .lock()
                .push(frame.channels.iter().map(|c| c.to_vec()).collect());
        }
    }

    #[derive(Default)]
    struct StateLog {
        states: Mutex<Vec<&'static str>>,
        errors: Mutex<Vec<AsioError>>,
        resets: Mutex<usize>,
    }

    impl DeviceDelegate for StateLog {
        fn on_state_changed(&self, _device: &str, state: &DeviceState) {
            self.states.lock().push(state.name());
        }

        fn on_error(&self, _device: &str, error: &AsioError) {
            self.errors.lock().push(error.clone());
        }

        fn on_reset(&self, _device: &str) {
            *self.resets.lock() += 1;
        }
    }

    #[test]
    fn construction_runs_a_start_stop_warmup() {
        let (device, loader) = setup(SimulatedConfig::default(), fast_config());
        let sim = driver(&loader, NAME);
        let stats = sim.stats();

        assert_eq!(device.state(), DeviceState::Closed);
        assert!(device.last_error().is_none());
        assert_eq!(stats.inits.load(Ordering::SeqCst), 1);
        assert_eq!(stats.starts.load(Ordering::SeqCst), 1);
        assert_eq!(stats.created_sizes(), vec![256]);
        assert_eq!(stats.disposes.load(Ordering::SeqCst), 1);
        assert_eq!(device.input_channel_names().len(), 8);
        assert_eq!(device.input_channel_names()[0], "Input 1");
        assert_eq!(device.available_sample_rates(), vec![44100.0, 48000.0, 96000.0]);
        assert_eq!(device.default_buffer_size(), 256);
        assert!(device.available_buffer_sizes().contains(&256));
    }

    #[test]
    fn open_starts_the_stream() {
        let (device, loader) = setup(SimulatedConfig::default(), fast_config());

        device.open(48000.0, 512).unwrap();

        assert_eq!(device.state(), DeviceState::Started);
        assert!(device.is_started());
        assert!(device.has_called_back());
        assert_eq!(device.current_block_size(), 512);
        assert_eq!(device.current_sample_rate(), 48000.0);
        assert_eq!(device.current_bit_depth(), 32);
        assert_eq!(device.input_latency(), 512 + 32);
        assert!(driver(&loader, NAME).is_running());

        let diagnostics = device.diagnostics();
        assert!(diagnostics.opened_at.is_some());
        assert!(diagnostics.input_format.contains("Float32Lsb"));
        assert_eq!(diagnostics.xruns, Some(0));
    }

    #[test]
    fn illegal_block_size_falls_back_to_preferred() {
        let (device, _loader) = setup(SimulatedConfig::default(), fast_config());
        device.open(48000.0, 100).unwrap();
        assert_eq!(device.current_block_size(), 256);
    }

    #[test]
    fn unsupported_rate_falls_back_to_first_supported() {
        let (device, _loader) = setup(SimulatedConfig::default(), fast_config());
        device.open(22050.0, 256).unwrap();
        assert_eq!(device.current_sample_rate(), 44100.0);
    }

    #[test]
    fn no_clock_retries_with_first_clock_source() {
        let sim = SimulatedConfig {
            rate_needs_clock: true,
            ..Default::default()
        };
        let (device, loader) = setup(sim, fast_config());

        device.open(96000.0, 256).unwrap();

        assert_eq!(device.current_sample_rate(), 96000.0);
        assert!(driver(&loader, NAME).clock_sources().unwrap()[0].is_current);
    }

    #[test]
    fn buffer_creation_retries_with_preferred_size() {
        let sim = SimulatedConfig {
            reject_non_preferred_sizes: true,
            ..Default::default()
        };
        let (device, loader) = setup(sim, fast_config());

        device.open(48000.0, 512).unwrap();

        assert_eq!(device.current_block_size(), 256);
        assert_eq!(driver(&loader, NAME).stats().created_sizes(), vec![256, 512, 256]);
    }

    #[test]
    fn missing_callbacks_report_did_not_start() {
        let sim = SimulatedConfig {
            delivers_callbacks: false,
            ..Default::default()
        };
        let config = DeviceConfiguration {
            start_timeout_ms: 50,
            ..fast_config()
        };
        let (device, loader) = setup(sim, config);
        let log = Arc::new(StateLog::default());
        device.set_delegate(log.clone());

        let err = device.open(48000.0, 256).unwrap_err();

        assert_eq!(err, AsioError::DeviceDidNotStart { timeout_ms: 50 });
        assert!(!device.is_open());
        assert!(!device.is_started());
        assert_eq!(device.last_error(), Some(err.clone()));
        assert_eq!(log.errors.lock().as_slice(), &[err]);
        let states = log.states.lock().clone();
        assert_eq!(&states[states.len() - 3..], &["open", "closed", "error"]);

        let sim = driver(&loader, NAME);
        assert!(!sim.is_running());
        assert_eq!(sim.current_block_size(), None);
    }

    #[test]
    fn close_is_idempotent_and_detaches_bindings() {
        let (device, loader) = setup(SimulatedConfig::default(), fast_config());
        device.open(48000.0, 256).unwrap();
        let binding = Arc::new(ClientBinding::new(Arc::new(Capture::default()), 2).unwrap());
        device.add_binding(binding.clone()).unwrap();

        device.close();
        device.close();

        assert_eq!(device.state(), DeviceState::Closed);
        assert_eq!(device.active_bindings(), 0);
        assert!(binding.is_stopping());
        assert!(!driver(&loader, NAME).is_running());
        assert_eq!(driver(&loader, NAME).current_block_size(), None);
    }

    #[test]
    fn routed_channels_carry_the_selected_input() {
        let (device, _loader) = setup(SimulatedConfig::default(), fast_config());
        let routed = Arc::new(Capture::default());
        let muted = Arc::new(Capture::default());

        let a = Arc::new(ClientBinding::new(routed.clone(), 4).unwrap());
        a.set_route(3, Route::Input(5)).unwrap();
        a.set_route(0, Route::Input(0)).unwrap();
        let b = Arc::new(ClientBinding::new(muted.clone(), 4).unwrap());
        b.set_route(0, Route::Input(5)).unwrap();
        device.add_binding(a).unwrap();
        device.add_binding(b).unwrap();

        device.open(48000.0, 256).unwrap();
        assert!(wait_until(Duration::from_secs(2), || routed.count() >= 3 && muted.count() >= 3));
        device.close();

        for frame in routed.frames.lock().iter() {
            assert_eq!(frame.len(), 4);
            assert_eq!(frame[3].len(), 256);
            assert!(frame[3].iter().all(|&s| s == simulated_input_level(5)));
            assert!(frame[0].iter().all(|&s| s == simulated_input_level(0)));
            assert!(frame[1].iter().all(|&s| s == 0.0));
        }
        for frame in muted.frames.lock().iter() {
            assert!(frame[3].iter().all(|&s| s == 0.0));
            assert!(frame[0].iter().all(|&s| s == simulated_input_level(5)));
        }
    }

    #[test]
    fn integer_inputs_are_scaled() {
        let sim = SimulatedConfig {
            input_type: SampleType::Int24Msb,
            ..Default::default()
        };
        let (device, _loader) = setup(sim, fast_config());
        let capture = Arc::new(Capture::default());
        let binding = Arc::new(ClientBinding::new(capture.clone(), 1).unwrap());
        binding.set_route(0, Route::Input(2)).unwrap();
        device.add_binding(binding).unwrap();

        device.open(48000.0, 256).unwrap();
        assert!(wait_until(Duration::from_secs(2), || capture.count() >= 1));
        device.close();

        assert_eq!(device.current_bit_depth(), 32);
        let frames = capture.frames.lock();
        assert_abs_diff_eq!(frames[0][0][0], simulated_input_level(2), epsilon = 1e-6);
    }

    #[test]
    fn unsupported_channels_are_listed_and_silent() {
        let sim = SimulatedConfig {
            input_type_overrides: vec![(1, SampleType::DsdInt8Msb1)],
            ..Default::default()
        };
        let (device, _loader) = setup(sim, fast_config());
        let capture = Arc::new(Capture::default());
        let binding = Arc::new(ClientBinding::new(capture.clone(), 1).unwrap());
        binding.set_route(0, Route::Input(1)).unwrap();
        device.add_binding(binding).unwrap();

        device.open(48000.0, 256).unwrap();
        assert!(wait_until(Duration::from_secs(2), || capture.count() >= 1));
        let diagnostics = device.diagnostics();
        device.close();

        assert_eq!(diagnostics.unsupported_channels, vec!["input 1 (DsdInt8Msb1)".to_string()]);
        assert!(capture.frames.lock()[0][0].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn reset_request_reopens_and_keeps_bindings() {
        let (device, loader) = setup(SimulatedConfig::default(), fast_config());
        let log = Arc::new(StateLog::default());
        device.set_delegate(log.clone());

        let capture = Arc::new(Capture::default());
        let binding = Arc::new(ClientBinding::new(capture.clone(), 2).unwrap());
        binding.set_route(0, Route::Input(3)).unwrap();
        binding.set_route(1, Route::Muted).unwrap();
        let index = device.add_binding(binding).unwrap();

        device.open(48000.0, 512).unwrap();
        assert_eq!(driver(&loader, NAME).send_message(messages::RESET_REQUEST, 0), 1);

        assert!(wait_until(Duration::from_secs(5), || *log.resets.lock() == 1));
        assert_eq!(device.state(), DeviceState::Started);
        assert_eq!(loader.load_count(), 2);
        assert_eq!(device.current_block_size(), 512);

        let states = log.states.lock().clone();
        let resetting = states.iter().position(|s| *s == "resetting").unwrap();
        assert_eq!(&states[resetting..], &["resetting", "closed", "opening", "open", "started"]);

        assert_eq!(device.active_bindings(), 1);
        let kept = device.binding(index).unwrap();
        assert_eq!(kept.routing(), vec![Route::Input(3), Route::Muted]);

        let before = capture.count();
        assert!(wait_until(Duration::from_secs(2), || capture.count() > before));
        device.close();
    }

    #[test]
    fn buffer_size_change_is_coalesced() {
        let (device, loader) = setup(SimulatedConfig::default(), fast_config());
        let log = Arc::new(StateLog::default());
        device.set_delegate(log.clone());
        device.open(48000.0, 256).unwrap();

        let sim = driver(&loader, NAME);
        sim.send_message(messages::BUFFER_SIZE_CHANGE, 128);
        sim.send_message(messages::RESYNC_REQUEST, 0);
        drop(sim);

        assert!(wait_until(Duration::from_secs(5), || *log.resets.lock() >= 1));
        thread::sleep(Duration::from_millis(100));
        assert!(*log.resets.lock() <= 2);
        assert!(wait_until(Duration::from_secs(5), || device.is_started()));
        device.close();
    }

    #[test]
    fn sample_rate_notification_triggers_reset() {
        let (device, loader) = setup(SimulatedConfig::default(), fast_config());
        let log = Arc::new(StateLog::default());
        device.set_delegate(log.clone());
        device.open(48000.0, 256).unwrap();

        driver(&loader, NAME).notify_sample_rate_changed(44100.0);

        assert!(wait_until(Duration::from_secs(5), || *log.resets.lock() == 1));
        device.close();
    }

    #[test]
    fn overloads_are_reported_only_when_supported() {
        let (device, loader) = setup(SimulatedConfig::default(), fast_config());
        device.open(48000.0, 256).unwrap();
        driver(&loader, NAME).send_message(messages::OVERLOAD, 0);
        assert_eq!(device.xrun_count(), Some(1));
        device.close();

        let sim = SimulatedConfig {
            can_report_overload: false,
            ..Default::default()
        };
        let (device, _loader) = setup(sim, fast_config());
        device.open(48000.0, 256).unwrap();
        assert_eq!(device.xrun_count(), None);
        assert_eq!(device.diagnostics().xruns, None);
        device.close();
    }

    #[test]
    fn channel_counts_are_capped() {
        let sim = SimulatedConfig {
            inputs: 40,
            outputs: 34,
            ..Default::default()
        };
        let (device, _loader) = setup(sim, fast_config());
        device.open(48000.0, 256).unwrap();
        assert_eq!(device.input_channel_count(), 32);
        assert_eq!(device.output_channel_count(), 32);
        device.close();
    }

    #[test]
    fn changed_preferred_size_is_forced() {
        let (device, loader) = setup(SimulatedConfig::default(), fast_config());
        device.open(48000.0, 512).unwrap();
        assert_eq!(device.current_block_size(), 512);

        driver(&loader, NAME).set_preferred_size(128);
        device.open(48000.0, 512).unwrap();
        assert_eq!(device.current_block_size(), 128);
        device.close();
    }

    #[test]
    fn quirky_drivers_always_use_preferred_size() {
        let sim = SimulatedConfig::new("Digidesign HW ( 003 )");
        let (device, _loader) = setup(sim, fast_config());
        device.open(48000.0, 512).unwrap();
        assert_eq!(device.current_block_size(), 256);
        device.close();
    }

    #[test]
    fn slow_control_panel_forces_preferred_size() {
        let sim = SimulatedConfig {
            control_panel_delay: Duration::from_millis(40),
            ..Default::default()
        };
        let config = DeviceConfiguration {
            control_panel_slow_ms: 20,
            ..fast_config()
        };
        let (device, _loader) = setup(sim, config);

        assert!(device.show_control_panel().unwrap());
        device.open(48000.0, 512).unwrap();
        assert_eq!(device.current_block_size(), 256);
        device.close();
    }

    #[test]
    fn init_error_message_is_honoured_for_listed_drivers() {
        let sim = SimulatedConfig {
            error_message: "device in use".into(),
            ..SimulatedConfig::new("Denon DJ ASIO")
        };
        let (device, _loader) = setup(sim, fast_config());

        assert_eq!(
            device.last_error(),
            Some(AsioError::DriverInitFailed("device in use".into()))
        );
        assert!(matches!(device.open(48000.0, 256), Err(AsioError::DriverInitFailed(_))));
        assert!(matches!(device.state(), DeviceState::Error(_)));
    }

    #[test]
    fn instantiation_fault_is_contained() {
        let sim = SimulatedConfig {
            panic_on_load: true,
            ..Default::default()
        };
        let (device, _loader) = setup(sim, fast_config());

        assert!(matches!(device.last_error(), Some(AsioError::DriverFault(_))));
        assert!(matches!(device.open(48000.0, 256), Err(AsioError::DriverFault(_))));
    }

    #[test]
    fn release_fault_is_contained() {
        let sim = SimulatedConfig {
            panic_on_release: true,
            ..Default::default()
        };
        let (device, loader) = setup(sim, fast_config());
        device.open(48000.0, 256).unwrap();
        assert!(loader.driver(NAME).is_some());

        drop(device);

        assert!(loader.driver(NAME).is_none());
    }

    #[test]
    fn polling_diagnostics_keeps_audio_flowing() {
        let sim = SimulatedConfig {
            tick_interval: Duration::from_micros(200),
            ..Default::default()
        };
        let (device, _loader) = setup(sim, fast_config());
        let capture = Arc::new(Capture::default());
        let binding = Arc::new(ClientBinding::new(capture.clone(), 1).unwrap());
        binding.set_route(0, Route::Input(0)).unwrap();
        device.add_binding(binding).unwrap();
        device.open(48000.0, 64).unwrap();
        assert!(wait_until(Duration::from_secs(2), || capture.count() > 0));

        let callbacks_before = device.diagnostics().callback_count;
        let frames_before = capture.count();
        let deadline = Instant::now() + Duration::from_millis(300);
        let mut polls = 0;
        while Instant::now() < deadline {
            let diagnostics = device.diagnostics();
            assert!(diagnostics.input_format.starts_with("Float32Lsb"));
            polls += 1;
        }
        let callbacks = device.diagnostics().callback_count - callbacks_before;
        let frames = (capture.count() - frames_before) as u64;
        device.close();

        assert!(polls > 0);
        assert!(callbacks > 10);
        assert!(frames + 2 >= callbacks, "{} frames for {} callbacks", frames, callbacks);
        assert!(device.diagnostics().input_format.is_empty());
    }

    #[test]
    fn detaching_the_last_binding_never_drops_a_concurrent_attach() {
        let (device, _loader) = setup(SimulatedConfig::default(), fast_config());
        let churn = {
            let device = Arc::clone(&device);
            thread::spawn(move || {
                for _ in 0..500 {
                    let binding = Arc::new(ClientBinding::new(Arc::new(Capture::default()), 1).unwrap());
                    match device.add_binding(binding) {
                        Ok(index) => {
                            device.remove_binding(index).unwrap();
                        }
                        Err(AsioError::BindingLimitReached(_)) => break,
                        Err(e) => panic!("unexpected error {}", e),
                    }
                }
            })
        };

        thread::sleep(Duration::from_millis(1));
        let keeper = Arc::new(ClientBinding::new(Arc::new(Capture::default()), 1).unwrap());
        let index = device.add_binding(keeper.clone()).unwrap();
        churn.join().unwrap();

        assert!(!keeper.is_stopping());
        assert!(device.binding(index).is_some_and(|b| Arc::ptr_eq(&b, &keeper)));
        assert_eq!(device.active_bindings(), 1);
    }

    #[test]
    fn several_clocks_without_a_current_one_select_the_first() {
        let sim = SimulatedConfig {
            clock_sources: 3,
            ..Default::default()
        };
        let (device, loader) = setup(sim, fast_config());
        device.open(48000.0, 256).unwrap();

        let flags: Vec<bool> = device.clock_sources().iter().map(|c| c.is_current).collect();
        assert_eq!(flags, vec![true, false, false]);
        let reported = driver(&loader, NAME).clock_sources().unwrap();
        assert!(reported[0].is_current);
        assert!(device.is_started());
        device.close();
    }

    #[test]
    fn missing_clock_sources_are_not_fatal() {
        let sim = SimulatedConfig {
            clock_sources: 0,
            ..Default::default()
        };
        let (device, _loader) = setup(sim, fast_config());
        device.open(44100.0, 256).unwrap();

        assert!(device.clock_sources().is_empty());
        assert!(device.is_started());
        assert_eq!(device.current_sample_rate(), 44100.0);
        device.close();
    }
}
