use std::sync::Arc;

use crate::driver::buffers::DoubleBuffer;
use crate::driver::callbacks::HostCallbacks;
use crate::models::device_models::{BufferRequest, BufferSizes, ChannelInfo, ClockSource, DriverInfo};
use crate::models::error::{AsioError, DriverError};

/// A loaded driver instance (`IASIO`).
///
/// Implemented by:
/// - `ComAsioDriver` (Windows, `asio-capture-windows`)
/// - `SimulatedDriver` (in-process, for tests and development)
///
/// Every method takes `&self`; implementations serialise access to the
/// underlying driver themselves. Only `output_ready` is called from the
/// real-time thread.
pub trait AsioDriver: Send + Sync {
    /// Initialise the driver. Returns the driver's own success flag.
    fn init(&self) -> bool;

    fn driver_name(&self) -> String;

    /// The driver's last error message, empty when it has none.
    fn error_message(&self) -> String;

    fn start(&self) -> Result<(), DriverError>;

    fn stop(&self) -> Result<(), DriverError>;

    /// `(inputs, outputs)`.
    fn channels(&self) -> Result<(usize, usize), DriverError>;

    /// `(input latency, output latency)` in frames.
    fn latencies(&self) -> Result<(usize, usize), DriverError>;

    fn buffer_sizes(&self) -> Result<BufferSizes, DriverError>;

    fn can_sample_rate(&self, rate: f64) -> Result<(), DriverError>;

    fn sample_rate(&self) -> Result<f64, DriverError>;

    fn set_sample_rate(&self, rate: f64) -> Result<(), DriverError>;

    fn clock_sources(&self) -> Result<Vec<ClockSource>, DriverError>;

    fn set_clock_source(&self, index: i32) -> Result<(), DriverError>;

    fn channel_info(&self, channel: usize, is_input: bool) -> Result<ChannelInfo, DriverError>;

    /// Allocate one double buffer per request, in request order, and install
    /// `callbacks` as the driver's callback set.
    fn create_buffers(
        &self,
        requests: &[BufferRequest],
        block_size: usize,
        callbacks: HostCallbacks,
    ) -> Result<Vec<DoubleBuffer>, DriverError>;

    fn dispose_buffers(&self) -> Result<(), DriverError>;

    /// Show the driver's settings panel. May block until it is closed.
    fn control_panel(&self) -> Result<(), DriverError>;

    /// Tell the driver the output half is filled. Real-time safe.
    fn output_ready(&self) -> Result<(), DriverError>;

    /// Whether the driver sends overload messages (`kAsioCanReportOverload`).
    fn can_report_overload(&self) -> bool;
}

/// Instantiates drivers by identity.
pub trait DriverLoader: Send + Sync {
    fn load(&self, info: &DriverInfo) -> Result<Arc<dyn AsioDriver>, AsioError>;
}

/// Lists installed drivers.
pub trait DriverEnumerator: Send + Sync {
    fn enumerate(&self) -> Result<Vec<DriverInfo>, AsioError>;
}
