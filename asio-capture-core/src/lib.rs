//! # asio-capture-core
//!
//! Platform-agnostic core of an ASIO capture host.
//!
//! Negotiates sample rate, block size and clock with an ASIO driver, converts
//! the hardware's sample encodings to f32, and fans captured audio out to any
//! number of consumers in real time. The Windows backend implements the
//! `DriverEnumerator`, `DriverLoader` and `AsioDriver` traits on top of COM;
//! everything else lives here and runs against the in-process
//! `SimulatedDriver` as well.
//!
//! ## Architecture
//!
//! ```text
//! asio-capture-core (this crate)
//! ├── traits/       ← AsioDriver, DriverLoader, DriverEnumerator, AudioSink, DeviceDelegate
//! ├── models/       ← AsioError, DriverError, DeviceState, configuration, device models
//! ├── processing/   ← SampleFormat codec, buffer/rate negotiation, RingBuffer
//! ├── driver/       ← DoubleBuffer, callback dispatch, fault guard, SimulatedDriver
//! ├── device/       ← Device lifecycle, ClientBinding fan-out, driver messages, resets
//! └── session/      ← DeviceRegistry, CaptureHost, BufferedSink
//! ```

pub mod clock;
pub mod device;
pub mod driver;
pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use device::binding::{ClientBinding, MAX_AUDIO_CHANNELS};
pub use device::device::Device;
pub use driver::buffers::DoubleBuffer;
pub use driver::callbacks::{DeviceToken, HostCallbacks};
pub use driver::guard::guarded;
pub use driver::simulated::{SimulatedConfig, SimulatedDriver, SimulatedEnumerator, SimulatedLoader};
pub use models::config::{DeviceConfiguration, RegistryConfiguration};
pub use models::device_models::{
    BufferRequest, BufferSizes, ChannelInfo, ClockSource, DeviceDiagnostics, DriverId, DriverInfo, Route, SampleType,
};
pub use models::error::{AsioError, DriverError};
pub use models::state::DeviceState;
pub use processing::ring_buffer::RingBuffer;
pub use processing::sample_format::SampleFormat;
pub use session::buffered_sink::BufferedSink;
pub use session::host::{BindingHandle, CaptureHost};
pub use session::registry::{DeviceHandle, DeviceRegistry};
pub use traits::audio_sink::{AudioFrame, AudioSink};
pub use traits::device_delegate::DeviceDelegate;
pub use traits::driver::{AsioDriver, DriverEnumerator, DriverLoader};
