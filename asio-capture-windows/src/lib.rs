//! # asio-capture-windows
//!
//! Windows x64 backend for asio-capture.
//!
//! Provides:
//! - `RegistryDriverEnumerator`: installed drivers from `HKLM\SOFTWARE\ASIO`
//! - `ComDriverLoader`: driver instantiation via `CoCreateInstance`
//! - `ComAsioDriver`: the `AsioDriver` implementation over the raw `IASIO` vtable
//!
//! Driver callbacks carry no context pointer, so each device holding buffers
//! is assigned one of a fixed table of callback sets (`trampolines`).
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use asio_capture_core::{BufferedSink, CaptureHost, RegistryConfiguration};
//! use asio_capture_windows::{ComDriverLoader, RegistryDriverEnumerator};
//!
//! let host = CaptureHost::new(
//!     RegistryConfiguration::default(),
//!     Arc::new(RegistryDriverEnumerator::new()),
//!     Arc::new(ComDriverLoader::new()),
//! )?;
//! let sink = Arc::new(BufferedSink::new(2, 48000));
//! let handle = host.attach("ASIO4ALL v2", sink.clone(), 2)?;
//! ```

#[cfg(all(target_os = "windows", target_pointer_width = "64"))]
pub mod com_driver;
#[cfg(all(target_os = "windows", target_pointer_width = "64"))]
pub mod driver_enumerator;
#[cfg(all(target_os = "windows", target_pointer_width = "64"))]
pub mod ffi;
#[cfg(all(target_os = "windows", target_pointer_width = "64"))]
pub mod loader;
#[cfg(all(target_os = "windows", target_pointer_width = "64"))]
pub mod trampolines;

#[cfg(all(target_os = "windows", target_pointer_width = "64"))]
pub use com_driver::ComAsioDriver;
#[cfg(all(target_os = "windows", target_pointer_width = "64"))]
pub use driver_enumerator::RegistryDriverEnumerator;
#[cfg(all(target_os = "windows", target_pointer_width = "64"))]
pub use loader::ComDriverLoader;
