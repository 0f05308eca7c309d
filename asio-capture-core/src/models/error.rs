use thiserror::Error;

use super::device_models::SampleType;

/// Errors surfaced by the capture core.
///
/// Open-time failures are returned to the caller; real-time failures never
/// reach this type and degrade to silence instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AsioError {
    #[error("driver not found: {0}")]
    DriverNotFound(String),

    #[error("driver initialisation failed: {0}")]
    DriverInitFailed(String),

    #[error("can't create i/o buffers: {0}")]
    BufferCreationFailed(DriverError),

    #[error("can't start device: {0}")]
    StartFailed(DriverError),

    #[error("device didn't start correctly (no callbacks within {timeout_ms} ms)")]
    DeviceDidNotStart { timeout_ms: u64 },

    #[error("unsupported sample format: {0:?}")]
    UnsupportedFormat(SampleType),

    #[error("all {0} device slots are in use")]
    SlotsExhausted(usize),

    #[error("driver fault during {0}")]
    DriverFault(String),

    #[error("stale or unknown handle")]
    InvalidHandle,

    #[error("binding list is full ({0} entries)")]
    BindingLimitReached(usize),

    #[error("output channel {channel} is outside the binding layout of {channels} channels")]
    InvalidRoute { channel: usize, channels: usize },

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Status codes reported by an ASIO driver call.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    #[error("Not Present")]
    NotPresent,

    #[error("Hardware Malfunction")]
    HardwareMalfunction,

    #[error("Invalid Parameter")]
    InvalidParameter,

    #[error("Invalid Mode")]
    InvalidMode,

    #[error("Sample position not advancing")]
    SamplePositionNotAdvancing,

    #[error("No Clock")]
    NoClock,

    #[error("Out of memory")]
    NoMemory,

    #[error("Unknown error ({0})")]
    Other(i32),
}

/// `ASE_OK`.
pub const ASE_OK: i32 = 0;
/// `ASE_SUCCESS`, returned by `future()` for supported selectors.
pub const ASE_SUCCESS: i32 = 0x3f48_47a0;

impl DriverError {
    /// Map a raw `ASIOError` status to a result.
    pub fn check(code: i32) -> Result<(), DriverError> {
        match code {
            ASE_OK | ASE_SUCCESS => Ok(()),
            -1000 => Err(Self::NotPresent),
            -999 => Err(Self::HardwareMalfunction),
            -998 => Err(Self::InvalidParameter),
            -997 => Err(Self::InvalidMode),
            -996 => Err(Self::SamplePositionNotAdvancing),
            -995 => Err(Self::NoClock),
            -994 => Err(Self::NoMemory),
            other => Err(Self::Other(other)),
        }
    }

    /// The raw `ASIOError` value.
    pub fn code(&self) -> i32 {
        match self {
            Self::NotPresent => -1000,
            Self::HardwareMalfunction => -999,
            Self::InvalidParameter => -998,
            Self::InvalidMode => -997,
            Self::SamplePositionNotAdvancing => -996,
            Self::NoClock => -995,
            Self::NoMemory => -994,
            Self::Other(code) => *code,
        }
    }
}

/// Log a failed driver call with its context and hand the result back.
pub fn log_driver_error<T>(context: &str, result: Result<T, DriverError>) -> Result<T, DriverError> {
    if let Err(ref e) = result {
        log::error!("error {} - {}", context, e);
    }
    result
}
