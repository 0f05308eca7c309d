use serde::{Deserialize, Serialize};

/// Opaque identity of an installed driver (a CLSID string on Windows).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DriverId(pub String);

/// An installed driver as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub name: String,
    pub id: DriverId,
}

/// Hardware sample encodings (`ASIOSampleType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    Int16Msb,
    Int24Msb,
    Int32Msb,
    Float32Msb,
    Float64Msb,
    Int32Msb16,
    Int32Msb18,
    Int32Msb20,
    Int32Msb24,
    Int16Lsb,
    Int24Lsb,
    Int32Lsb,
    Float32Lsb,
    Float64Lsb,
    Int32Lsb16,
    Int32Lsb18,
    Int32Lsb20,
    Int32Lsb24,
    DsdInt8Lsb1,
    DsdInt8Msb1,
    DsdInt8Ner8,
    Unknown(i32),
}

impl SampleType {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Int16Msb,
            1 => Self::Int24Msb,
            2 => Self::Int32Msb,
            3 => Self::Float32Msb,
            4 => Self::Float64Msb,
            8 => Self::Int32Msb16,
            9 => Self::Int32Msb18,
            10 => Self::Int32Msb20,
            11 => Self::Int32Msb24,
            16 => Self::Int16Lsb,
            17 => Self::Int24Lsb,
            18 => Self::Int32Lsb,
            19 => Self::Float32Lsb,
            20 => Self::Float64Lsb,
            24 => Self::Int32Lsb16,
            25 => Self::Int32Lsb18,
            26 => Self::Int32Lsb20,
            27 => Self::Int32Lsb24,
            32 => Self::DsdInt8Lsb1,
            33 => Self::DsdInt8Msb1,
            40 => Self::DsdInt8Ner8,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Int16Msb => 0,
            Self::Int24Msb => 1,
            Self::Int32Msb => 2,
            Self::Float32Msb => 3,
            Self::Float64Msb => 4,
            Self::Int32Msb16 => 8,
            Self::Int32Msb18 => 9,
            Self::Int32Msb20 => 10,
            Self::Int32Msb24 => 11,
            Self::Int16Lsb => 16,
            Self::Int24Lsb => 17,
            Self::Int32Lsb => 18,
            Self::Float32Lsb => 19,
            Self::Float64Lsb => 20,
            Self::Int32Lsb16 => 24,
            Self::Int32Lsb18 => 25,
            Self::Int32Lsb20 => 26,
            Self::Int32Lsb24 => 27,
            Self::DsdInt8Lsb1 => 32,
            Self::DsdInt8Msb1 => 33,
            Self::DsdInt8Ner8 => 40,
            Self::Unknown(code) => *code,
        }
    }
}

/// Per-channel information (`ASIOChannelInfo`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel: usize,
    pub is_input: bool,
    pub is_active: bool,
    pub group: i32,
    pub sample_type: SampleType,
    pub name: String,
}

/// Buffer-size limits reported by `getBufferSize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferSizes {
    pub min: usize,
    pub max: usize,
    pub preferred: usize,
    /// Step between legal sizes; negative means powers of two.
    pub granularity: i64,
}

/// A selectable clock reference (`ASIOClockSource`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockSource {
    pub index: i32,
    pub associated_channel: i32,
    pub associated_group: i32,
    pub is_current: bool,
    pub name: String,
}

/// One entry passed to `createBuffers` (`ASIOBufferInfo` without the pointers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequest {
    pub is_input: bool,
    pub channel: usize,
}

/// Where a binding's output channel takes its samples from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Route {
    Muted,
    Input(usize),
}

impl Route {
    pub(crate) const MUTED_RAW: i32 = -1;

    pub(crate) fn to_raw(self) -> i32 {
        match self {
            Route::Muted => Self::MUTED_RAW,
            Route::Input(index) => i32::try_from(index).unwrap_or(Self::MUTED_RAW),
        }
    }

    pub(crate) fn from_raw(raw: i32) -> Self {
        if raw < 0 {
            Route::Muted
        } else {
            Route::Input(raw as usize)
        }
    }
}

/// Diagnostics snapshot for a device.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceDiagnostics {
    pub callback_count: u64,
    /// `None` when the driver can't report overloads.
    pub xruns: Option<u64>,
    pub input_latency: usize,
    pub output_latency: usize,
    pub sample_rate: f64,
    pub block_size: usize,
    pub bit_depth: u32,
    pub input_format: String,
    pub output_format: String,
    pub unsupported_channels: Vec<String>,
    pub opened_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_type_codes_round_trip() {
        for code in [0, 1, 2, 3, 4, 8, 9, 10, 11, 16, 17, 18, 19, 20, 24, 25, 26, 27, 32, 33, 40, 99] {
            assert_eq!(SampleType::from_code(code).code(), code);
        }
        assert_eq!(SampleType::from_code(19), SampleType::Float32Lsb);
        assert_eq!(SampleType::from_code(7), SampleType::Unknown(7));
    }

    #[test]
    fn route_raw_encoding() {
        assert_eq!(Route::from_raw(Route::Input(5).to_raw()), Route::Input(5));
        assert_eq!(Route::from_raw(Route::Muted.to_raw()), Route::Muted);
        assert_eq!(Route::from_raw(-7), Route::Muted);
    }
}
