/// Conversion between hardware sample encodings and canonical f32.
///
/// A `SampleFormat` is derived once per channel from the driver-reported
/// `SampleType` and is immutable afterwards. Conversions are pure functions of
/// `(bytes, stride, endianness)` and never allocate, so they are safe to call
/// from the driver's real-time thread.
///
/// Integer scaling uses the largest positive value of the bit depth as full
/// scale (32767, 8388607, 2147483647), symmetrically in both directions.
use crate::models::device_models::SampleType;
use crate::models::error::AsioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Int,
    Float32,
    Float64,
    Unsupported,
}

/// Per-channel format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFormat {
    pub sample_type: SampleType,
    pub bit_depth: u32,
    pub byte_stride: usize,
    pub is_float: bool,
    pub little_endian: bool,
    encoding: Encoding,
}

impl SampleFormat {
    pub fn from_type(sample_type: SampleType) -> Self {
        use SampleType::*;

        let (bit_depth, byte_stride, encoding, little_endian) = match sample_type {
            Int16Msb => (16, 2, Encoding::Int, false),
            Int24Msb => (24, 3, Encoding::Int, false),
            Int32Msb => (32, 4, Encoding::Int, false),
            Float32Msb => (32, 4, Encoding::Float32, false),
            Float64Msb => (64, 8, Encoding::Float64, false),
            Int32Msb16 => (16, 4, Encoding::Int, false),
            Int32Msb24 => (24, 4, Encoding::Int, false),
            Int16Lsb => (16, 2, Encoding::Int, true),
            Int24Lsb => (24, 3, Encoding::Int, true),
            Int32Lsb => (32, 4, Encoding::Int, true),
            Float32Lsb => (32, 4, Encoding::Float32, true),
            Float64Lsb => (64, 8, Encoding::Float64, true),
            Int32Lsb16 => (16, 4, Encoding::Int, true),
            Int32Lsb24 => (24, 4, Encoding::Int, true),
            Int32Msb18 | Int32Msb20 => (24, 4, Encoding::Unsupported, false),
            Int32Lsb18 | Int32Lsb20 | DsdInt8Lsb1 | DsdInt8Msb1 | DsdInt8Ner8 | Unknown(_) => {
                (24, 4, Encoding::Unsupported, true)
            }
        };

        Self {
            sample_type,
            bit_depth,
            byte_stride,
            is_float: matches!(encoding, Encoding::Float32 | Encoding::Float64),
            little_endian,
            encoding,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.encoding != Encoding::Unsupported
    }

    /// Largest positive integer value for this bit depth.
    pub fn full_scale(&self) -> f64 {
        match self.bit_depth {
            16 => 32767.0,
            24 => 8_388_607.0,
            _ => 2_147_483_647.0,
        }
    }

    /// Bytes needed for `frames` samples of this format.
    pub fn bytes_for(&self, frames: usize) -> usize {
        frames * self.byte_stride
    }

    /// Decode `src` into `dst`, returning the number of samples written.
    ///
    /// Converts `min(dst.len(), src.len() / byte_stride)` samples.
    pub fn convert_to_float(&self, src: &[u8], dst: &mut [f32]) -> Result<usize, AsioError> {
        let stride = self.byte_stride;
        let le = self.little_endian;
        let mut count = 0;

        match self.encoding {
            Encoding::Int => {
                let gain = 1.0 / self.full_scale();
                for (chunk, out) in src.chunks_exact(stride).zip(dst.iter_mut()) {
                    *out = (read_int(chunk, le) as f64 * gain) as f32;
                    count += 1;
                }
            }
            Encoding::Float32 => {
                for (chunk, out) in src.chunks_exact(stride).zip(dst.iter_mut()) {
                    let bytes = [chunk[0], chunk[1], chunk[2], chunk[3]];
                    *out = if le {
                        f32::from_le_bytes(bytes)
                    } else {
                        f32::from_be_bytes(bytes)
                    };
                    count += 1;
                }
            }
            Encoding::Float64 => {
                for (chunk, out) in src.chunks_exact(stride).zip(dst.iter_mut()) {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(&chunk[..8]);
                    let value = if le {
                        f64::from_le_bytes(bytes)
                    } else {
                        f64::from_be_bytes(bytes)
                    };
                    *out = value as f32;
                    count += 1;
                }
            }
            Encoding::Unsupported => return Err(AsioError::UnsupportedFormat(self.sample_type)),
        }

        Ok(count)
    }

    /// Encode `src` into `dst`, returning the number of samples written.
    ///
    /// Integer encodings clamp to `[-full_scale, full_scale]` and round to
    /// nearest.
    pub fn convert_from_float(&self, src: &[f32], dst: &mut [u8]) -> Result<usize, AsioError> {
        let stride = self.byte_stride;
        let le = self.little_endian;
        let mut count = 0;

        match self.encoding {
            Encoding::Int => {
                let max = self.full_scale();
                for (&sample, chunk) in src.iter().zip(dst.chunks_exact_mut(stride)) {
                    let value = (max * sample as f64).clamp(-max, max).round() as i32;
                    write_int(value, chunk, le);
                    count += 1;
                }
            }
            Encoding::Float32 => {
                for (&sample, chunk) in src.iter().zip(dst.chunks_exact_mut(stride)) {
                    let bytes = if le {
                        sample.to_le_bytes()
                    } else {
                        sample.to_be_bytes()
                    };
                    chunk[..4].copy_from_slice(&bytes);
                    count += 1;
                }
            }
            Encoding::Float64 => {
                for (&sample, chunk) in src.iter().zip(dst.chunks_exact_mut(stride)) {
                    let value = sample as f64;
                    let bytes = if le {
                        value.to_le_bytes()
                    } else {
                        value.to_be_bytes()
                    };
                    chunk[..8].copy_from_slice(&bytes);
                    count += 1;
                }
            }
            Encoding::Unsupported => return Err(AsioError::UnsupportedFormat(self.sample_type)),
        }

        Ok(count)
    }

    /// Human-readable summary for log lines and diagnostics.
    pub fn describe(&self) -> String {
        let kind = match self.encoding {
            Encoding::Int => "int",
            Encoding::Float32 | Encoding::Float64 => "float",
            Encoding::Unsupported => "unsupported",
        };
        format!(
            "{:?} ({}-bit {}, stride {}, {})",
            self.sample_type,
            self.bit_depth,
            kind,
            self.byte_stride,
            if self.little_endian { "LE" } else { "BE" }
        )
    }
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self::from_type(SampleType::Int32Lsb24)
    }
}

/// Sign-extending integer read of a 2, 3 or 4 byte container.
#[inline]
fn read_int(bytes: &[u8], little_endian: bool) -> i32 {
    match bytes.len() {
        2 => {
            let raw = [bytes[0], bytes[1]];
            let value = if little_endian {
                i16::from_le_bytes(raw)
            } else {
                i16::from_be_bytes(raw)
            };
            value as i32
        }
        3 => {
            let (lo, mid, hi) = if little_endian {
                (bytes[0], bytes[1], bytes[2])
            } else {
                (bytes[2], bytes[1], bytes[0])
            };
            ((hi as i8 as i32) << 16) | ((mid as i32) << 8) | lo as i32
        }
        _ => {
            let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
            if little_endian {
                i32::from_le_bytes(raw)
            } else {
                i32::from_be_bytes(raw)
            }
        }
    }
}

#[inline]
fn write_int(value: i32, out: &mut [u8], little_endian: bool) {
    match out.len() {
        2 => {
            let bytes = if little_endian {
                (value as i16).to_le_bytes()
            } else {
                (value as i16).to_be_bytes()
            };
            out.copy_from_slice(&bytes);
        }
        3 => {
            let le = [value as u8, (value >> 8) as u8, (value >> 16) as u8];
            if little_endian {
                out.copy_from_slice(&le);
            } else {
                out.copy_from_slice(&[le[2], le[1], le[0]]);
            }
        }
        _ => {
            let bytes = if little_endian {
                value.to_le_bytes()
            } else {
                value.to_be_bytes()
            };
            out[..4].copy_from_slice(&bytes);
        }
    }
}
