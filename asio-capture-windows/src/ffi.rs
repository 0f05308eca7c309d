//! Raw `IASIO` binding.
//!
//! ASIO drivers are in-process COM servers whose interface is a C++ vtable
//! following `IUnknown`. On x64 every method uses the platform calling
//! convention with `this` as the first argument, so the vtable is declared
//! directly as `extern "system"` function pointers.

use std::ffi::{c_char, c_void};

use windows::core::{GUID, HRESULT};

pub type AsioBool = i32;
pub type AsioErrorCode = i32;

pub const ASIO_TRUE: AsioBool = 1;
pub const ASIO_FALSE: AsioBool = 0;

/// `future()` selector asking whether the driver reports overloads.
pub const CAN_REPORT_OVERLOAD: i32 = 0x2404_2012;

/// Clock sources fetched per `getClockSources` call.
pub const MAX_CLOCK_SOURCES: usize = 32;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AsioClockSource {
    pub index: i32,
    pub associated_channel: i32,
    pub associated_group: i32,
    pub is_current_source: AsioBool,
    pub name: [c_char; 32],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AsioChannelInfo {
    pub channel: i32,
    pub is_input: AsioBool,
    pub is_active: AsioBool,
    pub channel_group: i32,
    pub sample_type: i32,
    pub name: [c_char; 32],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AsioBufferInfo {
    pub is_input: AsioBool,
    pub channel_num: i32,
    pub buffers: [*mut c_void; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct AsioSamples {
    pub hi: u32,
    pub lo: u32,
}

pub type AsioTimeStamp = AsioSamples;

/// `ASIOTime`. Only ever passed through by pointer.
#[repr(C)]
pub struct AsioTime {
    _private: [u8; 0],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct AsioCallbacks {
    pub buffer_switch: unsafe extern "C" fn(index: i32, direct_process: AsioBool),
    pub sample_rate_did_change: unsafe extern "C" fn(rate: f64),
    pub asio_message: unsafe extern "C" fn(selector: i32, value: i32, message: *mut c_void, opt: *mut f64) -> i32,
    pub buffer_switch_time_info:
        unsafe extern "C" fn(params: *mut AsioTime, index: i32, direct_process: AsioBool) -> *mut AsioTime,
}

#[repr(C)]
pub struct IAsio {
    pub vtbl: *const IAsioVtbl,
}

#[repr(C)]
pub struct IAsioVtbl {
    pub query_interface: unsafe extern "system" fn(this: *mut IAsio, riid: *const GUID, out: *mut *mut c_void) -> HRESULT,
    pub add_ref: unsafe extern "system" fn(this: *mut IAsio) -> u32,
    pub release: unsafe extern "system" fn(this: *mut IAsio) -> u32,

    pub init: unsafe extern "system" fn(this: *mut IAsio, sys_handle: *mut c_void) -> AsioBool,
    pub get_driver_name: unsafe extern "system" fn(this: *mut IAsio, name: *mut c_char),
    pub get_driver_version: unsafe extern "system" fn(this: *mut IAsio) -> i32,
    pub get_error_message: unsafe extern "system" fn(this: *mut IAsio, message: *mut c_char),
    pub start: unsafe extern "system" fn(this: *mut IAsio) -> AsioErrorCode,
    pub stop: unsafe extern "system" fn(this: *mut IAsio) -> AsioErrorCode,
    pub get_channels: unsafe extern "system" fn(this: *mut IAsio, inputs: *mut i32, outputs: *mut i32) -> AsioErrorCode,
    pub get_latencies: unsafe extern "system" fn(this: *mut IAsio, input: *mut i32, output: *mut i32) -> AsioErrorCode,
    pub get_buffer_size: unsafe extern "system" fn(
        this: *mut IAsio,
        min: *mut i32,
        max: *mut i32,
        preferred: *mut i32,
        granularity: *mut i32,
    ) -> AsioErrorCode,
    pub can_sample_rate: unsafe extern "system" fn(this: *mut IAsio, rate: f64) -> AsioErrorCode,
    pub get_sample_rate: unsafe extern "system" fn(this: *mut IAsio, rate: *mut f64) -> AsioErrorCode,
    pub set_sample_rate: unsafe extern "system" fn(this: *mut IAsio, rate: f64) -> AsioErrorCode,
    pub get_clock_sources:
        unsafe extern "system" fn(this: *mut IAsio, clocks: *mut AsioClockSource, count: *mut i32) -> AsioErrorCode,
    pub set_clock_source: unsafe extern "system" fn(this: *mut IAsio, reference: i32) -> AsioErrorCode,
    pub get_sample_position:
        unsafe extern "system" fn(this: *mut IAsio, position: *mut AsioSamples, stamp: *mut AsioTimeStamp) -> AsioErrorCode,
    pub get_channel_info: unsafe extern "system" fn(this: *mut IAsio, info: *mut AsioChannelInfo) -> AsioErrorCode,
    pub create_buffers: unsafe extern "system" fn(
        this: *mut IAsio,
        infos: *mut AsioBufferInfo,
        channels: i32,
        block_size: i32,
        callbacks: *mut AsioCallbacks,
    ) -> AsioErrorCode,
    pub dispose_buffers: unsafe extern "system" fn(this: *mut IAsio) -> AsioErrorCode,
    pub control_panel: unsafe extern "system" fn(this: *mut IAsio) -> AsioErrorCode,
    pub future: unsafe extern "system" fn(this: *mut IAsio, selector: i32, opt: *mut c_void) -> AsioErrorCode,
    pub output_ready: unsafe extern "system" fn(this: *mut IAsio) -> AsioErrorCode,
}

/// Decode a NUL-terminated driver string, lossily.
pub fn c_string(raw: &[c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).trim_end().to_string()
}
