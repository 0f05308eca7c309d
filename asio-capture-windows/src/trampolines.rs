//! Per-slot C entry points for driver callbacks.
//!
//! `ASIOCallbacks` carries no user pointer, so each open device needs its own
//! set of functions. A fixed table of sets is generated here; each set looks
//! up the `DeviceToken` bound to its slot and forwards through the core's
//! dispatch functions.

use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};

use asio_capture_core::driver::callbacks::{
    dispatch_buffer_switch, dispatch_message, dispatch_sample_rate_changed,
};
use asio_capture_core::DeviceToken;

use crate::ffi::{AsioBool, AsioCallbacks, AsioTime};

/// Number of devices that can hold buffers at once.
pub const CALLBACK_SLOTS: usize = 16;

const FREE: u64 = 0;

static SLOT_TOKENS: [AtomicU64; CALLBACK_SLOTS] = [const { AtomicU64::new(FREE) }; CALLBACK_SLOTS];

#[inline]
fn forward_buffer_switch(slot: usize, index: i32) {
    let token = SLOT_TOKENS[slot].load(Ordering::Acquire);
    if token != FREE {
        dispatch_buffer_switch(token, (index & 1) as usize);
    }
}

fn forward_message(slot: usize, selector: i32, value: i32) -> i32 {
    match SLOT_TOKENS[slot].load(Ordering::Acquire) {
        FREE => 0,
        token => dispatch_message(token, selector, value),
    }
}

fn forward_sample_rate(slot: usize, rate: f64) {
    let token = SLOT_TOKENS[slot].load(Ordering::Acquire);
    if token != FREE {
        dispatch_sample_rate_changed(token, rate);
    }
}

macro_rules! callback_slots {
    ($($slot:literal => $name:ident),* $(,)?) => {
        $(
            mod $name {
                use super::*;

                pub(super) unsafe extern "C" fn buffer_switch(index: i32, _direct_process: AsioBool) {
                    forward_buffer_switch($slot, index);
                }

                pub(super) unsafe extern "C" fn sample_rate_did_change(rate: f64) {
                    forward_sample_rate($slot, rate);
                }

                pub(super) unsafe extern "C" fn asio_message(
                    selector: i32,
                    value: i32,
                    _message: *mut c_void,
                    _opt: *mut f64,
                ) -> i32 {
                    forward_message($slot, selector, value)
                }

                pub(super) unsafe extern "C" fn buffer_switch_time_info(
                    params: *mut AsioTime,
                    index: i32,
                    _direct_process: AsioBool,
                ) -> *mut AsioTime {
                    forward_buffer_switch($slot, index);
                    params
                }
            }
        )*

        static CALLBACKS: [AsioCallbacks; CALLBACK_SLOTS] = [
            $(
                AsioCallbacks {
                    buffer_switch: $name::buffer_switch,
                    sample_rate_did_change: $name::sample_rate_did_change,
                    asio_message: $name::asio_message,
                    buffer_switch_time_info: $name::buffer_switch_time_info,
                },
            )*
        ];
    };
}

callback_slots! {
    0 => slot_0,
    1 => slot_1,
    2 => slot_2,
    3 => slot_3,
    4 => slot_4,
    5 => slot_5,
    6 => slot_6,
    7 => slot_7,
    8 => slot_8,
    9 => slot_9,
    10 => slot_10,
    11 => slot_11,
    12 => slot_12,
    13 => slot_13,
    14 => slot_14,
    15 => slot_15,
}

/// A claimed callback set, released on drop.
#[derive(Debug)]
pub struct CallbackSlot {
    index: usize,
}

impl CallbackSlot {
    /// Claim a free slot for `token`, or `None` when all are taken.
    pub fn acquire(token: DeviceToken) -> Option<Self> {
        let raw = token.raw();
        SLOT_TOKENS.iter().enumerate().find_map(|(index, slot)| {
            slot.compare_exchange(FREE, raw, Ordering::AcqRel, Ordering::Acquire)
                .ok()
                .map(|_| Self { index })
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn token(&self) -> DeviceToken {
        DeviceToken::from_raw(SLOT_TOKENS[self.index].load(Ordering::Acquire))
    }

    /// The callback set to hand to `createBuffers`. The driver only reads it.
    pub fn callbacks(&self) -> *mut AsioCallbacks {
        std::ptr::addr_of!(CALLBACKS[self.index]) as *mut AsioCallbacks
    }
}

impl Drop for CallbackSlot {
    fn drop(&mut self) {
        SLOT_TOKENS[self.index].store(FREE, Ordering::Release);
    }
}
