//! `AsioDriver` over a live `IASIO` COM object.

use std::ffi::c_char;
use std::ptr::{self, NonNull};

use parking_lot::Mutex;
use windows::Win32::UI::WindowsAndMessaging::GetDesktopWindow;

use asio_capture_core::models::error::ASE_SUCCESS;
use asio_capture_core::{
    AsioDriver, BufferRequest, BufferSizes, ChannelInfo, ClockSource, DoubleBuffer, DriverError, HostCallbacks,
    SampleFormat, SampleType,
};

use crate::ffi::{
    c_string, AsioBufferInfo, AsioChannelInfo, AsioClockSource, IAsio, IAsioVtbl, ASIO_FALSE, ASIO_TRUE,
    CAN_REPORT_OVERLOAD, MAX_CLOCK_SOURCES,
};
use crate::trampolines::CallbackSlot;

/// One instantiated ASIO driver.
///
/// Owns a single COM reference, released on drop. The callback slot is held
/// from `create_buffers` until `dispose_buffers`.
pub struct ComAsioDriver {
    raw: NonNull<IAsio>,
    name: String,
    slot: Mutex<Option<CallbackSlot>>,
}

// SAFETY: ASIO drivers are called from the control thread and, for
// `outputReady`, from their own callback thread, as every ASIO host does.
// The struct itself only holds the interface pointer and a mutex.
unsafe impl Send for ComAsioDriver {}
unsafe impl Sync for ComAsioDriver {}

impl ComAsioDriver {
    /// Take ownership of one reference to `raw`.
    ///
    /// # Safety
    /// `raw` must point to a live `IASIO` object; the caller gives up the
    /// reference it holds.
    pub unsafe fn from_raw(raw: NonNull<IAsio>, name: &str) -> Self {
        Self {
            raw,
            name: name.to_string(),
            slot: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn this(&self) -> *mut IAsio {
        self.raw.as_ptr()
    }

    fn vtbl(&self) -> &IAsioVtbl {
        // SAFETY: a live COM object always carries its vtable pointer.
        unsafe { &*(*self.this()).vtbl }
    }

    fn pair(
        &self,
        call: unsafe extern "system" fn(*mut IAsio, *mut i32, *mut i32) -> i32,
    ) -> Result<(usize, usize), DriverError> {
        let (mut a, mut b) = (0i32, 0i32);
        DriverError::check(unsafe { call(self.this(), &mut a, &mut b) })?;
        Ok((a.max(0) as usize, b.max(0) as usize))
    }

    fn release_slot(&self) {
        self.slot.lock().take();
    }
}

impl AsioDriver for ComAsioDriver {
    fn init(&self) -> bool {
        let window = unsafe { GetDesktopWindow() };
        unsafe { (self.vtbl().init)(self.this(), window.0) == ASIO_TRUE }
    }

    fn driver_name(&self) -> String {
        let mut raw = [0 as c_char; 128];
        unsafe { (self.vtbl().get_driver_name)(self.this(), raw.as_mut_ptr()) };
        c_string(&raw)
    }

    fn error_message(&self) -> String {
        let mut raw = [0 as c_char; 512];
        unsafe { (self.vtbl().get_error_message)(self.this(), raw.as_mut_ptr()) };
        c_string(&raw)
    }

    fn start(&self) -> Result<(), DriverError> {
        DriverError::check(unsafe { (self.vtbl().start)(self.this()) })
    }

    fn stop(&self) -> Result<(), DriverError> {
        DriverError::check(unsafe { (self.vtbl().stop)(self.this()) })
    }

    fn channels(&self) -> Result<(usize, usize), DriverError> {
        self.pair(self.vtbl().get_channels)
    }

    fn latencies(&self) -> Result<(usize, usize), DriverError> {
        self.pair(self.vtbl().get_latencies)
    }

    fn buffer_sizes(&self) -> Result<BufferSizes, DriverError> {
        let (mut min, mut max, mut preferred, mut granularity) = (0i32, 0i32, 0i32, 0i32);
        DriverError::check(unsafe {
            (self.vtbl().get_buffer_size)(self.this(), &mut min, &mut max, &mut preferred, &mut granularity)
        })?;
        Ok(BufferSizes {
            min: min.max(0) as usize,
            max: max.max(0) as usize,
            preferred: preferred.max(0) as usize,
            granularity: i64::from(granularity),
        })
    }

    fn can_sample_rate(&self, rate: f64) -> Result<(), DriverError> {
        DriverError::check(unsafe { (self.vtbl().can_sample_rate)(self.this(), rate) })
    }

    fn sample_rate(&self) -> Result<f64, DriverError> {
        let mut rate = 0.0;
        DriverError::check(unsafe { (self.vtbl().get_sample_rate)(self.this(), &mut rate) })?;
        Ok(rate)
    }

    fn set_sample_rate(&self, rate: f64) -> Result<(), DriverError> {
        DriverError::check(unsafe { (self.vtbl().set_sample_rate)(self.this(), rate) })
    }

    fn clock_sources(&self) -> Result<Vec<ClockSource>, DriverError> {
        let mut raw = [AsioClockSource {
            index: 0,
            associated_channel: 0,
            associated_group: 0,
            is_current_source: ASIO_FALSE,
            name: [0; 32],
        }; MAX_CLOCK_SOURCES];
        let mut count = MAX_CLOCK_SOURCES as i32;

        DriverError::check(unsafe { (self.vtbl().get_clock_sources)(self.this(), raw.as_mut_ptr(), &mut count) })?;

        let count = (count.max(0) as usize).min(MAX_CLOCK_SOURCES);
        Ok(raw[..count]
            .iter()
            .map(|clock| ClockSource {
                index: clock.index,
                associated_channel: clock.associated_channel,
                associated_group: clock.associated_group,
                is_current: clock.is_current_source == ASIO_TRUE,
                name: c_string(&clock.name),
            })
            .collect())
    }

    fn set_clock_source(&self, index: i32) -> Result<(), DriverError> {
        DriverError::check(unsafe { (self.vtbl().set_clock_source)(self.this(), index) })
    }

    fn channel_info(&self, channel: usize, is_input: bool) -> Result<ChannelInfo, DriverError> {
        let mut info = AsioChannelInfo {
            channel: channel as i32,
            is_input: if is_input { ASIO_TRUE } else { ASIO_FALSE },
            is_active: ASIO_FALSE,
            channel_group: 0,
            sample_type: 0,
            name: [0; 32],
        };
        DriverError::check(unsafe { (self.vtbl().get_channel_info)(self.this(), &mut info) })?;

        Ok(ChannelInfo {
            channel,
            is_input,
            is_active: info.is_active == ASIO_TRUE,
            group: info.channel_group,
            sample_type: SampleType::from_code(info.sample_type),
            name: c_string(&info.name),
        })
    }

    fn create_buffers(
        &self,
        requests: &[BufferRequest],
        block_size: usize,
        callbacks: HostCallbacks,
    ) -> Result<Vec<DoubleBuffer>, DriverError> {
        let callbacks_ptr = {
            let mut slot = self.slot.lock();
            if slot.as_ref().map(CallbackSlot::token) != Some(callbacks.token()) {
                *slot = None;
                let claimed = CallbackSlot::acquire(callbacks.token()).ok_or_else(|| {
                    log::error!("{}: no free callback slot", self.name);
                    DriverError::NoMemory
                })?;
                log::debug!("{}: using callback slot {}", self.name, claimed.index());
                *slot = Some(claimed);
            }
            slot.as_ref().map_or(ptr::null_mut(), CallbackSlot::callbacks)
        };

        let mut infos: Vec<AsioBufferInfo> = requests
            .iter()
            .map(|request| AsioBufferInfo {
                is_input: if request.is_input { ASIO_TRUE } else { ASIO_FALSE },
                channel_num: request.channel as i32,
                buffers: [ptr::null_mut(); 2],
            })
            .collect();

        let code = unsafe {
            (self.vtbl().create_buffers)(
                self.this(),
                infos.as_mut_ptr(),
                infos.len() as i32,
                block_size as i32,
                callbacks_ptr,
            )
        };
        if let Err(e) = DriverError::check(code) {
            self.release_slot();
            return Err(e);
        }

        Ok(infos
            .iter()
            .zip(requests)
            .map(|(info, request)| {
                let sample_type = self
                    .channel_info(request.channel, request.is_input)
                    .map_or(SampleType::Unknown(-1), |channel| channel.sample_type);
                let format = SampleFormat::from_type(sample_type);
                // DSD and unknown layouts get no view at all, so nothing can
                // touch memory of unknown size
                let len = if format.is_supported() {
                    format.bytes_for(block_size)
                } else {
                    0
                };
                // SAFETY: the driver keeps both halves valid until disposeBuffers
                unsafe { DoubleBuffer::from_raw([info.buffers[0].cast(), info.buffers[1].cast()], len) }
            })
            .collect())
    }

    fn dispose_buffers(&self) -> Result<(), DriverError> {
        let result = DriverError::check(unsafe { (self.vtbl().dispose_buffers)(self.this()) });
        self.release_slot();
        result
    }

    fn control_panel(&self) -> Result<(), DriverError> {
        DriverError::check(unsafe { (self.vtbl().control_panel)(self.this()) })
    }

    fn output_ready(&self) -> Result<(), DriverError> {
        DriverError::check(unsafe { (self.vtbl().output_ready)(self.this()) })
    }

    fn can_report_overload(&self) -> bool {
        unsafe { (self.vtbl().future)(self.this(), CAN_REPORT_OVERLOAD, ptr::null_mut()) == ASE_SUCCESS }
    }
}

impl Drop for ComAsioDriver {
    fn drop(&mut self) {
        self.release_slot();
        log::debug!("{}: releasing driver", self.name);
        unsafe { (self.vtbl().release)(self.this()) };
    }
}
