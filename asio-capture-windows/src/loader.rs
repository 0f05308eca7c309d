//! Instantiates ASIO drivers through COM.

use std::cell::Cell;
use std::ffi::c_void;
use std::iter;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use windows::core::{GUID, HRESULT, PCWSTR};
use windows::Win32::System::Com::{CLSIDFromString, CoInitializeEx, CLSCTX_INPROC_SERVER, COINIT_APARTMENTTHREADED};

use asio_capture_core::{AsioDriver, AsioError, DriverInfo, DriverLoader};

use crate::com_driver::ComAsioDriver;
use crate::ffi::IAsio;

#[link(name = "ole32")]
extern "system" {
    // Declared by hand: ASIO drivers are queried with their own CLSID as the
    // interface id, which the typed wrapper can't express.
    #[link_name = "CoCreateInstance"]
    fn co_create_instance(
        clsid: *const GUID,
        outer: *mut c_void,
        context: u32,
        iid: *const GUID,
        out: *mut *mut c_void,
    ) -> HRESULT;
}

thread_local! {
    static COM_READY: Cell<bool> = const { Cell::new(false) };
}

/// Initialise COM once per thread. The reset worker loads drivers too, so
/// this can't be done only at startup. A thread already in another apartment
/// mode keeps it.
fn ensure_com() {
    COM_READY.with(|ready| {
        if ready.get() {
            return;
        }
        let result = unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) }.ok();
        if let Err(e) = result {
            log::debug!("CoInitializeEx: {}", e);
        }
        ready.set(true);
    });
}

pub(crate) fn parse_clsid(id: &str) -> Result<GUID, AsioError> {
    let wide: Vec<u16> = id.encode_utf16().chain(iter::once(0)).collect();
    unsafe { CLSIDFromString(PCWSTR(wide.as_ptr())) }
        .map_err(|e| AsioError::DriverNotFound(format!("bad CLSID {}: {}", id, e)))
}

/// `DriverLoader` backed by `CoCreateInstance`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ComDriverLoader;

impl ComDriverLoader {
    pub fn new() -> Self {
        Self
    }
}

impl DriverLoader for ComDriverLoader {
    fn load(&self, info: &DriverInfo) -> Result<Arc<dyn AsioDriver>, AsioError> {
        ensure_com();
        let clsid = parse_clsid(&info.id.0)?;

        let mut raw: *mut c_void = ptr::null_mut();
        let hr = unsafe { co_create_instance(&clsid, ptr::null_mut(), CLSCTX_INPROC_SERVER.0, &clsid, &mut raw) };
        hr.ok()
            .map_err(|e| AsioError::DriverInitFailed(format!("{}: CoCreateInstance failed: {}", info.name, e)))?;

        let raw = NonNull::new(raw.cast::<IAsio>())
            .ok_or_else(|| AsioError::DriverInitFailed(format!("{}: driver returned no interface", info.name)))?;

        log::info!("Loaded ASIO driver {} ({})", info.name, info.id.0);
        // SAFETY: CoCreateInstance succeeded and handed us one reference
        let driver = unsafe { ComAsioDriver::from_raw(raw, &info.name) };
        Ok(Arc::new(driver))
    }
}
