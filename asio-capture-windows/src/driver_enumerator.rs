//! Installed-driver enumeration from `HKLM\SOFTWARE\ASIO`.
//!
//! Each subkey is one driver. Its `CLSID` value names the COM class and its
//! `Description` value is the display name, falling back to the key name.

use std::ffi::c_void;

use windows::core::{w, PCWSTR, PWSTR};
use windows::Win32::Foundation::{ERROR_NO_MORE_ITEMS, ERROR_SUCCESS, WIN32_ERROR};
use windows::Win32::System::Registry::{
    RegCloseKey, RegEnumKeyExW, RegGetValueW, RegOpenKeyExW, HKEY, HKEY_LOCAL_MACHINE, KEY_READ, RRF_RT_REG_SZ,
};

use asio_capture_core::{AsioError, DriverEnumerator, DriverId, DriverInfo};

const NAME_CAPACITY: usize = 256;

struct RegKey(HKEY);

impl Drop for RegKey {
    fn drop(&mut self) {
        let _ = unsafe { RegCloseKey(self.0) };
    }
}

fn wide_to_string(raw: &[u16]) -> String {
    let end = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    String::from_utf16_lossy(&raw[..end])
}

fn read_string(key: HKEY, subkey: PCWSTR, value: PCWSTR) -> Result<String, WIN32_ERROR> {
    let mut raw = [0u16; NAME_CAPACITY];
    let mut size = (raw.len() * std::mem::size_of::<u16>()) as u32;
    let status = unsafe {
        RegGetValueW(
            key,
            subkey,
            value,
            RRF_RT_REG_SZ,
            None,
            Some(raw.as_mut_ptr().cast::<c_void>()),
            Some(&mut size as *mut u32),
        )
    };
    if status != ERROR_SUCCESS {
        return Err(status);
    }
    Ok(wide_to_string(&raw))
}

/// `DriverEnumerator` reading the ASIO registry key.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryDriverEnumerator;

impl RegistryDriverEnumerator {
    pub fn new() -> Self {
        Self
    }
}

impl DriverEnumerator for RegistryDriverEnumerator {
    fn enumerate(&self) -> Result<Vec<DriverInfo>, AsioError> {
        let mut root = HKEY::default();
        let status = unsafe { RegOpenKeyExW(HKEY_LOCAL_MACHINE, w!("SOFTWARE\\ASIO"), None, KEY_READ, &mut root) };
        if status != ERROR_SUCCESS {
            log::info!("No ASIO drivers registered ({:?})", status);
            return Ok(Vec::new());
        }
        let root = RegKey(root);

        let mut drivers = Vec::new();
        for index in 0u32.. {
            let mut name = [0u16; NAME_CAPACITY];
            let mut len = name.len() as u32;
            let status = unsafe {
                RegEnumKeyExW(root.0, index, Some(PWSTR(name.as_mut_ptr())), &mut len, None, None, None, None)
            };
            if status == ERROR_NO_MORE_ITEMS {
                break;
            }
            if status != ERROR_SUCCESS {
                log::warn!("Skipping ASIO registry entry {}: {:?}", index, status);
                continue;
            }

            let key_name = wide_to_string(&name[..len as usize]);
            let subkey = PCWSTR(name.as_ptr());

            let clsid = match read_string(root.0, subkey, w!("CLSID")) {
                Ok(clsid) if !clsid.is_empty() => clsid,
                _ => {
                    log::warn!("ASIO driver {} has no CLSID, skipping", key_name);
                    continue;
                }
            };
            let description = read_string(root.0, subkey, w!("Description"))
                .ok()
                .filter(|d| !d.is_empty())
                .unwrap_or(key_name);

            log::debug!("Found ASIO driver {} ({})", description, clsid);
            drivers.push(DriverInfo {
                name: description,
                id: DriverId(clsid),
            });
        }
        Ok(drivers)
    }
}
