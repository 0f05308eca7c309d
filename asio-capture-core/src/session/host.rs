use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::registry::{DeviceHandle, DeviceRegistry};
use crate::device::binding::ClientBinding;
use crate::device::device::Device;
use crate::models::config::RegistryConfiguration;
use crate::models::device_models::{DriverInfo, Route};
use crate::models::error::AsioError;
use crate::traits::audio_sink::AudioSink;
use crate::traits::driver::{DriverEnumerator, DriverLoader};

/// Opaque reference to one attached consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingHandle(u64);

struct BindingEntry {
    device: DeviceHandle,
    index: usize,
    binding: Arc<ClientBinding>,
}

struct HostState {
    registry: DeviceRegistry,
    bindings: HashMap<BindingHandle, BindingEntry>,
    next_id: u64,
}

/// Attach/update/detach surface for the host application.
///
/// Each attach creates a `ClientBinding` on the named device, opening the
/// device on first use. Detaching the last binding closes the device; the
/// device itself stays in the registry for the next attach.
///
/// ```text
/// attach("Focusrite USB ASIO", sink, 2) ──► DeviceRegistry ──► Device ──► BindingList
///                                                                  │
///                                   AudioFrame ◄── buffer_switch ──┘
/// ```
pub struct CaptureHost {
    state: Mutex<HostState>,
}

impl CaptureHost {
    /// Build a host and scan for drivers.
    pub fn new(
        config: RegistryConfiguration,
        enumerator: Arc<dyn DriverEnumerator>,
        loader: Arc<dyn DriverLoader>,
    ) -> Result<Self, AsioError> {
        let mut registry = DeviceRegistry::new(config, enumerator, loader)?;
        registry.scan()?;
        Ok(Self {
            state: Mutex::new(HostState {
                registry,
                bindings: HashMap::new(),
                next_id: 1,
            }),
        })
    }

    /// Attach `sink` to `device_name`, expecting `channels` channels.
    ///
    /// All channels start muted. If the device wasn't running it is opened
    /// with its current rate and default buffer size; when that fails the
    /// binding is rolled back and the error returned.
    pub fn attach(
        &self,
        device_name: &str,
        sink: Arc<dyn AudioSink>,
        channels: usize,
    ) -> Result<BindingHandle, AsioError> {
        let binding = Arc::new(ClientBinding::new(sink, channels)?);
        let mut state = self.state.lock();
        Self::attach_binding(&mut state, device_name, binding)
    }

    /// Route output `channel` of the binding to a hardware input or mute it.
    pub fn update_routing(&self, handle: BindingHandle, channel: usize, route: Route) -> Result<(), AsioError> {
        let state = self.state.lock();
        let entry = state.bindings.get(&handle).ok_or(AsioError::InvalidHandle)?;
        entry.binding.set_route(channel, route)?;
        log::debug!("binding {:?}: channel {} -> {:?}", handle, channel, route);
        Ok(())
    }

    /// Detach a consumer. The device closes when no bindings remain.
    pub fn detach(&self, handle: BindingHandle) -> Result<(), AsioError> {
        let mut state = self.state.lock();
        let entry = state.bindings.remove(&handle).ok_or(AsioError::InvalidHandle)?;
        Self::release_entry(&state.registry, &entry)
    }

    /// Move a consumer to another device, keeping its routing.
    ///
    /// The old binding is released only once the new one is attached, so a
    /// failed rebind leaves the consumer where it was.
    pub fn rebind(&self, handle: BindingHandle, device_name: &str) -> Result<(), AsioError> {
        let mut state = self.state.lock();
        let binding = {
            let entry = state.bindings.get(&handle).ok_or(AsioError::InvalidHandle)?;
            Arc::new(entry.binding.rebound())
        };

        let new_handle = Self::attach_binding(&mut state, device_name, binding)?;

        // Keep the caller's handle pointing at the new binding
        let Some(new_entry) = state.bindings.remove(&new_handle) else {
            return Err(AsioError::InvalidHandle);
        };
        let Some(old_entry) = state.bindings.insert(handle, new_entry) else {
            return Err(AsioError::InvalidHandle);
        };
        log::info!("binding {:?} moved to {}", handle, device_name);
        Self::release_entry(&state.registry, &old_entry)
    }

    /// Drivers found by the last scan.
    pub fn available_devices(&self) -> Vec<DriverInfo> {
        self.state.lock().registry.available().to_vec()
    }

    /// Rescan installed drivers.
    pub fn rescan(&self) -> Result<Vec<DriverInfo>, AsioError> {
        self.state.lock().registry.scan()
    }

    /// The device a binding is attached to.
    pub fn device(&self, handle: BindingHandle) -> Option<Arc<Device>> {
        let state = self.state.lock();
        let entry = state.bindings.get(&handle)?;
        state.registry.get(entry.device)
    }

    /// Current routing of a binding.
    pub fn routing(&self, handle: BindingHandle) -> Option<Vec<Route>> {
        self.state
            .lock()
            .bindings
            .get(&handle)
            .map(|entry| entry.binding.routing())
    }

    pub fn binding_count(&self) -> usize {
        self.state.lock().bindings.len()
    }

    // --- Internal helpers ---

    fn attach_binding(
        state: &mut HostState,
        device_name: &str,
        binding: Arc<ClientBinding>,
    ) -> Result<BindingHandle, AsioError> {
        let (device_handle, device) = state.registry.attach(device_name)?;
        let index = device.add_binding(Arc::clone(&binding))?;

        if !device.is_started() {
            let rate = device.current_sample_rate();
            let block = device.default_buffer_size();
            if let Err(e) = device.open(rate, block) {
                log::error!("Failed to open {}: {}", device_name, e);
                let _ = device.remove_binding(index);
                return Err(e);
            }
        }

        let handle = BindingHandle(state.next_id);
        state.next_id += 1;
        state.bindings.insert(
            handle,
            BindingEntry {
                device: device_handle,
                index,
                binding,
            },
        );
        log::info!(
            "binding {:?} attached to {} ({} active)",
            handle,
            device_name,
            device.active_bindings()
        );
        Ok(handle)
    }

    fn release_entry(registry: &DeviceRegistry, entry: &BindingEntry) -> Result<(), AsioError> {
        entry.binding.mark_stopping();

        // The device may have been removed, or closed and refilled since
        let Some(device) = registry.get(entry.device) else {
            return Ok(());
        };
        match device.binding(entry.index) {
            Some(current) if Arc::ptr_eq(&current, &entry.binding) => {
                let remaining = device.remove_binding(entry.index)?;
                log::info!("binding detached from {} ({} active)", device.name(), remaining);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
