use std::sync::Arc;

use crate::device::device::Device;
use crate::models::config::RegistryConfiguration;
use crate::models::device_models::DriverInfo;
use crate::models::error::AsioError;
use crate::traits::driver::{DriverEnumerator, DriverLoader};

/// Stable reference to a registry slot.
///
/// The generation changes when the slot's device is removed, so a handle
/// kept past `remove` no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    index: usize,
    generation: u64,
}

impl DeviceHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Default)]
struct Slot {
    generation: u64,
    device: Option<Arc<Device>>,
}

/// Bounded table of live devices, at most one per driver name.
///
/// Devices stay in their slot across close/open cycles and are destroyed
/// only by `remove` or when the registry itself is dropped.
pub struct DeviceRegistry {
    config: RegistryConfiguration,
    enumerator: Arc<dyn DriverEnumerator>,
    loader: Arc<dyn DriverLoader>,
    available: Vec<DriverInfo>,
    scanned: bool,
    slots: Vec<Slot>,
}

impl DeviceRegistry {
    pub fn new(
        config: RegistryConfiguration,
        enumerator: Arc<dyn DriverEnumerator>,
        loader: Arc<dyn DriverLoader>,
    ) -> Result<Self, AsioError> {
        config.validate()?;
        let slots = (0..config.max_devices).map(|_| Slot::default()).collect();
        Ok(Self {
            config,
            enumerator,
            loader,
            available: Vec::new(),
            scanned: false,
            slots,
        })
    }

    pub fn config(&self) -> &RegistryConfiguration {
        &self.config
    }

    /// Refresh the list of installed drivers, minus the deny-list.
    pub fn scan(&mut self) -> Result<Vec<DriverInfo>, AsioError> {
        let drivers = self.enumerator.enumerate()?;
        self.available = drivers
            .into_iter()
            .filter(|info| {
                let denied = self.config.is_denied(&info.name);
                if denied {
                    log::debug!("skipping denied driver {}", info.name);
                }
                !denied
            })
            .collect();
        self.scanned = true;
        log::info!("found {} ASIO drivers", self.available.len());
        Ok(self.available.clone())
    }

    /// Drivers found by the last scan.
    pub fn available(&self) -> &[DriverInfo] {
        &self.available
    }

    /// Return the device for `name`, creating it in a free slot if needed.
    ///
    /// A new device opens its control connection but does not stream.
    pub fn attach(&mut self, name: &str) -> Result<(DeviceHandle, Arc<Device>), AsioError> {
        if name.is_empty() || !self.scanned {
            return Err(AsioError::DriverNotFound(name.to_string()));
        }

        if let Some(handle) = self.find(name) {
            if let Some(device) = self.get(handle) {
                return Ok((handle, device));
            }
        }

        let info = self
            .available
            .iter()
            .find(|info| info.name == name)
            .cloned()
            .ok_or_else(|| AsioError::DriverNotFound(name.to_string()))?;

        let index = self
            .slots
            .iter()
            .position(|slot| slot.device.is_none())
            .ok_or(AsioError::SlotsExhausted(self.slots.len()))?;

        log::info!("creating device {} in slot {}", name, index);
        let device = Device::new(info, self.config.device.clone(), Arc::clone(&self.loader))?;

        let slot = &mut self.slots[index];
        slot.device = Some(Arc::clone(&device));
        let handle = DeviceHandle {
            index,
            generation: slot.generation,
        };
        Ok((handle, device))
    }

    pub fn get(&self, handle: DeviceHandle) -> Option<Arc<Device>> {
        let slot = self.slots.get(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.device.clone()
    }

    /// Handle of the live device named `name`.
    pub fn find(&self, name: &str) -> Option<DeviceHandle> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            slot.device
                .as_ref()
                .filter(|device| device.name() == name)
                .map(|_| DeviceHandle {
                    index,
                    generation: slot.generation,
                })
        })
    }

    /// Close and destroy the device in `handle`'s slot.
    pub fn remove(&mut self, handle: DeviceHandle) -> Result<(), AsioError> {
        let slot = self
            .slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation && slot.device.is_some())
            .ok_or(AsioError::InvalidHandle)?;

        if let Some(device) = slot.device.take() {
            log::info!("removing device {} from slot {}", device.name(), handle.index);
            device.close();
        }
        slot.generation += 1;
        Ok(())
    }

    /// Live devices and their handles.
    pub fn devices(&self) -> Vec<(DeviceHandle, Arc<Device>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.device.as_ref().map(|device| {
                    (
                        DeviceHandle {
                            index,
                            generation: slot.generation,
                        },
                        Arc::clone(device),
                    )
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.device.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            if let Some(device) = slot.device.take() {
                device.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::simulated::{SimulatedConfig, SimulatedLoader};
    use crate::models::config::DeviceConfiguration;
    use crate::models::state::DeviceState;

    fn registry(names: &[&str], max_devices: usize) -> DeviceRegistry {
        let loader = SimulatedLoader::new();
        for name in names {
            loader.add(SimulatedConfig::new(name));
        }
        let enumerator = Arc::new(loader.enumerator());
        let config = RegistryConfiguration {
            max_devices,
            device: DeviceConfiguration {
                warmup_run_ms: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        DeviceRegistry::new(config, enumerator, Arc::new(loader)).unwrap()
    }

    #[test]
    fn attach_requires_a_scan() {
        let mut registry = registry(&["Sim A"], 4);
        assert!(matches!(registry.attach("Sim A"), Err(AsioError::DriverNotFound(_))));

        registry.scan().unwrap();
        assert!(registry.attach("Sim A").is_ok());
        assert!(matches!(registry.attach(""), Err(AsioError::DriverNotFound(_))));
        assert!(matches!(registry.attach("Missing"), Err(AsioError::DriverNotFound(_))));
    }

    #[test]
    fn scan_skips_denied_drivers() {
        let mut registry = registry(&["ASIO Multimedia Driver", "Sim A"], 4);
        let found = registry.scan().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Sim A");
        assert!(matches!(
            registry.attach("ASIO Multimedia Driver"),
            Err(AsioError::DriverNotFound(_))
        ));
    }

    #[test]
    fn same_name_yields_same_device() {
        let mut registry = registry(&["Sim A", "Sim B"], 4);
        registry.scan().unwrap();

        let (a1, first) = registry.attach("Sim A").unwrap();
        let (a2, second) = registry.attach("Sim A").unwrap();
        let (b, other) = registry.attach("Sim B").unwrap();

        assert_eq!(a1, a2);
        assert!(Arc::ptr_eq(&first, &second));
        assert_ne!(a1, b);
        assert_eq!(other.name(), "Sim B");
        assert_eq!(first.state(), DeviceState::Closed);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn slots_are_bounded() {
        let mut registry = registry(&["Sim A", "Sim B", "Sim C"], 2);
        registry.scan().unwrap();
        registry.attach("Sim A").unwrap();
        registry.attach("Sim B").unwrap();
        assert!(matches!(registry.attach("Sim C"), Err(AsioError::SlotsExhausted(2))));
    }

    #[test]
    fn removed_slots_invalidate_old_handles() {
        let mut registry = registry(&["Sim A", "Sim B"], 1);
        registry.scan().unwrap();

        let (old, _) = registry.attach("Sim A").unwrap();
        registry.remove(old).unwrap();
        assert!(registry.get(old).is_none());
        assert_eq!(registry.remove(old), Err(AsioError::InvalidHandle));

        let (new, device) = registry.attach("Sim B").unwrap();
        assert_eq!(new.index(), old.index());
        assert_ne!(new, old);
        assert!(registry.get(old).is_none());
        assert!(Arc::ptr_eq(&registry.get(new).unwrap(), &device));
    }

    #[test]
    fn remove_closes_an_open_device() {
        let mut registry = registry(&["Sim A"], 1);
        registry.scan().unwrap();
        let (handle, device) = registry.attach("Sim A").unwrap();
        device.open(48000.0, 256).unwrap();

        registry.remove(handle).unwrap();

        assert_eq!(device.state(), DeviceState::Closed);
        assert!(registry.is_empty());
    }
}
