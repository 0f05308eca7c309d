use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::AsioError;

/// Hard cap on input and output channels per device.
pub const MAX_HARDWARE_CHANNELS: usize = 32;

/// Tunables for a single device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfiguration {
    /// How long `open()` waits for the first callback (default: 3000 ms).
    pub start_timeout_ms: u64,

    /// Slice length of the start-confirmation wait (default: 10 ms).
    pub start_poll_interval_ms: u64,

    /// Iterations of the deferred-reset wait before it re-arms (default: 500).
    pub reset_wait_iterations: u32,

    /// Slice length of the deferred-reset wait (default: 1 ms).
    pub reset_wait_interval_ms: u64,

    /// Channel cap per direction (default: 32, maximum: 32).
    pub max_channels: usize,

    /// How long the construction-time start/stop warm-up runs (default: 80 ms).
    pub warmup_run_ms: u64,

    /// A control panel shown for longer than this is assumed to have changed
    /// the buffer size (default: 300 ms).
    pub control_panel_slow_ms: u64,

    /// Drivers that crash on dynamic buffer-size changes; matched by substring.
    pub force_preferred_size_drivers: Vec<String>,

    /// Drivers whose `init()` reports success even when it failed; matched
    /// case-insensitively by substring.
    pub init_error_message_drivers: Vec<String>,

    /// Rate used when the driver reports nothing usable (default: 48000).
    pub fallback_sample_rate: f64,

    /// Block size used when the size query fails (default: 1024).
    pub fallback_block_size: usize,
}

impl DeviceConfiguration {
    pub fn validate(&self) -> Result<(), AsioError> {
        if self.start_timeout_ms == 0 {
            return Err(AsioError::Configuration("start timeout must be positive".into()));
        }
        if self.start_poll_interval_ms == 0 || self.start_poll_interval_ms > self.start_timeout_ms {
            return Err(AsioError::Configuration(format!(
                "start poll interval must be in 1..={} ms",
                self.start_timeout_ms
            )));
        }
        if self.max_channels == 0 || self.max_channels > MAX_HARDWARE_CHANNELS {
            return Err(AsioError::Configuration(format!(
                "max channels must be in 1..={}",
                MAX_HARDWARE_CHANNELS
            )));
        }
        if self.fallback_sample_rate <= 0.0 {
            return Err(AsioError::Configuration("fallback sample rate must be positive".into()));
        }
        if self.fallback_block_size == 0 {
            return Err(AsioError::Configuration("fallback block size must be positive".into()));
        }
        Ok(())
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn start_poll_interval(&self) -> Duration {
        Duration::from_millis(self.start_poll_interval_ms)
    }

    pub fn reset_wait_interval(&self) -> Duration {
        Duration::from_millis(self.reset_wait_interval_ms)
    }

    pub fn control_panel_slow(&self) -> Duration {
        Duration::from_millis(self.control_panel_slow_ms)
    }

    pub(crate) fn forces_preferred_size(&self, device_name: &str) -> bool {
        self.force_preferred_size_drivers
            .iter()
            .any(|quirk| device_name.contains(quirk.as_str()))
    }

    pub(crate) fn needs_init_error_check(&self, device_name: &str) -> bool {
        let lower = device_name.to_lowercase();
        self.init_error_message_drivers
            .iter()
            .any(|quirk| lower.contains(&quirk.to_lowercase()))
    }
}

impl Default for DeviceConfiguration {
    fn default() -> Self {
        Self {
            start_timeout_ms: 3000,
            start_poll_interval_ms: 10,
            reset_wait_iterations: 500,
            reset_wait_interval_ms: 1,
            max_channels: MAX_HARDWARE_CHANNELS,
            warmup_run_ms: 80,
            control_panel_slow_ms: 300,
            force_preferred_size_drivers: vec!["Digidesign".into()],
            init_error_message_drivers: vec!["denon dj asio".into()],
            fallback_sample_rate: 48000.0,
            fallback_block_size: 1024,
        }
    }
}

/// Tunables for the device registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfiguration {
    /// Slot table capacity (default: 16).
    pub max_devices: usize,

    /// Drivers excluded from enumeration.
    pub deny_list: Vec<String>,

    /// Settings applied to every device the registry creates.
    pub device: DeviceConfiguration,
}

impl RegistryConfiguration {
    pub fn validate(&self) -> Result<(), AsioError> {
        if self.max_devices == 0 || self.max_devices > u16::MAX as usize {
            return Err(AsioError::Configuration(format!(
                "max devices must be in 1..={}",
                u16::MAX
            )));
        }
        self.device.validate()
    }

    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, AsioError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AsioError::Configuration(format!("failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// A driver name is denied when a deny-list entry contains it.
    pub fn is_denied(&self, driver_name: &str) -> bool {
        self.deny_list
            .iter()
            .any(|denied| denied.contains(driver_name))
    }
}

impl Default for RegistryConfiguration {
    fn default() -> Self {
        Self {
            max_devices: 16,
            deny_list: vec![
                "ASIO DirectX Full Duplex".into(),
                "ASIO Multimedia Driver".into(),
            ],
            device: DeviceConfiguration::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(DeviceConfiguration::default().validate().is_ok());
        assert!(RegistryConfiguration::default().validate().is_ok());
    }

    #[test]
    fn rejects_channel_cap_above_hardware_limit() {
        let config = DeviceConfiguration {
            max_channels: 64,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AsioError::Configuration(_))));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = RegistryConfiguration::from_json(
            r#"{ "max_devices": 4, "device": { "start_timeout_ms": 500 } }"#,
        )
        .unwrap();

        assert_eq!(config.max_devices, 4);
        assert_eq!(config.device.start_timeout_ms, 500);
        assert_eq!(config.device.start_poll_interval_ms, 10);
        assert_eq!(config.deny_list.len(), 2);
    }

    #[test]
    fn json_errors_are_reported() {
        assert!(RegistryConfiguration::from_json("{ not json").is_err());
        assert!(RegistryConfiguration::from_json(r#"{ "max_devices": 0 }"#).is_err());
    }

    #[test]
    fn driver_quirks_match_by_name() {
        let config = DeviceConfiguration::default();
        assert!(config.forces_preferred_size("Digidesign HW ( 003 )"));
        assert!(!config.forces_preferred_size("Focusrite USB ASIO"));
        assert!(config.needs_init_error_check("Denon DJ ASIO Driver"));
    }

    #[test]
    fn deny_list_matches_known_broken_drivers() {
        let config = RegistryConfiguration::default();
        assert!(config.is_denied("ASIO Multimedia Driver"));
        assert!(!config.is_denied("ASIO4ALL v2"));
    }
}
