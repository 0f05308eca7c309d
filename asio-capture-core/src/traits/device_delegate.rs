use crate::models::error::AsioError;
use crate::models::state::DeviceState;

/// Event delegate for device notifications.
///
/// All methods are called from control threads (the caller of `open`/`close`
/// or the reset worker), never from the real-time callback.
pub trait DeviceDelegate: Send + Sync {
    /// Called whenever the device changes state.
    fn on_state_changed(&self, device: &str, state: &DeviceState);

    /// Called when an open, reset, or driver call fails.
    fn on_error(&self, device: &str, error: &AsioError);

    /// Called after a driver-requested reset has re-opened the device.
    fn on_reset(&self, device: &str);
}
