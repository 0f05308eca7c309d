//! `asioMessage` selectors and their handling.

pub const SELECTOR_SUPPORTED: i32 = 1;
pub const ENGINE_VERSION: i32 = 2;
pub const RESET_REQUEST: i32 = 3;
pub const BUFFER_SIZE_CHANGE: i32 = 4;
pub const RESYNC_REQUEST: i32 = 5;
pub const LATENCIES_CHANGED: i32 = 6;
pub const SUPPORTS_TIME_INFO: i32 = 7;
pub const SUPPORTS_TIME_CODE: i32 = 8;
pub const SUPPORTS_INPUT_MONITOR: i32 = 10;
pub const OVERLOAD: i32 = 15;

/// Engine version reported to drivers.
const HOST_ENGINE_VERSION: i32 = 2;

/// What a message needs from its device.
pub(crate) trait MessageContext {
    fn device_name(&self) -> &str;

    /// Queue a deferred close/open cycle. Must not block.
    fn request_reset(&self, reason: &str);

    /// Count one driver-reported overload. Must not block.
    fn record_overload(&self);
}

fn is_supported(selector: i32) -> bool {
    matches!(
        selector,
        RESET_REQUEST | ENGINE_VERSION | RESYNC_REQUEST | LATENCIES_CHANGED | SUPPORTS_INPUT_MONITOR | OVERLOAD
    )
}

/// Answer one driver message. Unknown selectors return 0.
pub(crate) fn handle_message(ctx: &impl MessageContext, selector: i32, value: i32) -> i32 {
    match selector {
        SELECTOR_SUPPORTED => i32::from(is_supported(value)),
        ENGINE_VERSION => HOST_ENGINE_VERSION,
        BUFFER_SIZE_CHANGE => {
            log::info!("{}: buffer size change to {}", ctx.device_name(), value);
            ctx.request_reset("buffer size change");
            1
        }
        RESET_REQUEST => {
            log::info!("{}: reset request", ctx.device_name());
            ctx.request_reset("reset request");
            1
        }
        RESYNC_REQUEST => {
            log::info!("{}: resync request", ctx.device_name());
            ctx.request_reset("resync request");
            1
        }
        LATENCIES_CHANGED => {
            log::info!("{}: latencies changed", ctx.device_name());
            1
        }
        SUPPORTS_TIME_INFO | SUPPORTS_TIME_CODE => 0,
        OVERLOAD => {
            ctx.record_overload();
            1
        }
        _ => 0,
    }
}
