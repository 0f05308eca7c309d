use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::models::error::AsioError;

/// Run a driver call behind a fault boundary.
///
/// A panic raised inside `f` is caught, logged, and turned into
/// `AsioError::DriverFault`. Hardware exceptions (access violations inside
/// vendor code) are not panics and are not caught here.
pub fn guarded<T>(context: &str, f: impl FnOnce() -> T) -> Result<T, AsioError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let detail = panic_message(payload.as_ref());
        log::warn!("driver fault during {}: {}", context, detail);
        AsioError::DriverFault(format!("{}: {}", context, detail))
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_results_through() {
        assert_eq!(guarded("query", || 42), Ok(42));
    }

    #[test]
    fn contains_a_panicking_call() {
        let result: Result<(), _> = guarded("release", || panic!("driver exploded"));
        match result {
            Err(AsioError::DriverFault(msg)) => {
                assert!(msg.contains("release"));
                assert!(msg.contains("driver exploded"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
