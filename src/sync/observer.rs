//! Isolated observer invocation.
//!
//! Observer failures are contained where the observer is called: a returned
//! error or a panic is logged and swallowed so delivery to sibling observers
//! and to the transport continues.

use std::panic::{self, AssertUnwindSafe};

/// Error type observers may return.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Runs `call`, logging instead of propagating any failure.
///
/// Returns `true` when the observer completed without error.
pub(crate) fn invoke_isolated<F>(scope: &str, observer_id: u64, call: F) -> bool
where
    F: FnOnce() -> Result<(), ObserverError>,
{
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            tracing::warn!(scope, observer_id, error = %err, "observer failed");
            false
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::warn!(scope, observer_id, reason = %reason, "observer panicked");
            false
        }
    }
}
