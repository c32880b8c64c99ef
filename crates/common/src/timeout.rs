//! Validation for embedder-supplied timeouts.

use crate::error::ValidationError;
use std::time::Duration;

/// The maximum timeout an embedder may request, in seconds.
pub const MAX_TIMEOUT_SECS: i64 = 120;

/// Convert an embedder-supplied timeout in seconds to a `Duration`.
///
/// Fails without side effect when the timeout is negative or larger
/// than [`MAX_TIMEOUT_SECS`].
pub fn make_timeout(timeout: i64) -> Result<Duration, ValidationError> {
    if !(0..=MAX_TIMEOUT_SECS).contains(&timeout) {
        return Err(ValidationError::InvalidTimeout { value: timeout });
    }
    Ok(Duration::from_secs(timeout as u64))
}
