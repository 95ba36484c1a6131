//! Connect/reconnect backoff schedule.

use std::time::Duration;

/// Returns the delay schedule for broker connection attempts: exponential
/// with factor 2, capped at `max`, limited to `attempts` entries.
///
/// The caller attempts the operation, and on failure sleeps the yielded
/// delay before the next attempt. The same schedule drives initial connect,
/// publisher reconnect, and consumer reconnect.
pub fn backoff_schedule(
    initial: Duration,
    max: Duration,
    attempts: u32,
) -> impl Iterator<Item = Duration> {
    std::iter::successors(Some(initial.min(max)), move |prev| {
        Some(prev.saturating_mul(2).min(max))
    })
    .take(attempts as usize)
}
