//! Exponential backoff for the event stream reconnect loops.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

/// First delay after a dropped connection.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_secs(2);
/// Upper bound between two attempts.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(120);

fn builder() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(MIN_RECONNECT_DELAY)
        .with_max_delay(MAX_RECONNECT_DELAY)
        .with_factor(2.0)
        .without_max_times()
}

/// Create an exponential backoff iterator for reconnection.
/// Unlimited retries with jitter; rebuild it after a successful connection.
pub fn reconnect_backoff() -> impl Iterator<Item = Duration> {
    builder().with_jitter().build()
}
