//! Reconnect Backoff Policy
//!
//! Pure function of the successive-failure counters. Counters are
//! consulted in priority order: auth-fetch failures over socket-open
//! failures over token-fetch failures; only the highest-priority
//! non-zero counter selects the delay.

use std::time::Duration;

use super::metrics::ConnectionMetrics;

/// Delay when no counter is failing
const DEFAULT_DELAY: Duration = Duration::from_millis(50);

fn auth_fetch_delay(failures: u32) -> Duration {
    let millis = match failures {
        1 => 500,
        2 => 3_000,
        3 => 6_000,
        _ => 20_000,
    };
    Duration::from_millis(millis)
}

fn socket_open_delay(failures: u32) -> Duration {
    let millis = match failures {
        1 => 50,
        2..=8 => 2_000,
        9..=11 => 10_000,
        _ => 15_000,
    };
    Duration::from_millis(millis)
}

fn token_fetch_delay(failures: u32) -> Duration {
    let millis = match failures {
        1 | 2 => 3_000,
        3 => 6_000,
        _ => 20_000,
    };
    Duration::from_millis(millis)
}

/// Select the delay before the next connection attempt
pub fn reconnect_delay(metrics: &ConnectionMetrics) -> Duration {
    if metrics.auth_fetch_failures > 0 {
        auth_fetch_delay(metrics.auth_fetch_failures)
    } else if metrics.socket_open_failures > 0 {
        socket_open_delay(metrics.socket_open_failures)
    } else if metrics.token_fetch_failures > 0 {
        token_fetch_delay(metrics.token_fetch_failures)
    } else {
        DEFAULT_DELAY
    }
}
