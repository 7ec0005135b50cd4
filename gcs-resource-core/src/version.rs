//! Version tokens for `out`: the Unix time at which the invocation started.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::contract::Clock;

/// [`Clock`] backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> u64 {
        // A clock set before 1970 reports the epoch rather than a negative token.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Captures the version token for one invocation.
pub fn synthesize_version(clock: &dyn Clock) -> String {
    clock.unix_seconds().to_string()
}
