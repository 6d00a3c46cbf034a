//! Timeouts and settle delays
//!
//! The drivers need time between writes that depend on each other and even more
//! after committing to non-volatile memory. All waiting goes through a [`Clock`]
//! so tests can observe the delays without actually sleeping.

use std::time::Duration;

/// Something that can wait
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// All delays used when talking to the drivers
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Timing {
    /// Timeout of a normal request
    pub exchange: Duration,
    /// Timeout of a single probe while scanning
    pub probe_timeout: Duration,
    /// Pause between two probes while scanning
    pub probe_interval: Duration,
    /// Settle delay between writes that depend on each other
    pub dependent_write: Duration,
    /// Settle delay after a non-volatile commit
    pub nv_commit: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            exchange: Duration::from_secs(1),
            probe_timeout: Duration::from_millis(100),
            probe_interval: Duration::from_millis(50),
            dependent_write: Duration::from_millis(100),
            nv_commit: Duration::from_millis(500),
        }
    }
}
