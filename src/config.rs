//! Centralized runtime constants for TeleVK.
//!
//! All tunable intervals, capacities, and display coefficients are collected here
//! so they can be found and adjusted in a single place rather than scattered
//! across modules.

/// Interval at which the telemetry sampler reads the engine packet counter (seconds).
pub const STATS_INTERVAL_SECS: u64 = 1;

/// Number of per-interval deltas kept in the activity window.
pub const ACTIVITY_WINDOW_LEN: usize = 60;

/// Multiplier applied to a packet delta when deriving the displayed speed.
pub const SPEED_COEFFICIENT: f64 = 25.0;

/// Assumed size of one tunneled packet for display purposes (kilobytes).
/// This is a visualization constant, not a measured value.
pub const PACKET_SIZE_KB: f64 = 1.2;

/// Base value of the synthetic latency figure on the dashboard (milliseconds).
pub const LATENCY_BASE_MS: u64 = 25;

/// Upper bound on how long the engine may wait for a human answer (seconds).
pub const AUTH_TIMEOUT_SECS: u64 = 300;

/// How long the controller waits for a stopped worker to exit before
/// reporting an unresponsive engine (seconds).
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Grace period given to orphaned engine tasks when the worker runtime is torn down (milliseconds).
pub const RUNTIME_DRAIN_MS: u64 = 500;

/// Number of log lines retained in the dashboard feed.
pub const LOG_FEED_CAPACITY: usize = 500;

/// Target prefix of `tracing` events that belong to the core engine.
pub const ENGINE_LOG_TARGET: &str = "televk::engine";

/// Name given to the OS thread that hosts the engine's scheduler.
pub const WORKER_THREAD_NAME: &str = "televk-engine";

/// Settings file used when none is given on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time sanity: all intervals and capacities are positive.
    /// Uses const assertions to avoid clippy::assertions_on_constants.
    #[test]
    fn test_all_intervals_positive() {
        const _: () = assert!(STATS_INTERVAL_SECS > 0);
        const _: () = assert!(ACTIVITY_WINDOW_LEN > 0);
        const _: () = assert!(AUTH_TIMEOUT_SECS > 0);
        const _: () = assert!(SHUTDOWN_TIMEOUT_SECS > 0);
        const _: () = assert!(LOG_FEED_CAPACITY > 0);
        // f64 cannot use const assert, so skip SPEED_COEFFICIENT and PACKET_SIZE_KB
    }

    #[test]
    fn test_window_covers_one_minute() {
        let covered = STATS_INTERVAL_SECS * ACTIVITY_WINDOW_LEN as u64;
        assert_eq!(covered, 60, "activity window should span one minute");
    }

    #[test]
    fn test_engine_target_is_under_crate_namespace() {
        assert!(ENGINE_LOG_TARGET.starts_with("televk"));
    }
}
