// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Manager configuration.
//!
//! All values are fixed at construction; there is no dynamic reconfiguration.

use std::time::Duration;

/// Default number of execution workers.
///
/// Handlers are not required to be reentrant across different keys, so the
/// pool stays at a single worker unless configured otherwise.
pub const DEFAULT_WORKER_COUNT: usize = 1;
/// Default scheduler capacity (queued plus ready requests).
pub const DEFAULT_QUEUE_SIZE: usize = 64;
/// Default delay before a canceled running invocation is force-finalized.
pub const DEFAULT_CANCEL_FALLBACK_DELAY: Duration = Duration::from_secs(5);
/// Default time shutdown waits for workers to drain.
pub const DEFAULT_SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(8);
/// Default lifetime of a tombstone.
pub const DEFAULT_TOMBSTONE_TTL: Duration = Duration::from_secs(60);
/// Default delay before warning about an invocation stuck awaiting its result.
pub const DEFAULT_AWAITING_WARN_DELAY: Duration = Duration::from_secs(30);

/// Functions manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Number of execution workers.
    pub worker_count: usize,
    /// Maximum number of pending (queued or ready) requests. `0` disables the limit.
    pub queue_size: usize,
    /// Delay between a cancel of running work and the forced 499.
    pub cancel_fallback_delay: Duration,
    /// How long shutdown waits for workers before force-finalizing.
    pub shutdown_drain_timeout: Duration,
    /// How long a finalized UID stays tombstoned.
    pub tombstone_ttl: Duration,
    /// Delay before logging an invocation still awaiting its terminal response.
    pub awaiting_warn_delay: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            queue_size: DEFAULT_QUEUE_SIZE,
            cancel_fallback_delay: DEFAULT_CANCEL_FALLBACK_DELAY,
            shutdown_drain_timeout: DEFAULT_SHUTDOWN_DRAIN_TIMEOUT,
            tombstone_ttl: DEFAULT_TOMBSTONE_TTL,
            awaiting_warn_delay: DEFAULT_AWAITING_WARN_DELAY,
        }
    }
}

impl ManagerConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `FUNCD_WORKER_COUNT`: number of workers (default: 1, `0` is treated as 1)
    /// - `FUNCD_QUEUE_SIZE`: scheduler capacity (default: 64, `0` = unbounded)
    /// - `FUNCD_CANCEL_FALLBACK_DELAY_MS`: cancel fallback delay (default: 5000)
    /// - `FUNCD_SHUTDOWN_DRAIN_TIMEOUT_MS`: shutdown drain timeout (default: 8000)
    /// - `FUNCD_TOMBSTONE_TTL_MS`: tombstone lifetime (default: 60000)
    /// - `FUNCD_AWAITING_WARN_DELAY_MS`: awaiting-result warning delay (default: 30000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let worker_count = env_usize("FUNCD_WORKER_COUNT", defaults.worker_count)?.max(1);
        let queue_size = env_usize("FUNCD_QUEUE_SIZE", defaults.queue_size)?;

        Ok(Self {
            worker_count,
            queue_size,
            cancel_fallback_delay: env_millis(
                "FUNCD_CANCEL_FALLBACK_DELAY_MS",
                defaults.cancel_fallback_delay,
            )?,
            shutdown_drain_timeout: env_millis(
                "FUNCD_SHUTDOWN_DRAIN_TIMEOUT_MS",
                defaults.shutdown_drain_timeout,
            )?,
            tombstone_ttl: env_millis("FUNCD_TOMBSTONE_TTL_MS", defaults.tombstone_ttl)?,
            awaiting_warn_delay: env_millis(
                "FUNCD_AWAITING_WARN_DELAY_MS",
                defaults.awaiting_warn_delay,
            )?,
        })
    }
}

fn env_usize(key: &'static str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(key, "must be a non-negative integer")),
        Err(_) => Ok(default),
    }
}

fn env_millis(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid(key, "must be a duration in milliseconds")),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
