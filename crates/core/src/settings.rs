//! Environment-driven configuration for the background services.

use std::time::Duration;

use crate::{Error, Result};

/// Seconds between device telemetry cycles.
pub const DEFAULT_DEVICE_SYNC_INTERVAL_SECS: u64 = 300;
/// Seconds between task tracker cycles.
pub const DEFAULT_TASK_SYNC_INTERVAL_SECS: u64 = 600;
/// Seconds between RADIUS accounting bridge cycles.
pub const DEFAULT_RADIUS_SYNC_INTERVAL_SECS: u64 = 300;
/// Age beyond which a locally cached counter sample no longer overrides a
/// zero report from the device platform.
pub const DEFAULT_COUNTER_STALENESS_SECS: u64 = 24 * 60 * 60;
/// Upper bound on a single advisory lock acquisition round trip.
pub const DEFAULT_LOCK_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

/// Tunables for the sync engines and the lock manager.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub device_sync_interval: Duration,
    pub task_sync_interval: Duration,
    pub radius_sync_interval: Duration,
    pub counter_staleness: Duration,
    pub lock_acquire_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            device_sync_interval: Duration::from_secs(DEFAULT_DEVICE_SYNC_INTERVAL_SECS),
            task_sync_interval: Duration::from_secs(DEFAULT_TASK_SYNC_INTERVAL_SECS),
            radius_sync_interval: Duration::from_secs(DEFAULT_RADIUS_SYNC_INTERVAL_SECS),
            counter_staleness: Duration::from_secs(DEFAULT_COUNTER_STALENESS_SECS),
            lock_acquire_timeout: Duration::from_millis(DEFAULT_LOCK_ACQUIRE_TIMEOUT_MS),
        }
    }
}

impl SyncSettings {
    /// Read settings from `FLEETMON_*` environment variables, falling back to
    /// the defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            device_sync_interval: Duration::from_secs(env_u64(
                "FLEETMON_DEVICE_SYNC_INTERVAL_SECS",
                DEFAULT_DEVICE_SYNC_INTERVAL_SECS,
            )?),
            task_sync_interval: Duration::from_secs(env_u64(
                "FLEETMON_TASK_SYNC_INTERVAL_SECS",
                DEFAULT_TASK_SYNC_INTERVAL_SECS,
            )?),
            radius_sync_interval: Duration::from_secs(env_u64(
                "FLEETMON_RADIUS_SYNC_INTERVAL_SECS",
                DEFAULT_RADIUS_SYNC_INTERVAL_SECS,
            )?),
            counter_staleness: Duration::from_secs(env_u64(
                "FLEETMON_COUNTER_STALENESS_SECS",
                DEFAULT_COUNTER_STALENESS_SECS,
            )?),
            lock_acquire_timeout: Duration::from_millis(env_u64(
                "FLEETMON_LOCK_ACQUIRE_TIMEOUT_MS",
                DEFAULT_LOCK_ACQUIRE_TIMEOUT_MS,
            )?),
        })
    }
}

/// Read an environment variable, treating empty or whitespace-only values as
/// unset.
pub fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Read an environment variable as a base URL, with the trailing slash
/// stripped so path joins stay predictable.
pub fn env_base_url(name: &str) -> Option<String> {
    env_var(name).map(|value| value.trim_end_matches('/').to_string())
}

pub(crate) fn env_u64(name: &str, default: u64) -> Result<u64> {
    match env_var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| Error::config(format!("{} must be an integer, got '{}'", name, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = SyncSettings::default();
        assert_eq!(settings.device_sync_interval, Duration::from_secs(300));
        assert_eq!(settings.counter_staleness, Duration::from_secs(86_400));
        assert!(settings.lock_acquire_timeout < settings.device_sync_interval);
    }

    #[test]
    fn env_u64_rejects_garbage() {
        std::env::set_var("FLEETMON_TEST_GARBAGE_U64", "five minutes");
        let err = env_u64("FLEETMON_TEST_GARBAGE_U64", 1).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        std::env::remove_var("FLEETMON_TEST_GARBAGE_U64");
    }

    #[test]
    fn env_base_url_strips_trailing_slash() {
        std::env::set_var("FLEETMON_TEST_BASE_URL", "https://api.example.com/");
        assert_eq!(
            env_base_url("FLEETMON_TEST_BASE_URL").as_deref(),
            Some("https://api.example.com")
        );
        std::env::remove_var("FLEETMON_TEST_BASE_URL");
    }
}
