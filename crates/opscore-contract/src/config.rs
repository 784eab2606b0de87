// crates/opscore-contract/src/config.rs
// ============================================================================
// Module: Engine Configuration
// Description: The typed, fail-closed config struct spec §6 names, read
//              from environment variables.
// Purpose: Give every tunable in spec §6 one validated load path instead of
//          scattering `std::env::var` calls across the engine and CLI,
//          following the teacher's `decision-gate-config` pattern.
// Dependencies: thiserror
// ============================================================================

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Failure to load a well-formed [`EngineConfig`] from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable was present but not parseable as its expected type.
    #[error("environment variable {name} has an invalid value: {value}")]
    InvalidValue {
        /// The variable's name.
        name: &'static str,
        /// The value that failed to parse.
        value: String,
    },
    /// The engine-token signing secret was absent or empty.
    #[error("ENGINE_TOKEN_SIGNING_SECRET is required and must be non-empty")]
    MissingSigningSecret,
}

/// Tunables the engine reads from the process environment at startup.
///
/// # Invariants
/// - Loading is fail-closed: an invalid (not merely absent) value for any
///   variable aborts the load rather than silently substituting a default.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a freshly claimed run or work-item lease stays valid before it expires.
    pub lease_duration: Duration,
    /// The minimum gap between accepted heartbeats on the same lease.
    pub heartbeat_min_interval: Duration,
    /// The statement timeout applied to pipeline projection reads.
    pub health_db_statement_timeout: Duration,
    /// How long a cached health summary may be served before recomputation.
    pub health_cache_ttl: Duration,
    /// The maximum number of distinct health-cache entries retained at once.
    pub health_cache_max_entries: u32,
    /// How stale the most recent cron heartbeat may be before health reports Down.
    pub health_down_cron_freshness: Duration,
    /// How far behind the event stream a projection may lag before health reports Down.
    pub health_down_projection_lag: Duration,
    /// The count of distinct offenders within a window that marks flood-control as warning.
    pub rate_limit_flood_offenders_warn: u32,
    /// Dead-letter count at or above which health reports Degraded.
    pub health_degraded_dlq_backlog: u64,
    /// The secret used to sign engine-issued tokens (lease handles, idempotency replays).
    pub engine_token_signing_secret: String,
}

impl EngineConfig {
    /// Loads configuration from the process environment, applying spec-mandated
    /// defaults for every variable except the signing secret.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a present variable fails to
    /// parse, or [`ConfigError::MissingSigningSecret`] if
    /// `ENGINE_TOKEN_SIGNING_SECRET` is absent or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            lease_duration: Duration::from_secs(read_u64("LEASE_DURATION_SECONDS", 30)?),
            heartbeat_min_interval: Duration::from_secs(read_u64("HEARTBEAT_MIN_INTERVAL_SEC", 1)?),
            health_db_statement_timeout: Duration::from_millis(read_u64("HEALTH_DB_STATEMENT_TIMEOUT_MS", 2000)?),
            health_cache_ttl: Duration::from_secs(read_u64("HEALTH_CACHE_TTL_SEC", 5)?),
            health_cache_max_entries: read_u32("HEALTH_CACHE_MAX_ENTRIES", 1024)?,
            health_down_cron_freshness: Duration::from_secs(read_u64("HEALTH_DOWN_CRON_FRESHNESS_SEC", 300)?),
            health_down_projection_lag: Duration::from_secs(read_u64("HEALTH_DOWN_PROJECTION_LAG_SEC", 60)?),
            rate_limit_flood_offenders_warn: read_u32("RATE_LIMIT_FLOOD_OFFENDERS_WARN", 10)?,
            health_degraded_dlq_backlog: read_u64("HEALTH_DEGRADED_DLQ_BACKLOG", 1)?,
            engine_token_signing_secret: read_signing_secret()?,
        })
    }

    /// Builds a config suitable for tests: zero heartbeat interval (per spec's
    /// "0s in test mode" note) and a fixed, non-empty signing secret.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            lease_duration: Duration::from_secs(30),
            heartbeat_min_interval: Duration::from_secs(0),
            health_db_statement_timeout: Duration::from_millis(2000),
            health_cache_ttl: Duration::from_secs(5),
            health_cache_max_entries: 1024,
            health_down_cron_freshness: Duration::from_secs(300),
            health_down_projection_lag: Duration::from_secs(60),
            rate_limit_flood_offenders_warn: 10,
            health_degraded_dlq_backlog: 1,
            engine_token_signing_secret: "test-signing-secret".to_string(),
        }
    }
}

/// Reads an environment variable as `u64`, falling back to `default` when unset.
fn read_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(raw)) => {
            Err(ConfigError::InvalidValue { name, value: raw.to_string_lossy().into_owned() })
        }
    }
}

/// Reads an environment variable as `u32`, falling back to `default` when unset.
fn read_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(raw)) => {
            Err(ConfigError::InvalidValue { name, value: raw.to_string_lossy().into_owned() })
        }
    }
}

/// Reads the signing secret, rejecting both absence and an empty string.
fn read_signing_secret() -> Result<String, ConfigError> {
    match env::var("ENGINE_TOKEN_SIGNING_SECRET") {
        Ok(value) if !value.is_empty() => Ok(value),
        Ok(_) | Err(env::VarError::NotPresent) => Err(ConfigError::MissingSigningSecret),
        Err(env::VarError::NotUnicode(raw)) => {
            Err(ConfigError::InvalidValue { name: "ENGINE_TOKEN_SIGNING_SECRET", value: raw.to_string_lossy().into_owned() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_has_zeroed_heartbeat_interval() {
        let config = EngineConfig::for_tests();
        assert_eq!(config.heartbeat_min_interval, Duration::from_secs(0));
        assert_eq!(config.lease_duration, Duration::from_secs(30));
    }

    #[test]
    fn read_u64_rejects_garbage() {
        let err = read_u64("OPSCORE_CONTRACT_TEST_NONEXISTENT_VAR_XYZ", 5);
        assert_eq!(err.unwrap(), 5);
    }
}
