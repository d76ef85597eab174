//! Configuration management.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, WardenError};

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Admission-control configuration
    pub admission: AdmissionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

/// Limit and refill window for one tier of caller.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TierLimit {
    /// Requests admitted per window
    pub capacity: u32,

    /// Refill window
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

/// Admission-control policy, immutable after startup.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Per-IP tier (hard window reset)
    #[serde(default = "default_ip_tier")]
    pub ip: TierLimit,

    /// Reseller user tier (hard window reset)
    #[serde(default = "default_reseller_tier")]
    pub reseller: TierLimit,

    /// Regular user tier (continuous refill)
    #[serde(default = "default_user_tier")]
    pub user: TierLimit,

    /// Consecutive IP violations before the IP is blacklisted
    #[serde(default = "default_blacklist_threshold")]
    pub blacklist_threshold: u32,

    /// Keys idle longer than this are evicted by the reaper
    #[serde(default = "default_idle_eviction", with = "humantime_serde")]
    pub idle_eviction: Duration,

    /// How often the reaper runs
    #[serde(default = "default_reaper_interval", with = "humantime_serde")]
    pub reaper_interval: Duration,

    /// Trusted proxy headers for client IP extraction, in precedence order
    #[serde(default = "default_trusted_proxy_headers")]
    pub trusted_proxy_headers: Vec<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            ip: default_ip_tier(),
            reseller: default_reseller_tier(),
            user: default_user_tier(),
            blacklist_threshold: default_blacklist_threshold(),
            idle_eviction: default_idle_eviction(),
            reaper_interval: default_reaper_interval(),
            trusted_proxy_headers: default_trusted_proxy_headers(),
        }
    }
}

impl AdmissionConfig {
    /// Validate the policy at startup. A zero limit or window would turn a
    /// tier into a black hole (or, worse, an unlimited one), so it is fatal
    /// here rather than discovered per request.
    pub fn validate(&self) -> Result<()> {
        for (name, tier) in [
            ("ip", &self.ip),
            ("reseller", &self.reseller),
            ("user", &self.user),
        ] {
            if tier.capacity == 0 {
                return Err(WardenError::configuration(format!(
                    "{} tier capacity must be positive",
                    name
                )));
            }
            if tier.window.is_zero() {
                return Err(WardenError::configuration(format!(
                    "{} tier window must be positive",
                    name
                )));
            }
        }

        if self.blacklist_threshold == 0 {
            return Err(WardenError::configuration(
                "blacklist threshold must be positive",
            ));
        }
        if self.reaper_interval.is_zero() {
            return Err(WardenError::configuration(
                "reaper interval must be positive",
            ));
        }
        if self.idle_eviction.is_zero() {
            return Err(WardenError::configuration(
                "idle eviction window must be positive",
            ));
        }

        Ok(())
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_ip_tier() -> TierLimit {
    TierLimit { capacity: 60, window: Duration::from_secs(60) }
}
fn default_reseller_tier() -> TierLimit {
    TierLimit { capacity: 600, window: Duration::from_secs(60) }
}
fn default_user_tier() -> TierLimit {
    TierLimit { capacity: 120, window: Duration::from_secs(60) }
}
fn default_blacklist_threshold() -> u32 { 10 }
fn default_idle_eviction() -> Duration { Duration::from_secs(600) }
fn default_reaper_interval() -> Duration { Duration::from_secs(60) }
fn default_trusted_proxy_headers() -> Vec<String> {
    vec!["X-Forwarded-For".to_string(), "X-Real-IP".to_string()]
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("WARDEN").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("WARDEN").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = Config::default();
        assert!(config.admission.validate().is_ok());
    }

    #[test]
    fn zero_capacity_fails_validation() {
        let mut admission = AdmissionConfig::default();
        admission.ip.capacity = 0;
        assert!(admission.validate().is_err());
    }

    #[test]
    fn zero_threshold_fails_validation() {
        let mut admission = AdmissionConfig::default();
        admission.blacklist_threshold = 0;
        assert!(admission.validate().is_err());
    }

    #[test]
    fn zero_reaper_interval_fails_validation() {
        let mut admission = AdmissionConfig::default();
        admission.reaper_interval = Duration::ZERO;
        assert!(admission.validate().is_err());
    }
}
