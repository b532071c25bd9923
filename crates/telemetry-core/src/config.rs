use crate::constants;
use crate::errors;
use serde::Deserialize;
use std::env;

/// Configuration consumed by the telemetry core.
///
/// Configuration ownership lives outside the core: this is the
/// snapshot handed in at startup, also captured per transaction so a
/// mid-flight settings change never alters an in-progress unit of
/// work.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Service name reported as `entity.name` in linking metadata.
    pub app_name: String,
    /// Stable entity identifier reported as `entity.guid`.
    pub entity_guid: String,
    /// Hostname reported in linking metadata.
    pub hostname: String,
    /// When set, log forwarding and local decoration are forced off
    /// regardless of the `application_logging` flags.
    pub high_security: bool,
    pub application_logging: ApplicationLogging,
    pub event_harvest_config: EventHarvestConfig,
    /// Harvest timer interval in seconds.
    pub harvest_interval_secs: u64,
    /// Log level for the agent's own diagnostics (trace..error).
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationLogging {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "toggle_on")]
    pub forwarding: Toggle,
    #[serde(default = "toggle_off")]
    pub local_decorating: Toggle,
    #[serde(default = "toggle_on")]
    pub metrics: Toggle,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Toggle {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventHarvestConfig {
    pub harvest_limits: HarvestLimits,
}

/// Per-category caps applied to one harvest cycle.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HarvestLimits {
    #[serde(default = "default_metric_limit")]
    pub metric_data: usize,
    #[serde(default = "default_log_limit")]
    pub log_event_data: usize,
}

fn default_true() -> bool {
    true
}

fn toggle_on() -> Toggle {
    Toggle { enabled: true }
}

fn toggle_off() -> Toggle {
    Toggle { enabled: false }
}

fn default_metric_limit() -> usize {
    constants::DEFAULT_METRIC_DATA_LIMIT
}

fn default_log_limit() -> usize {
    constants::DEFAULT_LOG_EVENT_DATA_LIMIT
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            app_name: "unnamed-application".to_string(),
            entity_guid: String::new(),
            hostname: default_hostname(),
            high_security: false,
            application_logging: ApplicationLogging::default(),
            event_harvest_config: EventHarvestConfig::default(),
            harvest_interval_secs: constants::DEFAULT_HARVEST_INTERVAL_SECS,
            log_level: "info".to_string(),
        }
    }
}

impl Default for ApplicationLogging {
    fn default() -> Self {
        Self {
            enabled: true,
            forwarding: Toggle { enabled: true },
            local_decorating: Toggle { enabled: false },
            metrics: Toggle { enabled: true },
        }
    }
}

impl Default for EventHarvestConfig {
    fn default() -> Self {
        Self {
            harvest_limits: HarvestLimits::default(),
        }
    }
}

impl Default for HarvestLimits {
    fn default() -> Self {
        Self {
            metric_data: constants::DEFAULT_METRIC_DATA_LIMIT,
            log_event_data: constants::DEFAULT_LOG_EVENT_DATA_LIMIT,
        }
    }
}

fn default_hostname() -> String {
    env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|val| val.to_lowercase() != "false" && val != "0")
        .unwrap_or(default)
}

impl AgentConfig {
    /// Create configuration from `APM_`-prefixed environment variables.
    pub fn from_env() -> Result<Self, errors::Config> {
        let defaults = Self::default();

        let config = Self {
            app_name: env::var("APM_APP_NAME").unwrap_or(defaults.app_name),
            entity_guid: env::var("APM_ENTITY_GUID").unwrap_or_default(),
            hostname: env::var("APM_HOSTNAME").unwrap_or(defaults.hostname),
            high_security: env_bool("APM_HIGH_SECURITY", false),
            application_logging: ApplicationLogging {
                enabled: env_bool("APM_APPLICATION_LOGGING_ENABLED", true),
                forwarding: Toggle {
                    enabled: env_bool("APM_LOG_FORWARDING_ENABLED", true),
                },
                local_decorating: Toggle {
                    enabled: env_bool("APM_LOG_LOCAL_DECORATING_ENABLED", false),
                },
                metrics: Toggle {
                    enabled: env_bool("APM_LOG_METRICS_ENABLED", true),
                },
            },
            event_harvest_config: EventHarvestConfig {
                harvest_limits: HarvestLimits {
                    metric_data: env::var("APM_METRIC_DATA_LIMIT")
                        .ok()
                        .and_then(|val| val.parse().ok())
                        .unwrap_or(constants::DEFAULT_METRIC_DATA_LIMIT),
                    log_event_data: env::var("APM_LOG_EVENT_DATA_LIMIT")
                        .ok()
                        .and_then(|val| val.parse().ok())
                        .unwrap_or(constants::DEFAULT_LOG_EVENT_DATA_LIMIT),
                },
            },
            harvest_interval_secs: env::var("APM_HARVEST_INTERVAL_SECS")
                .ok()
                .and_then(|val| val.parse().ok())
                .unwrap_or(constants::DEFAULT_HARVEST_INTERVAL_SECS),
            log_level: env::var("APM_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or_else(|_| "info".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), errors::Config> {
        if self.app_name.trim().is_empty() {
            return Err(errors::Config::Invalid(
                "APM_APP_NAME cannot be empty".to_string(),
            ));
        }

        if self.harvest_interval_secs == 0 {
            return Err(errors::Config::Invalid(
                "harvest interval must be greater than 0".to_string(),
            ));
        }

        let limits = &self.event_harvest_config.harvest_limits;
        if limits.metric_data == 0 || limits.log_event_data == 0 {
            return Err(errors::Config::Invalid(
                "harvest limits must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(errors::Config::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Whether captured log events are forwarded at all.
    pub fn log_forwarding_enabled(&self) -> bool {
        !self.high_security
            && self.application_logging.enabled
            && self.application_logging.forwarding.enabled
    }

    /// Whether the local-decoration blob may be appended to log lines.
    pub fn local_decorating_enabled(&self) -> bool {
        !self.high_security
            && self.application_logging.enabled
            && self.application_logging.local_decorating.enabled
    }

    /// Whether `Logging/lines` counters are recorded per log line.
    pub fn log_metrics_enabled(&self) -> bool {
        self.application_logging.enabled && self.application_logging.metrics.enabled
    }

    /// Per-transaction log event cap for one harvest cycle.
    pub fn transaction_log_cap(&self) -> usize {
        (self.event_harvest_config.harvest_limits.log_event_data
            / constants::TRANSACTION_LOG_CAP_DIVISOR)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_interval() {
        let config = AgentConfig {
            harvest_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_limits() {
        let mut config = AgentConfig::default();
        config.event_harvest_config.harvest_limits.log_event_data = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = AgentConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_high_security_forces_forwarding_off() {
        let config = AgentConfig {
            high_security: true,
            ..Default::default()
        };
        assert!(!config.log_forwarding_enabled());
        assert!(!config.local_decorating_enabled());
        // Line counters are not sensitive data and stay on.
        assert!(config.log_metrics_enabled());
    }

    #[test]
    fn test_transaction_log_cap_is_a_twelfth() {
        let config = AgentConfig::default();
        assert_eq!(
            config.transaction_log_cap(),
            constants::DEFAULT_LOG_EVENT_DATA_LIMIT / 12
        );

        let mut tiny = AgentConfig::default();
        tiny.event_harvest_config.harvest_limits.log_event_data = 5;
        assert_eq!(tiny.transaction_log_cap(), 1);
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: AgentConfig = serde_json::from_str(
            r#"{"app_name":"checkout","application_logging":{"enabled":false}}"#,
        )
        .unwrap();
        assert_eq!(config.app_name, "checkout");
        assert!(!config.application_logging.enabled);
        assert!(!config.log_forwarding_enabled());
    }
}
