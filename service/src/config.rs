//! Configuration management for the onboarding service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! A `.env` file is honored by the binary (via `dotenvy`) before this runs.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required value is empty
    #[error("{var} must not be empty")]
    Empty {
        /// Environment variable name
        var: &'static str,
    },

    /// A value that must be positive is zero
    #[error("{var} must be greater than zero")]
    Zero {
        /// Environment variable name
        var: &'static str,
    },

    /// A value is not one of the accepted forms
    #[error("{var} has invalid value '{value}'")]
    Invalid {
        /// Environment variable name
        var: &'static str,
        /// Offending value
        value: String,
    },
}

/// Where `send_mail` requests are fulfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailBackend {
    /// Log mails locally
    Console,
    /// Forward to the mail service queue
    Remote,
}

impl FromStr for MailBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "console" => Ok(Self::Console),
            "remote" => Ok(Self::Remote),
            other => Err(ConfigError::Invalid {
                var: "MAIL_BACKEND",
                value: other.to_string(),
            }),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Request/reply settings
    pub rpc: RpcConfig,
    /// RedPanda/Kafka configuration
    pub redpanda: RedpandaConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Request/reply settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Queue this service consumes and receives replies on
    pub service_queue: String,
    /// Queue of the employee directory service
    pub employee_service_queue: String,
    /// Queue of the mail service
    pub mail_service_queue: String,
    /// Bound on every outgoing call, in milliseconds
    pub call_timeout_ms: u64,
    /// Capacity of the publish queue
    pub dispatch_buffer: usize,
    /// Where `send_mail` is fulfilled: `console` or `remote`
    pub mail_backend: String,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

impl RpcConfig {
    /// Bound on every outgoing call.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Time allowed for queued publishes to drain on shutdown.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

/// RedPanda/Kafka configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedpandaConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Consumer group (defaults to the service queue name)
    pub consumer_group: Option<String>,
    /// Producer acks: "0", "1" or "all"
    pub producer_acks: String,
    /// Offset reset policy for a new group: "earliest", "latest" or "error"
    pub auto_offset_reset: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder
    pub enabled: bool,
    /// Address the scrape endpoint is served on
    pub addr: String,
}

impl MetricsConfig {
    /// Parsed scrape address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `addr` is not a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.addr.parse().map_err(|_| ConfigError::Invalid {
            var: "METRICS_ADDR",
            value: self.addr.clone(),
        })
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Unparseable numbers fall back to their defaults; call
    /// [`validate`](Self::validate) before use.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Self {
            rpc: RpcConfig {
                service_queue: string("SERVICE_QUEUE", "onboarding-service"),
                employee_service_queue: string("EMPLOYEE_SERVICE_QUEUE", "employee-service"),
                mail_service_queue: string("MAIL_SERVICE_QUEUE", "mail-service"),
                call_timeout_ms: lookup("RPC_CALL_TIMEOUT_MS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5000),
                dispatch_buffer: lookup("RPC_DISPATCH_BUFFER")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1024),
                mail_backend: string("MAIL_BACKEND", "console"),
                shutdown_timeout: lookup("SHUTDOWN_TIMEOUT")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            },
            redpanda: RedpandaConfig {
                brokers: string("REDPANDA_BROKERS", "localhost:9092"),
                consumer_group: lookup("REDPANDA_CONSUMER_GROUP").filter(|s| !s.is_empty()),
                producer_acks: string("REDPANDA_PRODUCER_ACKS", "all"),
                auto_offset_reset: string("REDPANDA_AUTO_OFFSET_RESET", "earliest"),
            },
            metrics: MetricsConfig {
                enabled: lookup("METRICS_ENABLED")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(true),
                addr: string("METRICS_ADDR", "0.0.0.0:9090"),
            },
        }
    }

    /// Check the configuration for values the service cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (var, value) in [
            ("SERVICE_QUEUE", &self.rpc.service_queue),
            ("EMPLOYEE_SERVICE_QUEUE", &self.rpc.employee_service_queue),
            ("MAIL_SERVICE_QUEUE", &self.rpc.mail_service_queue),
            ("REDPANDA_BROKERS", &self.redpanda.brokers),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty { var });
            }
        }

        if self.rpc.call_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                var: "RPC_CALL_TIMEOUT_MS",
            });
        }
        if self.rpc.dispatch_buffer == 0 {
            return Err(ConfigError::Zero {
                var: "RPC_DISPATCH_BUFFER",
            });
        }

        if !matches!(self.redpanda.producer_acks.as_str(), "0" | "1" | "all" | "-1") {
            return Err(ConfigError::Invalid {
                var: "REDPANDA_PRODUCER_ACKS",
                value: self.redpanda.producer_acks.clone(),
            });
        }
        if !matches!(
            self.redpanda.auto_offset_reset.as_str(),
            "earliest" | "latest" | "error"
        ) {
            return Err(ConfigError::Invalid {
                var: "REDPANDA_AUTO_OFFSET_RESET",
                value: self.redpanda.auto_offset_reset.clone(),
            });
        }

        self.rpc.mail_backend.parse::<MailBackend>()?;

        if self.metrics.enabled {
            self.metrics.socket_addr()?;
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> ServiceConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_are_valid() {
        let config = load(&[]);
        assert_eq!(config.rpc.service_queue, "onboarding-service");
        assert_eq!(config.rpc.employee_service_queue, "employee-service");
        assert_eq!(config.rpc.mail_service_queue, "mail-service");
        assert_eq!(config.rpc.call_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.rpc.mail_backend.parse::<MailBackend>(),
            Ok(MailBackend::Console)
        );
        assert_eq!(config.redpanda.consumer_group, None);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn overrides_are_read() {
        let config = load(&[
            ("SERVICE_QUEUE", "onboarding-blue"),
            ("RPC_CALL_TIMEOUT_MS", "250"),
            ("RPC_DISPATCH_BUFFER", "16"),
            ("MAIL_BACKEND", "remote"),
            ("REDPANDA_CONSUMER_GROUP", "onboarding"),
            ("METRICS_ENABLED", "false"),
        ]);
        assert_eq!(config.rpc.service_queue, "onboarding-blue");
        assert_eq!(config.rpc.call_timeout(), Duration::from_millis(250));
        assert_eq!(config.rpc.dispatch_buffer, 16);
        assert_eq!(
            config.rpc.mail_backend.parse::<MailBackend>(),
            Ok(MailBackend::Remote)
        );
        assert_eq!(config.redpanda.consumer_group.as_deref(), Some("onboarding"));
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn unparseable_numbers_fall_back_to_defaults() {
        let config = load(&[("RPC_CALL_TIMEOUT_MS", "soon")]);
        assert_eq!(config.rpc.call_timeout_ms, 5000);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = load(&[("RPC_CALL_TIMEOUT_MS", "0")]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                var: "RPC_CALL_TIMEOUT_MS"
            })
        );
    }

    #[test]
    fn empty_queue_is_rejected() {
        let config = load(&[("MAIL_SERVICE_QUEUE", " ")]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::Empty {
                var: "MAIL_SERVICE_QUEUE"
            })
        );
    }

    #[test]
    fn invalid_broker_settings_are_rejected() {
        let config = load(&[("REDPANDA_PRODUCER_ACKS", "most")]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let config = load(&[("REDPANDA_AUTO_OFFSET_RESET", "middle")]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let config = load(&[("METRICS_ADDR", "not-an-address")]);
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "METRICS_ADDR has invalid value 'not-an-address'"
        );
    }

    #[test]
    fn unknown_mail_backend_is_rejected() {
        let config = load(&[("MAIL_BACKEND", "remot")]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::Invalid {
                var: "MAIL_BACKEND",
                value: "remot".to_string(),
            })
        );
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "MAIL_BACKEND has invalid value 'remot'"
        );
    }
}
