//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use courtbook::{
    ContextConfig,
    db::DatabaseConfig,
    payments::GatewayConfig,
    settlement::SettlementConfig,
};
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_BIND: SocketAddr =
    SocketAddr::V4(std::net::SocketAddrV4::new(std::net::Ipv4Addr::LOCALHOST, 8080));

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Settlement scheduling configuration
    pub settlement: SettlementSettings,
    /// Outbound payment gateway
    pub gateway: GatewayConfig,
    /// Prometheus exporter address; disabled when absent
    pub metrics_bind: Option<SocketAddr>,
}

/// Security-related configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// JWT signing secret (required)
    pub jwt_secret: String,
    /// Bearer secret of the settlement trigger (required)
    pub cron_secret: String,
    /// Shared webhook signing secret (required)
    pub webhook_secret: String,
}

/// Settlement scheduling configuration
#[derive(Debug, Clone)]
pub struct SettlementSettings {
    /// Minutes before game start a reservation is closed
    pub closing_buffer_minutes: i64,
    /// Extra lookahead in minutes
    pub window_slack_minutes: i64,
    /// In-process tick interval; 0 disables the loop
    pub interval_secs: u64,
    /// Errored webhooks retried per tick
    pub reprocess_batch: i64,
    /// Minutes one run holds a reservation it is closing
    pub lease_minutes: i64,
    /// Capacity of the security event buffer
    pub security_event_capacity: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
    ) -> Result<Self, ConfigError> {
        // Bind address
        let bind = bind_override
            .or_else(|| {
                std::env::var("SERVER_BIND")
                    .ok()
                    .and_then(|s| s.parse().ok())
            })
            .unwrap_or(DEFAULT_BIND);

        // Database configuration
        let mut database = DatabaseConfig::from_env();
        if let Some(url) = database_url_override {
            database.database_url = url;
        }

        // Security configuration (REQUIRED)
        let security = SecurityConfig {
            jwt_secret: required("JWT_SECRET", "Generate with: openssl rand -hex 32")?,
            cron_secret: required("CRON_SECRET", "Generate with: openssl rand -hex 16")?,
            webhook_secret: required(
                "WEBHOOK_SECRET",
                "Copy the webhook token from the gateway dashboard",
            )?,
        };

        let settlement = SettlementSettings {
            closing_buffer_minutes: parse_env_or("CLOSING_BUFFER_MINUTES", 120),
            window_slack_minutes: parse_env_or("CLOSING_WINDOW_SLACK_MINUTES", 30),
            interval_secs: parse_env_or("SETTLEMENT_INTERVAL_SECS", 3600),
            reprocess_batch: parse_env_or("REPROCESS_BATCH_SIZE", 50),
            lease_minutes: parse_env_or("SETTLEMENT_LEASE_MINUTES", 10),
            security_event_capacity: parse_env_or("SECURITY_EVENT_CAPACITY", 500),
        };

        let defaults = GatewayConfig::default();
        let gateway = GatewayConfig {
            name: std::env::var("PAYMENT_GATEWAY_NAME").unwrap_or(defaults.name),
            base_url: std::env::var("PAYMENT_GATEWAY_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("PAYMENT_GATEWAY_API_KEY").unwrap_or_default(),
            timeout: Duration::from_secs(parse_env_or("PAYMENT_GATEWAY_TIMEOUT_SECS", 15)),
        };

        let metrics_bind = std::env::var("METRICS_BIND")
            .ok()
            .and_then(|s| s.parse().ok());

        Ok(ServerConfig {
            bind,
            database,
            security,
            settlement,
            gateway,
            metrics_bind,
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: "Must be at least 32 characters (128-bit security)".to_string(),
            });
        }

        if self.security.cron_secret.len() < 16 {
            return Err(ConfigError::Invalid {
                var: "CRON_SECRET".to_string(),
                reason: "Must be at least 16 characters".to_string(),
            });
        }

        if self.security.webhook_secret.len() < 16 {
            return Err(ConfigError::Invalid {
                var: "WEBHOOK_SECRET".to_string(),
                reason: "Must be at least 16 characters".to_string(),
            });
        }

        if self.settlement.closing_buffer_minutes <= 0 {
            return Err(ConfigError::Invalid {
                var: "CLOSING_BUFFER_MINUTES".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.settlement.window_slack_minutes < 0 {
            return Err(ConfigError::Invalid {
                var: "CLOSING_WINDOW_SLACK_MINUTES".to_string(),
                reason: "Must not be negative".to_string(),
            });
        }

        if self.settlement.reprocess_batch <= 0 {
            return Err(ConfigError::Invalid {
                var: "REPROCESS_BATCH_SIZE".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.settlement.lease_minutes <= 0 {
            return Err(ConfigError::Invalid {
                var: "SETTLEMENT_LEASE_MINUTES".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.settlement.security_event_capacity == 0 {
            return Err(ConfigError::Invalid {
                var: "SECURITY_EVENT_CAPACITY".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.gateway.name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "PAYMENT_GATEWAY_NAME".to_string(),
                reason: "Must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Library context settings derived from this configuration
    pub fn context_config(&self) -> ContextConfig {
        ContextConfig {
            webhook_secret: self.security.webhook_secret.clone(),
            settlement: SettlementConfig {
                closing_buffer: chrono::Duration::minutes(self.settlement.closing_buffer_minutes),
                window_slack: chrono::Duration::minutes(self.settlement.window_slack_minutes),
                reprocess_batch: self.settlement.reprocess_batch,
                lease: chrono::Duration::minutes(self.settlement.lease_minutes),
            },
            security_event_capacity: self.settlement.security_event_capacity,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn required(var: &str, hint: &str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::MissingRequired {
        var: var.to_string(),
        hint: hint.to_string(),
    })
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn config() -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1:8080".parse().unwrap(),
            database: DatabaseConfig::development(),
            security: SecurityConfig {
                jwt_secret: "a".repeat(32),
                cron_secret: "c".repeat(16),
                webhook_secret: "w".repeat(16),
            },
            settlement: SettlementSettings {
                closing_buffer_minutes: 120,
                window_slack_minutes: 30,
                interval_secs: 3600,
                reprocess_batch: 50,
                lease_minutes: 10,
                security_event_capacity: 500,
            },
            gateway: GatewayConfig::default(),
            metrics_bind: None,
        }
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Use openssl".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("JWT_SECRET"));
        assert!(msg.contains("Use openssl"));
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_short_cron_secret_is_invalid() {
        let mut config = config();
        config.security.cron_secret = "short".to_string();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var, .. } if var == "CRON_SECRET"));
    }

    #[test]
    fn test_zero_closing_buffer_is_invalid() {
        let mut config = config();
        config.settlement.closing_buffer_minutes = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_context_config_carries_window() {
        let context = config().context_config();
        assert_eq!(context.settlement.window(), chrono::Duration::minutes(150));
        assert_eq!(context.security_event_capacity, 500);
        assert_eq!(context.settlement.lease, chrono::Duration::minutes(10));
    }

    #[test]
    #[serial]
    fn test_from_env_requires_secrets() {
        // SAFETY: serialized with the other env-mutating tests
        unsafe {
            std::env::remove_var("CRON_SECRET");
            std::env::set_var("JWT_SECRET", "j".repeat(32));
        }

        let err = ServerConfig::from_env(None, None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { var, .. } if var == "CRON_SECRET"));

        unsafe {
            std::env::set_var("CRON_SECRET", "c".repeat(16));
            std::env::set_var("WEBHOOK_SECRET", "w".repeat(16));
            std::env::set_var("SETTLEMENT_INTERVAL_SECS", "0");
        }
        let config = ServerConfig::from_env(Some("0.0.0.0:9000".parse().unwrap()), None).unwrap();
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.settlement.interval_secs, 0);
        assert_eq!(config.settlement.closing_buffer_minutes, 120);

        unsafe {
            std::env::remove_var("JWT_SECRET");
            std::env::remove_var("CRON_SECRET");
            std::env::remove_var("WEBHOOK_SECRET");
            std::env::remove_var("SETTLEMENT_INTERVAL_SECS");
        }
    }
}
