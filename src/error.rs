//! Custom error types for the outreach engine.
//!
//! This module provides structured error types that let each component
//! decide locally whether a failure is recovered (provider hiccups, corrupt
//! strategy data) or fatal (missing configuration at startup).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Required credential or setting is absent
    #[error("Missing required setting: {setting}")]
    MissingSetting { setting: String },

    // =========================================================================
    // Strategy Errors
    // =========================================================================
    /// Persisted growth strategy could not be read or parsed
    #[error("Strategy data corrupt at {path}: {reason}")]
    StrategyCorrupt { path: PathBuf, reason: String },

    /// Strategy document failed structural validation
    #[error("Invalid growth strategy: {reason}")]
    InvalidStrategy { reason: String },

    // =========================================================================
    // Lead Store Errors
    // =========================================================================
    /// No lead with the given dedup key
    #[error("Lead not found: {dedup_key}")]
    LeadNotFound { dedup_key: String },

    /// Lead store operation failed
    #[error("Lead store error: {message}")]
    Store { message: String },

    // =========================================================================
    // Provider Errors
    // =========================================================================
    /// External collaborator call failed
    #[error("Provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    /// External collaborator call exceeded its time budget
    #[error("Provider '{provider}' timed out after {}s", .timeout.as_secs())]
    ProviderTimeout { provider: String, timeout: Duration },

    // =========================================================================
    // Scheduling Errors
    // =========================================================================
    /// Too many failures in a single outreach tick
    #[error("Systemic outage: {errors} failures in one tick (threshold: {threshold})")]
    SystemicOutage { errors: u32, threshold: u32 },

    /// Engine was stopped while an operation was pending
    #[error("Engine stopped")]
    Stopped,

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// SQLite error wrapper
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// TOML parse error wrapper
    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a provider error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a lead store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error is recovered locally (skip and retry later)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. }
                | Self::ProviderTimeout { .. }
                | Self::StrategyCorrupt { .. }
                | Self::SystemicOutage { .. }
        )
    }

    /// Check if this error must abort engine startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::InvalidConfig { .. }
                | Self::MissingSetting { .. }
                | Self::InvalidStrategy { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::InvalidConfig { .. } | Self::MissingSetting { .. } => 7,
            Self::InvalidStrategy { .. } | Self::StrategyCorrupt { .. } => 6,
            Self::SystemicOutage { .. } => 4,
            Self::Stopped => 3,
            _ => 1,
        }
    }
}

/// Type alias for engine results
pub type Result<T> = std::result::Result<T, EngineError>;

/// Extension trait for tagging collaborator failures with the provider name
pub trait IntoProviderError<T> {
    fn into_provider(self, provider: &str) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoProviderError<T> for std::result::Result<T, E> {
    fn into_provider(self, provider: &str) -> Result<T> {
        self.map_err(|e| EngineError::provider(provider, format!("{:#}", e.into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::SystemicOutage {
            errors: 4,
            threshold: 3,
        };
        assert!(err.to_string().contains('4'));
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn test_timeout_display_in_seconds() {
        let err = EngineError::ProviderTimeout {
            provider: "delivery".into(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "Provider 'delivery' timed out after 30s");
    }

    #[test]
    fn test_is_recoverable() {
        assert!(EngineError::provider("discovery", "503").is_recoverable());
        assert!(EngineError::StrategyCorrupt {
            path: PathBuf::from("strategy.json"),
            reason: "eof".into()
        }
        .is_recoverable());
        assert!(!EngineError::config("missing").is_recoverable());
    }

    #[test]
    fn test_is_fatal() {
        assert!(EngineError::MissingSetting {
            setting: "outreach.sender_address".into()
        }
        .is_fatal());
        assert!(EngineError::invalid_config("outreach.batch_size", "must be > 0").is_fatal());
        assert!(!EngineError::provider("render", "boom").is_fatal());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(EngineError::config("test").exit_code(), 7);
        assert_eq!(
            EngineError::SystemicOutage {
                errors: 5,
                threshold: 3
            }
            .exit_code(),
            4
        );
        assert_eq!(EngineError::provider("x", "y").exit_code(), 1);
    }

    #[test]
    fn test_config_with_path() {
        let path = PathBuf::from("/tmp/config.toml");
        let err = EngineError::config_with_path("failed to parse", path.clone());
        if let EngineError::Config {
            message,
            path: opt_path,
        } = err
        {
            assert_eq!(message, "failed to parse");
            assert_eq!(opt_path, Some(path));
        } else {
            panic!("Wrong error variant");
        }
    }

    #[test]
    fn test_into_provider_trait() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));

        match result.into_provider("email") {
            Err(EngineError::Provider { provider, message }) => {
                assert_eq!(provider, "email");
                assert!(message.contains("connection refused"));
            }
            other => panic!("Wrong variant after conversion: {:?}", other),
        }
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: EngineError = io_err.into();
        assert!(matches!(err, EngineError::Io(_)));
        assert!(err.to_string().contains("access denied"));
    }
}
