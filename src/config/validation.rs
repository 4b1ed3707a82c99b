//! Configuration validation.
//!
//! Validation never fails outright: it collects errors (the engine must not
//! start) and warnings (the engine starts, but probably not as intended) into
//! a [`ValidationReport`].

use super::{parse_time_of_day, EngineConfig, RunMode};
use regex::Regex;

/// Result of configuration validation.
///
/// # Example
///
/// ```
/// use prospector::config::ValidationReport;
///
/// let report = ValidationReport::new();
/// assert!(report.is_valid()); // Empty report is valid
/// assert_eq!(report.exit_code(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Errors that prevent the configuration from being valid.
    pub errors: Vec<String>,
    /// Warnings that don't prevent validity but indicate potential issues.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Create a new empty validation report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the configuration is valid (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns 0 if valid, 1 if invalid.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.is_valid() {
            0
        } else {
            1
        }
    }

    /// One-line summary of the validation result.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_valid() {
            if self.warnings.is_empty() {
                "Configuration is valid.".to_string()
            } else {
                format!(
                    "Configuration is valid with {} warning(s).",
                    self.warnings.len()
                )
            }
        } else {
            format!(
                "Configuration is invalid with {} error(s).",
                self.errors.len()
            )
        }
    }

    /// Multi-line report listing every error and warning.
    #[must_use]
    pub fn verbose_report(&self) -> String {
        let mut lines = vec![
            "Configuration Validation Report".to_string(),
            "\u{2500}".repeat(50),
        ];

        if !self.errors.is_empty() {
            lines.push(String::new());
            lines.push(format!("Errors ({}):", self.errors.len()));
            for error in &self.errors {
                lines.push(format!("  \u{2717} {}", error));
            }
        }

        if !self.warnings.is_empty() {
            lines.push(String::new());
            lines.push(format!("Warnings ({}):", self.warnings.len()));
            for warning in &self.warnings {
                lines.push(format!("  \u{26a0} {}", warning));
            }
        }

        lines.push(String::new());
        lines.push(format!("Status: {}", self.summary()));
        lines.join("\n")
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

pub(super) fn validate(config: &EngineConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    let outreach = &config.outreach;
    if outreach.batch_size == 0 {
        report.error("outreach.batch_size must be greater than 0");
    }
    if outreach.tick_interval_secs == 0 {
        report.error("outreach.tick_interval_secs must be greater than 0");
    }
    if outreach.provider_timeout_secs == 0 {
        report.error("outreach.provider_timeout_secs must be greater than 0");
    }
    if outreach.max_errors_per_tick == 0 {
        report.warn("outreach.max_errors_per_tick = 0 aborts a tick on its first failure");
    }
    if outreach.daily_email_cap == 0 {
        report.warn("outreach.daily_email_cap = 0 disables sending entirely");
    }
    let batch_time = outreach.inter_send_delay_secs * outreach.batch_size as u64;
    if batch_time > outreach.tick_interval_secs {
        report.warn(format!(
            "a full batch takes {}s of inter-send delay, longer than the {}s tick interval",
            batch_time, outreach.tick_interval_secs
        ));
    }
    match outreach.sender_address.as_deref() {
        None => report.warn("outreach.sender_address is not set; `run` and `tick` will refuse to start"),
        Some(address) if !is_plausible_email(address) => {
            report.error(format!("outreach.sender_address '{}' is not an email address", address))
        }
        Some(_) => {}
    }

    for time in &config.discovery.daily_at {
        if parse_time_of_day(time).is_none() {
            report.error(format!("discovery.daily_at entry '{}' is not HH:MM", time));
        }
    }
    if config.discovery.daily_at.is_empty() {
        report.warn("discovery.daily_at is empty; discovery only runs at startup and on phase changes");
    }

    if !(-12..=14).contains(&config.engine.utc_offset_hours) {
        report.error(format!(
            "engine.utc_offset_hours {} is outside -12..=14",
            config.engine.utc_offset_hours
        ));
    }
    if config.engine.mode == RunMode::Duration && config.engine.duration_minutes == 0 {
        report.error("engine.duration_minutes must be greater than 0 in duration mode");
    }

    if !(1..=10).contains(&config.escalation.severity_threshold) {
        report.error(format!(
            "escalation.severity_threshold {} is outside 1..=10",
            config.escalation.severity_threshold
        ));
    }

    let health = &config.health;
    if health.interval_secs == 0 {
        report.error("health.interval_secs must be greater than 0");
    }
    if health.heartbeat_secs == 0 {
        report.error("health.heartbeat_secs must be greater than 0");
    } else if health.snapshot_max_age_secs < health.heartbeat_secs {
        report.warn(format!(
            "health.snapshot_max_age_secs ({}) is shorter than the heartbeat ({}); probes will see stale snapshots",
            health.snapshot_max_age_secs, health.heartbeat_secs
        ));
    }

    report
}

/// Loose address check, enough to catch obvious typos in configuration.
pub fn is_plausible_email(address: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[A-Za-z]{2,}$")
        .map(|re| re.is_match(address.trim()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.outreach.sender_address = Some("hello@example.com".into());
        config.outreach.inter_send_delay_secs = 10;
        config
    }

    #[test]
    fn test_valid_config_has_no_findings() {
        let report = valid_config().validate();
        assert!(report.is_valid(), "{}", report.verbose_report());
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.summary(), "Configuration is valid.");
    }

    #[test]
    fn test_zero_batch_size_is_error() {
        let mut config = valid_config();
        config.outreach.batch_size = 0;
        let report = config.validate();
        assert!(!report.is_valid());
        assert_eq!(report.exit_code(), 1);
        assert!(report.errors[0].contains("batch_size"));
    }

    #[test]
    fn test_bad_discovery_time_is_error() {
        let mut config = valid_config();
        config.discovery.daily_at = vec!["8am".into()];
        let report = config.validate();
        assert!(report.errors.iter().any(|e| e.contains("8am")));
    }

    #[test]
    fn test_missing_sender_is_warning_only() {
        let mut config = valid_config();
        config.outreach.sender_address = None;
        let report = config.validate();
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("sender_address")));
    }

    #[test]
    fn test_invalid_sender_is_error() {
        let mut config = valid_config();
        config.outreach.sender_address = Some("not-an-address".into());
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn test_slow_batch_warns() {
        let mut config = valid_config();
        config.outreach.inter_send_delay_secs = 600;
        let report = config.validate();
        assert!(report.warnings.iter().any(|w| w.contains("inter-send delay")));
    }

    #[test]
    fn test_severity_threshold_range() {
        let mut config = valid_config();
        config.escalation.severity_threshold = 0;
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn test_plausible_email() {
        assert!(is_plausible_email("owner@smiles-dental.com"));
        assert!(!is_plausible_email("owner@localhost"));
        assert!(!is_plausible_email("two@@signs.com"));
    }

    #[test]
    fn test_verbose_report_lists_errors() {
        let mut config = valid_config();
        config.outreach.batch_size = 0;
        let text = config.validate().verbose_report();
        assert!(text.contains("Errors (1):"));
        assert!(text.contains("Status: Configuration is invalid"));
    }
}
