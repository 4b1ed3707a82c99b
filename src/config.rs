//! Configuration management for the outreach engine.
//!
//! Settings are read from `.prospector/config.toml`, then environment
//! overrides are applied, then CLI flags (in `main`). Every section has
//! serde defaults so an empty file is a valid configuration.
//!
//! ```toml
//! [engine]
//! mode = "duration"
//! duration_minutes = 240
//! utc_offset_hours = -6
//! shutdown_grace_secs = 60
//!
//! [outreach]
//! sender_address = "hello@example.com"
//! batch_size = 10
//! daily_email_cap = 50
//!
//! [discovery]
//! daily_at = ["08:00"]
//! city_overrides = ["Austin, TX"]
//!
//! [phases]
//! regression = "hold"
//! ```

pub mod validation;

pub use validation::ValidationReport;

use crate::error::{EngineError, Result};
use crate::phase::RegressionPolicy;
use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory (relative to the project) holding all engine state.
pub const STATE_DIR: &str = ".prospector";

/// Configuration file name inside [`STATE_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

/// How long the engine keeps running once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Run until stopped by a signal or operator.
    #[default]
    Continuous,
    /// Run for `engine.duration_minutes`, then stop.
    Duration,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continuous => write!(f, "continuous"),
            Self::Duration => write!(f, "duration"),
        }
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default)]
    pub mode: RunMode,
    /// Minutes to run when `mode = "duration"`.
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: u64,
    /// Offset of the local business clock used for send windows.
    #[serde(default)]
    pub utc_offset_hours: i32,
    /// Seconds a stopping engine waits for in-flight tasks before aborting them.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_duration_minutes() -> u64 {
    240
}

fn default_shutdown_grace_secs() -> u64 {
    60
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            duration_minutes: default_duration_minutes(),
            utc_offset_hours: 0,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl EngineSection {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// `[outreach]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachConfig {
    #[serde(default = "default_outreach_tick_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Fixed delay between two sends of the same tick.
    #[serde(default = "default_inter_send_delay_secs")]
    pub inter_send_delay_secs: u64,
    /// Upper bound on emails per local day (before reduced-volume scaling).
    #[serde(default = "default_daily_email_cap")]
    pub daily_email_cap: u32,
    /// Failures in one tick above which the tick is aborted.
    #[serde(default = "default_max_errors_per_tick")]
    pub max_errors_per_tick: u32,
    /// Upper bound for every collaborator call.
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    #[serde(default)]
    pub skip_research: bool,
    #[serde(default)]
    pub sender_address: Option<String>,
}

fn default_outreach_tick_secs() -> u64 {
    30 * 60
}

fn default_batch_size() -> usize {
    10
}

fn default_inter_send_delay_secs() -> u64 {
    45
}

fn default_daily_email_cap() -> u32 {
    50
}

fn default_max_errors_per_tick() -> u32 {
    3
}

fn default_provider_timeout_secs() -> u64 {
    60
}

impl Default for OutreachConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_outreach_tick_secs(),
            batch_size: default_batch_size(),
            inter_send_delay_secs: default_inter_send_delay_secs(),
            daily_email_cap: default_daily_email_cap(),
            max_errors_per_tick: default_max_errors_per_tick(),
            provider_timeout_secs: default_provider_timeout_secs(),
            skip_research: false,
            sender_address: None,
        }
    }
}

impl OutreachConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn inter_send_delay(&self) -> Duration {
        Duration::from_secs(self.inter_send_delay_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

/// `[discovery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Local times of day ("HH:MM") at which a discovery cycle runs.
    #[serde(default = "default_discovery_times")]
    pub daily_at: Vec<String>,
    /// When non-empty, replaces the current phase's target industries.
    #[serde(default)]
    pub industry_overrides: Vec<String>,
    /// When non-empty, replaces the current phase's target cities.
    #[serde(default)]
    pub city_overrides: Vec<String>,
}

fn default_discovery_times() -> Vec<String> {
    vec!["08:00".to_string()]
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            daily_at: default_discovery_times(),
            industry_overrides: Vec::new(),
            city_overrides: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    /// Parsed discovery times. Invalid entries are reported by validation.
    pub fn times(&self) -> Vec<NaiveTime> {
        self.daily_at
            .iter()
            .filter_map(|t| parse_time_of_day(t))
            .collect()
    }
}

/// Parse "HH:MM" (or "HH:MM:SS") into a time of day.
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value.trim(), "%H:%M:%S"))
        .ok()
}

/// `[health]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    /// Uptime after which zero generated leads raises an alert.
    #[serde(default = "default_no_leads_after_mins")]
    pub no_leads_after_mins: u64,
    /// Age of the oldest uncontacted lead that raises a backlog alert.
    #[serde(default = "default_backlog_after_mins")]
    pub backlog_after_mins: u64,
    /// How often the snapshot file is refreshed between full checks.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Snapshot age under which external probes consider the engine live.
    #[serde(default = "default_snapshot_max_age_secs")]
    pub snapshot_max_age_secs: u64,
}

fn default_heartbeat_secs() -> u64 {
    60
}

fn default_health_interval_secs() -> u64 {
    10 * 60
}

fn default_no_leads_after_mins() -> u64 {
    120
}

fn default_backlog_after_mins() -> u64 {
    180
}

fn default_snapshot_max_age_secs() -> u64 {
    120
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
            no_leads_after_mins: default_no_leads_after_mins(),
            backlog_after_mins: default_backlog_after_mins(),
            heartbeat_secs: default_heartbeat_secs(),
            snapshot_max_age_secs: default_snapshot_max_age_secs(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn no_leads_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.no_leads_after_mins as i64)
    }

    pub fn backlog_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.backlog_after_mins as i64)
    }

    pub fn snapshot_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.snapshot_max_age_secs as i64)
    }
}

/// `[escalation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Severity (1-10) at or above which an issue goes to a human.
    #[serde(default = "default_severity_threshold")]
    pub severity_threshold: u8,
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: u64,
}

fn default_severity_threshold() -> u8 {
    7
}

fn default_cooldown_hours() -> u64 {
    24
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            severity_threshold: default_severity_threshold(),
            cooldown_hours: default_cooldown_hours(),
        }
    }
}

impl EscalationConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cooldown_hours as i64)
    }
}

/// `[phases]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhasesConfig {
    #[serde(default)]
    pub regression: RegressionPolicy,
}

/// `[testing]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestingConfig {
    /// Skip the startup preflight that exercises every collaborator.
    #[serde(default)]
    pub skip_testing: bool,
}

/// `[providers]` section, used by the built-in offline providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// JSON file of businesses served by the file discovery provider.
    #[serde(default)]
    pub businesses_file: Option<PathBuf>,
    /// Base URL under which demo sites are published.
    #[serde(default = "default_demo_base_url")]
    pub demo_base_url: String,
}

fn default_demo_base_url() -> String {
    "https://demo.example.com".to_string()
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            businesses_file: None,
            demo_base_url: default_demo_base_url(),
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub outreach: OutreachConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub phases: PhasesConfig,
    #[serde(default)]
    pub testing: TestingConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl EngineConfig {
    /// Load configuration from a project directory.
    ///
    /// A missing file yields the defaults; a malformed file is an error.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = Self::config_path(project_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content).map_err(|e| EngineError::config_with_path(e.to_string(), path))
    }

    /// Parse configuration from TOML content.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `PROSPECTOR_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(cap) = lookup("PROSPECTOR_DAILY_EMAIL_CAP").and_then(|v| v.parse().ok()) {
            self.outreach.daily_email_cap = cap;
        }
        if let Some(sender) = lookup("PROSPECTOR_SENDER").filter(|v| !v.trim().is_empty()) {
            self.outreach.sender_address = Some(sender);
        }
        if let Some(skip) = lookup("PROSPECTOR_SKIP_RESEARCH") {
            self.outreach.skip_research = matches!(skip.as_str(), "1" | "true" | "yes");
        }
    }

    /// Get the state directory for a project
    pub fn state_dir(project_dir: &Path) -> PathBuf {
        project_dir.join(STATE_DIR)
    }

    /// Get the config.toml path for a project
    pub fn config_path(project_dir: &Path) -> PathBuf {
        Self::state_dir(project_dir).join(CONFIG_FILE)
    }

    /// Get the persisted strategy path
    pub fn strategy_path(project_dir: &Path) -> PathBuf {
        Self::state_dir(project_dir).join("strategy.json")
    }

    /// Get the lead database path
    pub fn leads_db_path(project_dir: &Path) -> PathBuf {
        Self::state_dir(project_dir).join("leads.db")
    }

    /// Get the health snapshot path
    pub fn health_path(project_dir: &Path) -> PathBuf {
        Self::state_dir(project_dir).join("health.json")
    }

    /// Get the offline delivery outbox path
    pub fn outbox_path(project_dir: &Path) -> PathBuf {
        Self::state_dir(project_dir).join("outbox.jsonl")
    }

    /// Resolve the businesses file for offline discovery.
    pub fn businesses_path(&self, project_dir: &Path) -> PathBuf {
        match &self.providers.businesses_file {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => project_dir.join(path),
            None => Self::state_dir(project_dir).join("businesses.json"),
        }
    }

    /// Local business clock offset.
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.engine.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }

    /// Run duration, `None` in continuous mode.
    pub fn run_duration(&self) -> Option<Duration> {
        match self.engine.mode {
            RunMode::Continuous => None,
            RunMode::Duration => Some(Duration::from_secs(self.engine.duration_minutes * 60)),
        }
    }

    /// Settings the outreach pipeline cannot start without.
    pub fn require_outreach_settings(&self) -> Result<&str> {
        self.outreach
            .sender_address
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| EngineError::MissingSetting {
                setting: "outreach.sender_address".to_string(),
            })
    }

    /// Validate field ranges and cross-field constraints.
    pub fn validate(&self) -> ValidationReport {
        validation::validate(self)
    }

    /// Render the configuration back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::config(e.to_string()))
    }
}
