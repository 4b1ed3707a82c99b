//! Prospector - phase-driven lead lifecycle and outreach scheduling engine
//!
//! Discovers small-business prospects, contacts them by email inside
//! per-industry send windows, and widens its targeting as the customer base
//! grows.
//!
//! # Architecture
//!
//! The crate is organized leaves first:
//!
//! - [`lead`] - Deduplicated, status-tracked lead store (SQLite)
//! - [`window`] - Send windows, industry timing profiles, blackout calendar
//! - [`phase`] - Growth strategy and the phase state machine
//! - [`discovery`] - Discovery cycle feeding the lead store
//! - [`outreach`] - Windowed outreach scheduler
//! - [`health`] - Stalled-pipeline detection and liveness snapshot
//! - [`escalation`] - Auto-resolve vs escalate decisions with alert cooldown
//! - [`providers`] - Collaborator traits and offline implementations
//! - [`engine`] - Wiring, timers and the run loop
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Error types and classification
//! - [`testing`] - Mock collaborators and fixtures
//!
//! # Example
//!
//! ```rust,ignore
//! use prospector::{Engine, EngineConfig, Providers};
//!
//! let config = EngineConfig::load(project_dir)?;
//! let providers = Providers::offline(&config, project_dir);
//! let engine = Engine::open(project_dir, config, providers)?;
//!
//! let report = engine.run(Some(Duration::from_secs(3600))).await?;
//! println!("{}", report);
//! ```

pub mod config;
pub mod control;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod health;
pub mod lead;
pub mod outreach;
pub mod persistence;
pub mod phase;
pub mod providers;
pub mod report;
pub mod testing;
pub mod timer;
pub mod window;

// Re-export commonly used types
pub use error::{EngineError, IntoProviderError, Result};

pub use config::{EngineConfig, RunMode, ValidationReport};
pub use control::{EngineStats, RunControl, RunState, StatsSnapshot, TickGate, TickGuard};
pub use discovery::{DiscoveryCycle, DiscoveryReport};
pub use engine::Engine;
pub use escalation::{AlertCooldown, Decision, EscalationGate, EscalationRecord, EscalationStats};
pub use health::{HealthAlert, HealthMonitor, HealthSnapshot};
pub use lead::{Business, Lead, LeadCounts, LeadStatus, LeadStore, LeadStoreHandle};
pub use outreach::{OutreachScheduler, OutreachSettings, SchedulerState, TickOutcome, TickReport};
pub use phase::{
    GrowthStrategy, Phase, PhaseController, PhaseTransition, RegressionPolicy, StrategySource,
};
pub use providers::{
    BusinessDiscoveryProvider, Channel, ContentGenerationProvider, DemoRenderingProvider,
    EmailDeliveryProvider, Issue, IssueClassification, NotificationProvider, Providers,
};
pub use report::EngineReport;
pub use timer::{SchedulePolicy, Scheduler, TaskId};
pub use window::{SendTimeRecommendation, WindowVerdict};
