//! Collaborator contracts.
//!
//! The engine never talks to a third-party service directly. Discovery,
//! content generation, demo rendering, delivery and notification each sit
//! behind a narrow async trait, so the orchestration stays deterministic and
//! every collaborator can be swapped for a mock in tests.
//!
//! # Modules
//!
//! - [`offline`] - File, template and log backed implementations

pub mod offline;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, IntoProviderError};
use crate::lead::{Business, Lead};

// =========================================================================
// Contract types
// =========================================================================

/// What research found out about a lead before composing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchContext {
    pub summary: Option<String>,
    /// Contact address discovered during research.
    pub email: Option<String>,
    pub talking_points: Vec<String>,
}

/// A composed outreach email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutreachMessage {
    pub subject: String,
    pub body: String,
    /// Recipient chosen by the composer; falls back to the lead's address.
    pub to: Option<String>,
}

/// Placeholder replaced by the rendered demo URL.
pub const DEMO_URL_PLACEHOLDER: &str = "{demo_url}";

impl OutreachMessage {
    /// Insert the demo link: replaces [`DEMO_URL_PLACEHOLDER`] when present,
    /// otherwise appends it.
    #[must_use]
    pub fn with_demo_url(mut self, url: &str) -> Self {
        if self.body.contains(DEMO_URL_PLACEHOLDER) {
            self.body = self.body.replace(DEMO_URL_PLACEHOLDER, url);
        } else {
            self.body = format!("{}\n\nPreview: {}", self.body.trim_end(), url);
        }
        self
    }
}

/// Delivery provider acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// An inbound issue (support request, complaint) awaiting a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub from: Option<String>,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl Issue {
    pub fn new(subject: impl Into<String>, body: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: None,
            subject: subject.into(),
            body: body.into(),
            received_at: now,
        }
    }
}

/// Categorical flags that force escalation regardless of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardTrigger {
    LegalThreat,
    MultiCustomerOutage,
    RegulatoryIssue,
    PaymentDispute,
    SecurityIncident,
}

impl fmt::Display for HardTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LegalThreat => "legal threat",
            Self::MultiCustomerOutage => "multi-customer outage",
            Self::RegulatoryIssue => "regulatory issue",
            Self::PaymentDispute => "payment dispute",
            Self::SecurityIncident => "security incident",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Billing,
    Technical,
    Content,
    Cancellation,
    Legal,
    Security,
    #[default]
    General,
}

/// Typed classifier output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueClassification {
    /// 1 (trivial) to 10 (critical).
    pub severity: u8,
    #[serde(default)]
    pub hard_triggers: Vec<HardTrigger>,
    /// Classifier confidence in 0.0..=1.0.
    pub confidence: f64,
    #[serde(default)]
    pub category: IssueCategory,
    #[serde(default)]
    pub suggested_reply: Option<String>,
}

/// Destination of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Human escalation inbox.
    Escalation,
    /// Pipeline health alerts.
    Health,
    /// Routine operator updates (phase changes, daily summaries).
    Operator,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Escalation => write!(f, "escalation"),
            Self::Health => write!(f, "health"),
            Self::Operator => write!(f, "operator"),
        }
    }
}

// =========================================================================
// Collaborator traits
// =========================================================================

/// Finds businesses in a location.
///
/// # Example
///
/// ```rust,ignore
/// use prospector::providers::BusinessDiscoveryProvider;
///
/// async fn count(discovery: &dyn BusinessDiscoveryProvider) -> usize {
///     discovery.search("Austin, TX", "dentist").await.map(|b| b.len()).unwrap_or(0)
/// }
/// ```
#[async_trait]
pub trait BusinessDiscoveryProvider: Send + Sync {
    /// Search one location for one industry.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unreachable or rejects the query.
    async fn search(&self, location: &str, industry: &str) -> Result<Vec<Business>>;

    /// Startup check that the provider is usable.
    async fn preflight(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes outreach emails and classifies inbound issues.
#[async_trait]
pub trait ContentGenerationProvider: Send + Sync {
    /// Gather context about a lead. Skipped when research is disabled.
    async fn research(&self, _lead: &Lead) -> Result<ResearchContext> {
        Ok(ResearchContext::default())
    }

    /// Compose the outreach email for a lead.
    ///
    /// # Errors
    ///
    /// Returns an error when no message can be produced, including when the
    /// lead has no deliverable address.
    async fn compose_outreach(&self, lead: &Lead, research: &ResearchContext) -> Result<OutreachMessage>;

    /// Classify an inbound issue for the escalation gate.
    async fn classify_issue(&self, issue: &Issue) -> Result<IssueClassification>;

    async fn preflight(&self) -> Result<()> {
        Ok(())
    }
}

/// Publishes a demo website for a lead.
#[async_trait]
pub trait DemoRenderingProvider: Send + Sync {
    /// Render and publish, returning the public URL.
    async fn render(&self, lead: &Lead) -> Result<String>;

    async fn preflight(&self) -> Result<()> {
        Ok(())
    }
}

/// Sends email.
#[async_trait]
pub trait EmailDeliveryProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the message was not accepted.
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<DeliveryReceipt>;

    async fn preflight(&self) -> Result<()> {
        Ok(())
    }
}

/// Delivers alerts to humans.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    async fn notify(&self, channel: Channel, message: &str) -> Result<()>;

    async fn preflight(&self) -> Result<()> {
        Ok(())
    }
}

// =========================================================================
// Wiring
// =========================================================================

/// The full set of collaborators the engine is built with.
#[derive(Clone)]
pub struct Providers {
    pub discovery: Arc<dyn BusinessDiscoveryProvider>,
    pub content: Arc<dyn ContentGenerationProvider>,
    pub render: Arc<dyn DemoRenderingProvider>,
    pub delivery: Arc<dyn EmailDeliveryProvider>,
    pub notifier: Arc<dyn NotificationProvider>,
}

impl Providers {
    /// Exercise every collaborator once.
    ///
    /// # Errors
    ///
    /// A failing or hanging collaborator is a configuration error.
    pub async fn preflight(&self, timeout: Duration) -> crate::error::Result<()> {
        let checks = [
            ("discovery", bounded("discovery", timeout, self.discovery.preflight()).await),
            ("content", bounded("content", timeout, self.content.preflight()).await),
            ("render", bounded("render", timeout, self.render.preflight()).await),
            ("delivery", bounded("delivery", timeout, self.delivery.preflight()).await),
            ("notifier", bounded("notifier", timeout, self.notifier.preflight()).await),
        ];
        for (name, result) in checks {
            if let Err(e) = result {
                return Err(EngineError::config(format!(
                    "preflight failed for {}: {}",
                    name, e
                )));
            }
            debug!("Preflight ok: {}", name);
        }
        Ok(())
    }
}

/// Await a collaborator call with an upper time bound.
///
/// Failures become [`EngineError::Provider`], an elapsed bound
/// [`EngineError::ProviderTimeout`].
pub async fn bounded<T, F>(provider: &str, timeout: Duration, call: F) -> crate::error::Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.into_provider(provider),
        Err(_) => Err(EngineError::ProviderTimeout {
            provider: provider.to_string(),
            timeout,
        }),
    }
}
