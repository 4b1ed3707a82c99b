//! Bounded-authority escalation gate.
//!
//! Inbound issues are classified by the content provider and either
//! resolved automatically or handed to a human. Escalation is forced when
//! severity reaches the configured threshold or when any hard trigger is
//! present, whatever the severity.

mod cooldown;

pub use cooldown::AlertCooldown;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::providers::{
    bounded, Channel, ContentGenerationProvider, Issue, IssueClassification, NotificationProvider,
};

/// What to do with an issue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    AutoResolve { reply: Option<String> },
    Escalate { reason: String },
}

impl Decision {
    #[must_use]
    pub fn is_escalation(&self) -> bool {
        matches!(self, Self::Escalate { .. })
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoResolve { .. } => write!(f, "auto-resolve"),
            Self::Escalate { reason } => write!(f, "escalate ({})", reason),
        }
    }
}

/// Outcome of [`EscalationGate::handle`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationRecord {
    pub issue_id: String,
    pub severity: u8,
    pub can_resolve_locally: bool,
    pub escalation_reason: Option<String>,
    pub decision: Decision,
    /// False when the human notification was suppressed by the cooldown.
    pub notified: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EscalationStats {
    pub total_issues: u64,
    pub resolved_locally: u64,
    pub escalated: u64,
}

pub struct EscalationGate {
    threshold: u8,
    content: Arc<dyn ContentGenerationProvider>,
    notifier: Arc<dyn NotificationProvider>,
    cooldown: Arc<AlertCooldown>,
    timeout: Duration,
    total: AtomicU64,
    resolved: AtomicU64,
    escalated: AtomicU64,
}

impl EscalationGate {
    pub fn new(
        threshold: u8,
        content: Arc<dyn ContentGenerationProvider>,
        notifier: Arc<dyn NotificationProvider>,
        cooldown: Arc<AlertCooldown>,
        timeout: Duration,
    ) -> Self {
        Self {
            threshold,
            content,
            notifier,
            cooldown,
            timeout,
            total: AtomicU64::new(0),
            resolved: AtomicU64::new(0),
            escalated: AtomicU64::new(0),
        }
    }

    /// Decide an already classified issue and update the counters.
    pub fn decide(&self, issue: &Issue, classification: &IssueClassification) -> Decision {
        self.total.fetch_add(1, Ordering::SeqCst);

        let decision = if !classification.hard_triggers.is_empty() {
            let triggers: Vec<String> = classification
                .hard_triggers
                .iter()
                .map(ToString::to_string)
                .collect();
            Decision::Escalate {
                reason: format!("hard trigger: {}", triggers.join(", ")),
            }
        } else if classification.severity >= self.threshold {
            Decision::Escalate {
                reason: format!(
                    "severity {} at or above threshold {}",
                    classification.severity, self.threshold
                ),
            }
        } else {
            Decision::AutoResolve {
                reply: classification.suggested_reply.clone(),
            }
        };

        match decision {
            Decision::Escalate { ref reason } => {
                self.escalated.fetch_add(1, Ordering::SeqCst);
                info!("Issue {} escalated: {}", issue.id, reason);
            }
            Decision::AutoResolve { .. } => {
                self.resolved.fetch_add(1, Ordering::SeqCst);
                info!("Issue {} resolved locally", issue.id);
            }
        }
        decision
    }

    /// Cooldown check on the shared alert map.
    pub fn notify_if_due(&self, alert_key: &str, now: DateTime<Utc>) -> bool {
        self.cooldown.notify_if_due(alert_key, now)
    }

    /// Classify, decide and, on escalation, notify the human channel.
    ///
    /// A classifier failure escalates: nothing is resolved without a
    /// classification.
    ///
    /// # Errors
    ///
    /// Returns an error only if the escalation notification itself fails.
    /// A failed notification leaves the cooldown untouched so the next
    /// occurrence retries.
    pub async fn handle(&self, issue: &Issue, now: DateTime<Utc>) -> Result<EscalationRecord> {
        let classified = bounded("content", self.timeout, self.content.classify_issue(issue)).await;

        let (severity, decision) = match classified {
            Ok(classification) => (classification.severity, self.decide(issue, &classification)),
            Err(e) => {
                warn!("Classification failed for issue {}: {}", issue.id, e);
                self.total.fetch_add(1, Ordering::SeqCst);
                self.escalated.fetch_add(1, Ordering::SeqCst);
                (
                    0,
                    Decision::Escalate {
                        reason: format!("classification unavailable: {}", e),
                    },
                )
            }
        };

        let mut notified = false;
        if let Decision::Escalate { ref reason } = decision {
            let key = alert_key(issue);
            if self.cooldown.is_due(&key, now) {
                let message = format!("[{}] {}\n\n{}\n\nReason: {}", issue.id, issue.subject, issue.body, reason);
                bounded(
                    "notifier",
                    self.timeout,
                    self.notifier.notify(Channel::Escalation, &message),
                )
                .await?;
                self.cooldown.record_sent(&key, now);
                notified = true;
            }
        }

        Ok(EscalationRecord {
            issue_id: issue.id.clone(),
            severity,
            can_resolve_locally: !decision.is_escalation(),
            escalation_reason: match decision {
                Decision::Escalate { ref reason } => Some(reason.clone()),
                Decision::AutoResolve { .. } => None,
            },
            decision,
            notified,
        })
    }

    #[must_use]
    pub fn stats(&self) -> EscalationStats {
        EscalationStats {
            total_issues: self.total.load(Ordering::SeqCst),
            resolved_locally: self.resolved.load(Ordering::SeqCst),
            escalated: self.escalated.load(Ordering::SeqCst),
        }
    }
}

/// Repeats of the same subject share one cooldown slot.
fn alert_key(issue: &Issue) -> String {
    let subject: Vec<String> = issue
        .subject
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();
    format!("escalation:{}", subject.join(" "))
}
