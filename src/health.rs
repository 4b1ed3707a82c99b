//! Pipeline health monitor.
//!
//! Detects a stalled pipeline from throughput counters and the lead store,
//! persists the latest snapshot as a freshness probe, and forwards alerts
//! through the shared cooldown. Alerts are advisory; the monitor never
//! changes pipeline behavior.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::HealthConfig;
use crate::control::{EngineStats, TickGate};
use crate::error::Result;
use crate::escalation::AlertCooldown;
use crate::lead::LeadStoreHandle;
use crate::persistence::JsonDocument;
use crate::providers::{bounded, Channel, NotificationProvider};

/// Derived health alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "alert", rename_all = "snake_case")]
pub enum HealthAlert {
    /// Uptime past the threshold and no lead generated yet.
    NoLeads { uptime_mins: i64 },
    /// Leads are waiting past the threshold and nothing has been sent.
    UncontactedBacklog { uncontacted: u64, oldest_age_mins: i64 },
}

impl HealthAlert {
    /// Cooldown key.
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Self::NoLeads { .. } => "no_leads",
            Self::UncontactedBacklog { .. } => "uncontacted_backlog",
        }
    }
}

impl fmt::Display for HealthAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoLeads { uptime_mins } => {
                write!(f, "No leads generated after {} minutes of uptime", uptime_mins)
            }
            Self::UncontactedBacklog {
                uncontacted,
                oldest_age_mins,
            } => write!(
                f,
                "{} leads waiting (oldest {} minutes) and no email sent",
                uncontacted, oldest_age_mins
            ),
        }
    }
}

/// One health observation. Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub checked_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub time_since_last_lead_secs: Option<i64>,
    pub time_since_last_email_secs: Option<i64>,
    pub uncontacted: u64,
    pub oldest_uncontacted_age_secs: Option<i64>,
    pub leads_generated: u64,
    pub emails_sent: u64,
    #[serde(default)]
    pub alerts: Vec<HealthAlert>,
}

impl HealthSnapshot {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.alerts.is_empty()
    }

    /// True when this snapshot is no older than `max_age` at `now`.
    #[must_use]
    pub fn is_fresh(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.checked_at <= max_age
    }
}

pub struct HealthMonitor {
    store: LeadStoreHandle,
    stats: Arc<EngineStats>,
    notifier: Arc<dyn NotificationProvider>,
    cooldown: Arc<AlertCooldown>,
    config: HealthConfig,
    document: JsonDocument<HealthSnapshot>,
    gate: TickGate,
    timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        store: LeadStoreHandle,
        stats: Arc<EngineStats>,
        notifier: Arc<dyn NotificationProvider>,
        cooldown: Arc<AlertCooldown>,
        config: HealthConfig,
        snapshot_path: impl AsRef<Path>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            stats,
            notifier,
            cooldown,
            config,
            document: JsonDocument::new(snapshot_path),
            gate: TickGate::new(),
            timeout,
        }
    }

    /// Full check: compute, notify due alerts, persist.
    ///
    /// Returns `None` when a previous check is still running.
    pub async fn check(&self, now: DateTime<Utc>) -> Result<Option<HealthSnapshot>> {
        let Some(_guard) = self.gate.try_enter() else {
            debug!("Health check skipped: previous check still running");
            return Ok(None);
        };

        let snapshot = self.compute(now).await?;
        for alert in &snapshot.alerts {
            warn!("Health alert: {}", alert);
            if !self.cooldown.is_due(alert.key(), now) {
                continue;
            }
            let message = alert.to_string();
            let notify = self.notifier.notify(Channel::Health, &message);
            match bounded("notifier", self.timeout, notify).await {
                Ok(()) => self.cooldown.record_sent(alert.key(), now),
                Err(e) => warn!("Could not deliver health alert: {}", e),
            }
        }
        self.document.save(&snapshot)?;
        Ok(Some(snapshot))
    }

    /// Heartbeat: recompute and persist without notifying.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<HealthSnapshot> {
        let snapshot = self.compute(now).await?;
        self.document.save(&snapshot)?;
        Ok(snapshot)
    }

    /// Freshness probe over the persisted snapshot.
    pub fn is_live(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        match self.document.load() {
            Ok(Some(snapshot)) => snapshot.is_fresh(max_age, now),
            Ok(None) => false,
            Err(e) => {
                warn!("Health snapshot unreadable: {}", e);
                false
            }
        }
    }

    /// Latest persisted snapshot, if any.
    pub fn last_snapshot(&self) -> Result<Option<HealthSnapshot>> {
        self.document.load()
    }

    async fn compute(&self, now: DateTime<Utc>) -> Result<HealthSnapshot> {
        let (counts, oldest) = self
            .store
            .call(|s| Ok((s.counts()?, s.oldest_uncontacted_created_at()?)))
            .await?;
        let stats = self.stats.snapshot();

        let uptime = now - stats.started_at;
        let oldest_age = oldest.map(|t| now - t);
        let mut alerts = Vec::new();

        if uptime > self.config.no_leads_after() && stats.leads_generated == 0 {
            alerts.push(HealthAlert::NoLeads {
                uptime_mins: uptime.num_minutes(),
            });
        }
        if let Some(age) = oldest_age {
            if counts.new > 0 && age > self.config.backlog_after() && stats.emails_sent == 0 {
                alerts.push(HealthAlert::UncontactedBacklog {
                    uncontacted: counts.new,
                    oldest_age_mins: age.num_minutes(),
                });
            }
        }

        Ok(HealthSnapshot {
            checked_at: now,
            uptime_secs: uptime.num_seconds(),
            time_since_last_lead_secs: stats.last_lead_at.map(|t| (now - t).num_seconds()),
            time_since_last_email_secs: stats.last_email_at.map(|t| (now - t).num_seconds()),
            uncontacted: counts.new,
            oldest_uncontacted_age_secs: oldest_age.map(|a| a.num_seconds()),
            leads_generated: stats.leads_generated,
            emails_sent: stats.emails_sent,
            alerts,
        })
    }
}
