//! Read-only operator report.

use std::fmt;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::escalation::EscalationStats;
use crate::health::HealthSnapshot;
use crate::lead::{LeadCounts, LeadStore};
use crate::phase::{Phase, StrategySource};
use crate::window;

#[derive(Debug, Clone, Serialize)]
pub struct PhaseSummary {
    pub phase: u32,
    pub name: String,
    pub customer_range: String,
    pub strategy_source: String,
    pub monthly_revenue_target: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailSummary {
    pub sent_today: u64,
    pub daily_cap: u32,
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Leads that ever reached contacted or beyond.
    pub total_contacted: u64,
    /// Responded or converted over contacted, when anything was contacted.
    pub response_rate: Option<f64>,
}

/// Snapshot of phase, leads, email throughput, health and escalation.
#[derive(Debug, Clone, Serialize)]
pub struct EngineReport {
    pub generated_at: DateTime<Utc>,
    pub phase: PhaseSummary,
    pub customers: u64,
    pub leads: LeadCounts,
    pub emails: EmailSummary,
    pub health: Option<HealthSnapshot>,
    pub live: bool,
    pub escalation: Option<EscalationStats>,
}

impl EngineReport {
    /// Collect the store-backed parts of the report.
    pub fn gather(
        store: &LeadStore,
        phase: &Phase,
        source: &StrategySource,
        config: &EngineConfig,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let leads = store.counts()?;
        let offset = config.utc_offset();
        let today = now.with_timezone(&offset).date_naive();
        let midnight = local_midnight(today, &offset, now);

        let total_contacted = leads.contacted + leads.responded + leads.converted;
        let base_cap = phase
            .settings
            .daily_email_cap
            .unwrap_or(config.outreach.daily_email_cap);

        Ok(Self {
            generated_at: now,
            phase: PhaseSummary {
                phase: phase.phase,
                name: phase.name.clone(),
                customer_range: phase.customer_range.to_string(),
                strategy_source: source.to_string(),
                monthly_revenue_target: phase.economics.monthly_revenue_target,
            },
            customers: leads.converted,
            emails: EmailSummary {
                sent_today: store.contacted_since(midnight)?,
                daily_cap: (f64::from(base_cap) * window::volume_multiplier(today)).floor() as u32,
                last_sent_at: store.last_contacted_at()?,
                total_contacted,
                response_rate: (total_contacted > 0).then(|| {
                    (leads.responded + leads.converted) as f64 / total_contacted as f64
                }),
            },
            leads,
            health: None,
            live: false,
            escalation: None,
        })
    }

    #[must_use]
    pub fn with_health(mut self, snapshot: Option<HealthSnapshot>, max_age: chrono::Duration) -> Self {
        self.live = snapshot
            .as_ref()
            .is_some_and(|s| s.is_fresh(max_age, self.generated_at));
        self.health = snapshot;
        self
    }

    #[must_use]
    pub fn with_escalation(mut self, stats: EscalationStats) -> Self {
        self.escalation = Some(stats);
        self
    }
}

fn local_midnight(date: NaiveDate, offset: &chrono::FixedOffset, fallback: DateTime<Utc>) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .and_then(|m| offset.from_local_datetime(&m).single())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(fallback)
}

impl fmt::Display for EngineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Phase {} ({}) customers {} in {} [{}]",
            self.phase.phase, self.phase.name, self.customers, self.phase.customer_range, self.phase.strategy_source
        )?;
        writeln!(
            f,
            "Leads: {} new, {} contacted, {} responded, {} converted",
            self.leads.new, self.leads.contacted, self.leads.responded, self.leads.converted
        )?;
        write!(
            f,
            "Emails: {}/{} today, {} total",
            self.emails.sent_today, self.emails.daily_cap, self.emails.total_contacted
        )?;
        if let Some(rate) = self.emails.response_rate {
            write!(f, ", {:.1}% response", rate * 100.0)?;
        }
        writeln!(f)?;
        match self.health {
            Some(ref health) if health.is_healthy() => {
                writeln!(f, "Health: ok (live: {})", self.live)?
            }
            Some(ref health) => {
                writeln!(f, "Health: {} alerts (live: {})", health.alerts.len(), self.live)?;
                for alert in &health.alerts {
                    writeln!(f, "  - {}", alert)?;
                }
            }
            None => writeln!(f, "Health: no snapshot")?,
        }
        if let Some(ref esc) = self.escalation {
            writeln!(
                f,
                "Escalation: {} issues, {} resolved, {} escalated",
                esc.total_issues, esc.resolved_locally, esc.escalated
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::GrowthStrategy;
    use crate::testing::fixtures::{business, wednesday};

    #[test]
    fn test_report_counts_and_rate() {
        let store = LeadStore::open_in_memory().unwrap();
        let a = store.insert(&business("Smile Dental", "dentist"), wednesday(6)).unwrap();
        let b = store.insert(&business("Bright Teeth", "dentist"), wednesday(6)).unwrap();
        store.insert(&business("Congress Family Dentistry", "dentist"), wednesday(6)).unwrap();
        store.mark_contacted(&a.lead.dedup_key, wednesday(10)).unwrap();
        store.mark_contacted(&b.lead.dedup_key, wednesday(10)).unwrap();
        store.mark_responded(&b.lead.dedup_key, wednesday(11)).unwrap();

        let phase = GrowthStrategy::standard().phases[0].clone();
        let report = EngineReport::gather(
            &store,
            &phase,
            &StrategySource::Persisted,
            &EngineConfig::default(),
            wednesday(12),
        )
        .unwrap();

        assert_eq!(report.leads.new, 1);
        assert_eq!(report.emails.sent_today, 2);
        assert_eq!(report.emails.daily_cap, 20);
        assert_eq!(report.emails.response_rate, Some(0.5));
        assert!(report.to_string().contains("Phase 1 (Local Launch)"));
    }

    #[test]
    fn test_report_without_health_is_not_live() {
        let store = LeadStore::open_in_memory().unwrap();
        let report = EngineReport::gather(
            &store,
            &crate::phase::Phase::fallback(),
            &StrategySource::Missing,
            &EngineConfig::default(),
            wednesday(12),
        )
        .unwrap()
        .with_health(None, chrono::Duration::minutes(2));
        assert!(!report.live);
        assert!(report.emails.response_rate.is_none());
        assert!(report.to_string().contains("no snapshot"));
    }
}
