//! Lead discovery cycle.
//!
//! One cycle searches every (city, industry) pair the active phase targets
//! and feeds the results into the lead store. Duplicates merge into the
//! existing lead; a failing search is logged and the cycle moves on.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::control::{EngineStats, RunControl, TickGate};
use crate::error::Result;
use crate::lead::LeadStoreHandle;
use crate::phase::Phase;
use crate::providers::{bounded, BusinessDiscoveryProvider};

/// Outcome of one discovery cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiscoveryReport {
    /// (location, industry) pairs searched.
    pub searches: usize,
    pub found: usize,
    pub new_leads: usize,
    pub duplicates: usize,
    /// Searches that failed, as `"location/industry: error"`.
    pub failures: Vec<String>,
    /// True when the cycle ended early on stop.
    pub interrupted: bool,
    /// True when another cycle was still running and this one did nothing.
    pub skipped: bool,
}

/// The (location, industry) pairs a cycle searches, overrides first.
#[must_use]
pub fn search_pairs(phase: &Phase, overrides: &DiscoveryConfig) -> Vec<(String, String)> {
    let cities = if overrides.city_overrides.is_empty() {
        &phase.settings.target_cities
    } else {
        &overrides.city_overrides
    };
    let industries = if overrides.industry_overrides.is_empty() {
        &phase.settings.target_industries
    } else {
        &overrides.industry_overrides
    };

    cities
        .iter()
        .flat_map(|city| {
            industries
                .iter()
                .map(move |industry| (city.clone(), industry.clone()))
        })
        .collect()
}

pub struct DiscoveryCycle {
    discovery: Arc<dyn BusinessDiscoveryProvider>,
    store: LeadStoreHandle,
    stats: Arc<EngineStats>,
    control: Arc<RunControl>,
    gate: TickGate,
    timeout: Duration,
}

impl DiscoveryCycle {
    pub fn new(
        discovery: Arc<dyn BusinessDiscoveryProvider>,
        store: LeadStoreHandle,
        stats: Arc<EngineStats>,
        control: Arc<RunControl>,
        timeout: Duration,
    ) -> Self {
        Self {
            discovery,
            store,
            stats,
            control,
            gate: TickGate::new(),
            timeout,
        }
    }

    /// Run one cycle for `phase`.
    ///
    /// A cycle that starts while another is still searching returns a
    /// `skipped` report without touching the provider.
    ///
    /// # Errors
    ///
    /// Only lead store failures abort the cycle; provider errors are
    /// recorded in the report.
    pub async fn run(
        &self,
        phase: &Phase,
        overrides: &DiscoveryConfig,
        now: DateTime<Utc>,
    ) -> Result<DiscoveryReport> {
        let Some(_guard) = self.gate.try_enter() else {
            debug!("Discovery skipped: previous cycle still running");
            return Ok(DiscoveryReport {
                skipped: true,
                ..Default::default()
            });
        };

        let pairs = search_pairs(phase, overrides);
        let mut report = DiscoveryReport::default();

        if pairs.is_empty() {
            warn!("{} targets no cities or industries; nothing to discover", phase);
            return Ok(report);
        }

        info!("Discovery started: {} searches for {}", pairs.len(), phase);

        for (location, industry) in pairs {
            if self.control.is_stopped() {
                report.interrupted = true;
                break;
            }
            report.searches += 1;

            let found = match bounded(
                "discovery",
                self.timeout,
                self.discovery.search(&location, &industry),
            )
            .await
            {
                Ok(found) => found,
                Err(e) => {
                    warn!("Discovery failed for {} / {}: {}", location, industry, e);
                    report
                        .failures
                        .push(format!("{}/{}: {}", location, industry, e));
                    continue;
                }
            };

            report.found += found.len();
            let (new, dup) = self
                .store
                .call(move |store| {
                    let mut new = 0usize;
                    let mut dup = 0usize;
                    for business in &found {
                        if store.insert(business, now)?.is_new {
                            new += 1;
                        } else {
                            dup += 1;
                        }
                    }
                    Ok((new, dup))
                })
                .await?;

            debug!(
                "{} / {}: {} new, {} duplicate",
                location, industry, new, dup
            );
            report.new_leads += new;
            report.duplicates += dup;
        }

        self.stats.record_leads(report.new_leads as u64, now);
        info!(
            "Discovery finished: {} found, {} new, {} duplicate, {} failed searches",
            report.found,
            report.new_leads,
            report.duplicates,
            report.failures.len()
        );
        Ok(report)
    }
}
