//! Outreach scheduler.
//!
//! Each tick walks `Idle -> WindowCheck -> Draining -> Idle`:
//!
//! 1. **WindowCheck** - the local time must fall inside the active phase's
//!    send window, inside the hours its industries read email, and outside
//!    the blackout calendar. A closed window is a no-op tick; the notice is
//!    logged at most once per local day.
//! 2. **Draining** - up to `batch_size` uncontacted leads (bounded by what
//!    is left of the daily cap) are taken oldest first, re-ordered by
//!    advisory send-time score, and processed one at a time:
//!    research -> compose -> render -> send.
//!
//! A lead is marked contacted only after its send was accepted. A failure
//! at any step leaves the lead `new` with its attempt counter bumped. Too
//! many failures in one tick abort the tick with a single aggregated alert.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::control::{EngineStats, RunControl, TickGate};
use crate::error::{EngineError, Result};
use crate::lead::{Lead, LeadStoreHandle};
use crate::phase::{Phase, PhaseController};
use crate::providers::{bounded, Channel, Providers, ResearchContext};
use crate::window::{self, SendTimeRecommendation, WindowVerdict};

/// Scheduler position within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    WindowCheck,
    Draining,
}

/// Knobs the scheduler reads on every tick.
#[derive(Debug, Clone)]
pub struct OutreachSettings {
    pub batch_size: usize,
    pub daily_email_cap: u32,
    pub inter_send_delay: Duration,
    pub max_errors_per_tick: u32,
    pub provider_timeout: Duration,
    pub skip_research: bool,
    /// Replaces the phase's industries for window checks when non-empty.
    pub industry_overrides: Vec<String>,
    pub utc_offset: FixedOffset,
}

impl OutreachSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            batch_size: config.outreach.batch_size,
            daily_email_cap: config.outreach.daily_email_cap,
            inter_send_delay: config.outreach.inter_send_delay(),
            max_errors_per_tick: config.outreach.max_errors_per_tick,
            provider_timeout: config.outreach.provider_timeout(),
            skip_research: config.outreach.skip_research,
            industry_overrides: config.discovery.industry_overrides.clone(),
            utc_offset: config.utc_offset(),
        }
    }
}

/// Pipeline step a lead failed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Research,
    Compose,
    Render,
    Send,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Research => write!(f, "research"),
            Self::Compose => write!(f, "compose"),
            Self::Render => write!(f, "render"),
            Self::Send => write!(f, "send"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadFailure {
    pub dedup_key: String,
    pub name: String,
    pub step: Step,
    pub error: String,
}

/// Why a tick ended the way it did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickOutcome {
    /// The batch was processed (some sends may have failed).
    Drained,
    OutsideWindow { reason: String },
    DailyCapReached { cap: u32 },
    NoLeads,
    /// Stopped or paused between leads.
    Interrupted,
    /// Too many failures; the rest of the batch was skipped.
    Aborted { errors: u32 },
    /// Another tick was still running.
    Busy,
    Paused,
    Stopped,
}

impl TickOutcome {
    /// True when the tick reached the draining state.
    #[must_use]
    pub fn drained(&self) -> bool {
        matches!(self, Self::Drained | Self::Interrupted | Self::Aborted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub outcome: TickOutcome,
    pub attempted: usize,
    pub sent: usize,
    pub failures: Vec<LeadFailure>,
    /// True when this tick emitted the daily out-of-window notice.
    pub window_notice: bool,
}

impl TickReport {
    fn new(outcome: TickOutcome) -> Self {
        Self {
            outcome,
            attempted: 0,
            sent: 0,
            failures: Vec::new(),
            window_notice: false,
        }
    }
}

/// Periodic outreach driver.
pub struct OutreachScheduler {
    providers: Providers,
    store: LeadStoreHandle,
    phases: Arc<AsyncMutex<PhaseController>>,
    stats: Arc<EngineStats>,
    control: Arc<RunControl>,
    settings: OutreachSettings,
    gate: TickGate,
    state: Mutex<SchedulerState>,
    last_window_notice: Mutex<Option<NaiveDate>>,
}

impl OutreachScheduler {
    pub fn new(
        providers: Providers,
        store: LeadStoreHandle,
        phases: Arc<AsyncMutex<PhaseController>>,
        stats: Arc<EngineStats>,
        control: Arc<RunControl>,
        settings: OutreachSettings,
    ) -> Self {
        Self {
            providers,
            store,
            phases,
            stats,
            control,
            settings,
            gate: TickGate::new(),
            state: Mutex::new(SchedulerState::Idle),
            last_window_notice: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }

    fn local(&self, now: DateTime<Utc>) -> NaiveDateTime {
        now.with_timezone(&self.settings.utc_offset).naive_local()
    }

    /// Run one tick at `now`.
    ///
    /// # Errors
    ///
    /// Lead store failures. Provider failures are per-lead and reported in
    /// the [`TickReport`].
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let Some(_guard) = self.gate.try_enter() else {
            debug!("Outreach tick skipped: previous tick still running");
            self.stats.record_tick(false);
            return Ok(TickReport::new(TickOutcome::Busy));
        };
        if self.control.is_stopped() {
            return Ok(TickReport::new(TickOutcome::Stopped));
        }
        if self.control.is_paused() {
            self.stats.record_tick(false);
            return Ok(TickReport::new(TickOutcome::Paused));
        }

        let result = self.run_tick(now).await;
        self.set_state(SchedulerState::Idle);
        if let Ok(ref report) = result {
            self.stats.record_tick(report.outcome.drained());
        }
        result
    }

    async fn run_tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        self.set_state(SchedulerState::WindowCheck);
        let phase = self.phases.lock().await.active_phase();
        let local = self.local(now);

        let verdict = window::check_window(local, &phase.settings.send_window, self.industries(&phase));
        if !verdict.is_open() {
            let mut report = TickReport::new(TickOutcome::OutsideWindow {
                reason: verdict.to_string(),
            });
            report.window_notice = self.window_notice(local.date(), &verdict);
            return Ok(report);
        }

        let cap = self.daily_cap(&phase, local.date());
        let midnight = self.local_midnight(local.date(), now);
        let sent_today = self.store.call(move |s| s.contacted_since(midnight)).await?;
        let remaining = u64::from(cap).saturating_sub(sent_today);
        if remaining == 0 {
            debug!("Daily cap of {} reached ({} sent today)", cap, sent_today);
            return Ok(TickReport::new(TickOutcome::DailyCapReached { cap }));
        }

        let batch_size = phase
            .settings
            .batch_size
            .unwrap_or(self.settings.batch_size)
            .min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let criteria = phase.settings.criteria.clone();
        let leads = self
            .store
            .call(move |s| s.get_uncontacted_batch_matching(batch_size, &criteria))
            .await?;
        if leads.is_empty() {
            debug!("No uncontacted leads for {}", phase);
            return Ok(TickReport::new(TickOutcome::NoLeads));
        }

        self.set_state(SchedulerState::Draining);
        let leads = order_by_score(leads, local);
        info!("Outreach draining {} leads ({} left today)", leads.len(), remaining);
        self.drain(leads, now).await
    }

    async fn drain(&self, leads: Vec<Lead>, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::new(TickOutcome::Drained);
        let mut errors = 0u32;

        for (i, lead) in leads.into_iter().enumerate() {
            if i > 0 && !self.settings.inter_send_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.inter_send_delay) => {}
                    _ = self.control.stopped() => {}
                }
            }
            // a pause may arrive during the delay
            if self.control.is_stopped() || self.control.is_paused() {
                info!("Outreach interrupted after {} leads", i);
                report.outcome = TickOutcome::Interrupted;
                break;
            }

            report.attempted += 1;
            match self.process(&lead).await {
                Ok(to) => {
                    let key = lead.dedup_key.clone();
                    let marked = self.store.call(move |s| s.mark_contacted(&key, now)).await?;
                    if !marked {
                        debug!("{} was already past new when marked", lead.name);
                    }
                    self.stats.record_email_sent(now);
                    report.sent += 1;
                    info!("Contacted {} <{}>", lead.name, to);
                }
                Err((step, e)) => {
                    warn!("Outreach to {} failed at {}: {}", lead.name, step, e);
                    let key = lead.dedup_key.clone();
                    let message = e.to_string();
                    self.store
                        .call(move |s| s.record_failure(&key, &message))
                        .await?;
                    self.stats.record_send_failure();
                    report.failures.push(LeadFailure {
                        dedup_key: lead.dedup_key.clone(),
                        name: lead.name.clone(),
                        step,
                        error: e.to_string(),
                    });

                    errors += 1;
                    if errors > self.settings.max_errors_per_tick {
                        self.abort(&report, errors).await;
                        report.outcome = TickOutcome::Aborted { errors };
                        break;
                    }
                }
            }
        }

        info!(
            "Outreach tick: {} attempted, {} sent, {} failed",
            report.attempted,
            report.sent,
            report.failures.len()
        );
        Ok(report)
    }

    /// research -> compose -> render -> send. Returns the recipient.
    async fn process(&self, lead: &Lead) -> std::result::Result<String, (Step, EngineError)> {
        let timeout = self.settings.provider_timeout;
        let content = &self.providers.content;

        let research = if self.settings.skip_research {
            ResearchContext::default()
        } else {
            bounded("content", timeout, content.research(lead))
                .await
                .map_err(|e| (Step::Research, e))?
        };

        let mut lead = lead.clone();
        if lead.email.is_none() {
            lead.email = research.email.clone();
        }

        let message = bounded("content", timeout, content.compose_outreach(&lead, &research))
            .await
            .map_err(|e| (Step::Compose, e))?;
        let to = message
            .to
            .clone()
            .or_else(|| lead.email.clone())
            .filter(|to| !to.trim().is_empty())
            .ok_or_else(|| {
                (
                    Step::Compose,
                    EngineError::provider("content", "no deliverable email address"),
                )
            })?;

        let url = bounded("render", timeout, self.providers.render.render(&lead))
            .await
            .map_err(|e| (Step::Render, e))?;
        let message = message.with_demo_url(&url);

        let receipt = bounded(
            "delivery",
            timeout,
            self.providers.delivery.send(&to, &message.subject, &message.body),
        )
        .await
        .map_err(|e| (Step::Send, e))?;
        debug!("Delivery accepted {} as {}", to, receipt.message_id);
        Ok(to)
    }

    async fn abort(&self, report: &TickReport, errors: u32) {
        let outage = EngineError::SystemicOutage {
            errors,
            threshold: self.settings.max_errors_per_tick,
        };
        warn!("{}", outage);

        let mut message = format!("Outreach tick aborted: {}.", outage);
        for failure in &report.failures {
            message.push_str(&format!("\n- {} ({}): {}", failure.name, failure.step, failure.error));
        }
        let notify = self.providers.notifier.notify(Channel::Health, &message);
        if let Err(e) = bounded("notifier", self.settings.provider_timeout, notify).await {
            warn!("Could not deliver outage alert: {}", e);
        }
    }

    fn industries<'a>(&'a self, phase: &'a Phase) -> &'a [String] {
        if self.settings.industry_overrides.is_empty() {
            &phase.settings.target_industries
        } else {
            &self.settings.industry_overrides
        }
    }

    /// Phase cap (or configured cap) scaled by the date's volume multiplier.
    fn daily_cap(&self, phase: &Phase, date: NaiveDate) -> u32 {
        let base = phase
            .settings
            .daily_email_cap
            .unwrap_or(self.settings.daily_email_cap);
        (f64::from(base) * window::volume_multiplier(date)).floor() as u32
    }

    fn local_midnight(&self, date: NaiveDate, now: DateTime<Utc>) -> DateTime<Utc> {
        date.and_hms_opt(0, 0, 0)
            .and_then(|midnight| self.settings.utc_offset.from_local_datetime(&midnight).single())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now)
    }

    /// Log the out-of-window notice once per local day.
    fn window_notice(&self, date: NaiveDate, verdict: &WindowVerdict) -> bool {
        let mut last = self
            .last_window_notice
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if *last == Some(date) {
            debug!("Outside send window: {}", verdict);
            return false;
        }
        *last = Some(date);
        info!("Outside send window ({}); no outreach until it reopens", verdict);
        true
    }

    /// Advisory best send time for `lead` under the active phase's window.
    pub async fn compute_optimal_send_time(
        &self,
        lead: &Lead,
        now: DateTime<Utc>,
    ) -> Option<SendTimeRecommendation> {
        let phase = self.phases.lock().await.active_phase();
        window::compute_optimal_send_time(&lead.industry, self.local(now), &phase.settings.send_window)
    }
}

/// Highest expected open rate first; FIFO among equal scores.
fn order_by_score(leads: Vec<Lead>, local: NaiveDateTime) -> Vec<Lead> {
    let (day, hour) = (local.weekday(), local.hour());
    let mut scored: Vec<(f64, Lead)> = leads
        .into_iter()
        .map(|lead| (window::score(&lead.industry, day, hour), lead))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(_, lead)| lead).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead::{LeadStatus, LeadStore};
    use crate::phase::{GrowthStrategy, RegressionPolicy};
    use crate::testing::fixtures::{austin_dentists, business, saturday, wednesday};
    use crate::testing::{MockContent, MockDelivery, MockDiscovery, MockNotifier, MockRenderer};
    use tempfile::TempDir;

    struct Harness {
        scheduler: OutreachScheduler,
        store: LeadStoreHandle,
        delivery: Arc<MockDelivery>,
        notifier: Arc<MockNotifier>,
        control: Arc<RunControl>,
        stats: Arc<EngineStats>,
        _dir: TempDir,
    }

    fn settings() -> OutreachSettings {
        OutreachSettings {
            batch_size: 10,
            daily_email_cap: 50,
            inter_send_delay: Duration::ZERO,
            max_errors_per_tick: 3,
            provider_timeout: Duration::from_secs(5),
            skip_research: false,
            industry_overrides: Vec::new(),
            utc_offset: FixedOffset::east_opt(0).unwrap(),
        }
    }

    fn harness_with(
        content: MockContent,
        delivery: MockDelivery,
        settings: OutreachSettings,
    ) -> Harness {
        let dir = TempDir::new().unwrap();
        let mut controller =
            PhaseController::load(dir.path().join("strategy.json"), RegressionPolicy::Recompute);
        controller.replace(GrowthStrategy::standard()).unwrap();

        let store = LeadStoreHandle::new(LeadStore::open_in_memory().unwrap());
        let delivery = Arc::new(delivery);
        let notifier = Arc::new(MockNotifier::new());
        let control = Arc::new(RunControl::new());
        let stats = Arc::new(EngineStats::new(wednesday(6)));
        let providers = Providers {
            discovery: Arc::new(MockDiscovery::new()),
            content: Arc::new(content),
            render: Arc::new(MockRenderer::new()),
            delivery: delivery.clone(),
            notifier: notifier.clone(),
        };
        let scheduler = OutreachScheduler::new(
            providers,
            store.clone(),
            Arc::new(AsyncMutex::new(controller)),
            stats.clone(),
            control.clone(),
            settings,
        );
        Harness {
            scheduler,
            store,
            delivery,
            notifier,
            control,
            stats,
            _dir: dir,
        }
    }

    fn harness() -> Harness {
        harness_with(MockContent::new(), MockDelivery::new(), settings())
    }

    fn seed(store: &LeadStoreHandle, names: &[&str]) {
        let guard = store.lock_sync().unwrap();
        for (i, name) in names.iter().enumerate() {
            guard
                .insert(&business(name, "dentist"), wednesday(6) + chrono::Duration::minutes(i as i64))
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_tick_in_window_contacts_batch() {
        let h = harness();
        seed(&h.store, &["Smile Dental", "Bright Teeth"]);

        let report = h.scheduler.tick(wednesday(10)).await.unwrap();

        assert_eq!(report.outcome, TickOutcome::Drained);
        assert_eq!(report.sent, 2);
        assert_eq!(h.delivery.sent().len(), 2);
        assert!(h.delivery.sent()[0].body.contains("https://demo.test/"));
        let counts = h.store.lock_sync().unwrap().counts().unwrap();
        assert_eq!((counts.new, counts.contacted), (0, 2));
        assert_eq!(h.stats.emails_sent(), 2);
        assert_eq!(h.scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_contacted_leads_are_never_resent() {
        let h = harness();
        seed(&h.store, &["Smile Dental"]);

        h.scheduler.tick(wednesday(10)).await.unwrap();
        let second = h.scheduler.tick(wednesday(11)).await.unwrap();

        assert_eq!(second.outcome, TickOutcome::NoLeads);
        assert_eq!(h.delivery.call_count(), 1);
    }

    #[tokio::test]
    async fn test_weekend_tick_is_noop_with_single_notice() {
        let h = harness();
        seed(&h.store, &["Smile Dental"]);

        let first = h.scheduler.tick(saturday(10)).await.unwrap();
        let second = h.scheduler.tick(saturday(11)).await.unwrap();

        assert!(matches!(first.outcome, TickOutcome::OutsideWindow { .. }));
        assert!(first.window_notice);
        assert!(!second.window_notice);
        assert_eq!(h.delivery.call_count(), 0);
    }

    #[tokio::test]
    async fn test_after_hours_is_outside_window() {
        let h = harness();
        seed(&h.store, &["Smile Dental"]);
        let report = h.scheduler.tick(wednesday(15)).await.unwrap();
        assert!(matches!(report.outcome, TickOutcome::OutsideWindow { .. }));
    }

    #[tokio::test]
    async fn test_failed_lead_stays_new_and_others_continue() {
        let h = harness_with(
            MockContent::new(),
            MockDelivery::new().failing_for("office@brightteeth.example.com"),
            settings(),
        );
        seed(&h.store, &["Smile Dental", "Bright Teeth", "Congress Family Dentistry"]);

        let report = h.scheduler.tick(wednesday(10)).await.unwrap();

        assert_eq!(report.sent, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, Step::Send);

        let store = h.store.lock_sync().unwrap();
        let failed = store.get(&report.failures[0].dedup_key).unwrap().unwrap();
        assert_eq!(failed.status, LeadStatus::New);
        assert_eq!(failed.attempts, 1);
    }

    #[tokio::test]
    async fn test_compose_failure_is_recorded_per_lead() {
        let h = harness_with(MockContent::new().failing_for("Smile Dental"), MockDelivery::new(), settings());
        seed(&h.store, &["Smile Dental", "Bright Teeth"]);

        let report = h.scheduler.tick(wednesday(10)).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.failures[0].step, Step::Compose);
    }

    #[tokio::test]
    async fn test_systemic_outage_aborts_with_one_alert() {
        let mut s = settings();
        s.max_errors_per_tick = 1;
        let h = harness_with(MockContent::new(), MockDelivery::new().with_error("503"), s);
        seed(&h.store, &["A Dental", "B Dental", "C Dental", "D Dental"]);

        let report = h.scheduler.tick(wednesday(10)).await.unwrap();

        assert_eq!(report.outcome, TickOutcome::Aborted { errors: 2 });
        assert_eq!(report.attempted, 2);
        assert_eq!(h.notifier.count_for(Channel::Health), 1);
        assert_eq!(h.store.lock_sync().unwrap().counts().unwrap().new, 4);
    }

    #[tokio::test]
    async fn test_daily_cap_limits_batch() {
        let mut s = settings();
        s.daily_email_cap = 2;
        let h = harness_with(MockContent::new(), MockDelivery::new(), s);
        // phase 1 caps at 20; the configured cap only applies without one
        let mut strategy = GrowthStrategy::standard();
        strategy.phases[0].settings.daily_email_cap = None;
        h.scheduler.phases.lock().await.replace(strategy).unwrap();
        seed(&h.store, &["A Dental", "B Dental", "C Dental"]);

        let first = h.scheduler.tick(wednesday(10)).await.unwrap();
        let second = h.scheduler.tick(wednesday(11)).await.unwrap();

        assert_eq!(first.sent, 2);
        assert_eq!(second.outcome, TickOutcome::DailyCapReached { cap: 2 });
    }

    #[tokio::test]
    async fn test_paused_tick_does_nothing() {
        let h = harness();
        seed(&h.store, &["Smile Dental"]);
        h.control.pause();

        let report = h.scheduler.tick(wednesday(10)).await.unwrap();
        assert_eq!(report.outcome, TickOutcome::Paused);

        h.control.resume();
        assert_eq!(h.scheduler.tick(wednesday(10)).await.unwrap().sent, 1);
    }

    fn spaced() -> OutreachSettings {
        OutreachSettings {
            inter_send_delay: Duration::from_millis(200),
            ..settings()
        }
    }

    #[tokio::test]
    async fn test_pause_during_inter_send_delay_halts_batch() {
        let h = harness_with(MockContent::new(), MockDelivery::new(), spaced());
        seed(&h.store, &["Smile Dental", "Bright Teeth", "Alamo Smiles"]);

        let (report, _) = tokio::join!(h.scheduler.tick(wednesday(10)), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            h.control.pause();
        });
        let report = report.unwrap();

        assert_eq!(report.outcome, TickOutcome::Interrupted);
        assert_eq!(report.sent, 1);
        assert_eq!(h.delivery.call_count(), 1);
        let counts = h.store.lock_sync().unwrap().counts().unwrap();
        assert_eq!((counts.new, counts.contacted), (2, 1));
    }

    #[tokio::test]
    async fn test_stop_during_inter_send_delay_ends_tick_early() {
        let h = harness_with(MockContent::new(), MockDelivery::new(), spaced());
        seed(&h.store, &["Smile Dental", "Bright Teeth", "Alamo Smiles"]);

        let started = std::time::Instant::now();
        let (report, _) = tokio::join!(h.scheduler.tick(wednesday(10)), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            h.control.stop();
        });
        let report = report.unwrap();

        assert_eq!(report.outcome, TickOutcome::Interrupted);
        assert_eq!(report.sent, 1);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_stop_during_send_lets_send_finish() {
        let delivery = MockDelivery::new().with_delay(Duration::from_millis(200));
        let h = harness_with(MockContent::new(), delivery, settings());
        seed(&h.store, &["Smile Dental", "Bright Teeth"]);

        let (report, _) = tokio::join!(h.scheduler.tick(wednesday(10)), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            h.control.stop();
        });
        let report = report.unwrap();

        // the in-flight send completes and is recorded; the next lead is not started
        assert_eq!(report.outcome, TickOutcome::Interrupted);
        assert_eq!(report.sent, 1);
        assert_eq!(h.delivery.sent().len(), 1);
        let counts = h.store.lock_sync().unwrap().counts().unwrap();
        assert_eq!((counts.new, counts.contacted), (1, 1));
    }

    #[tokio::test]
    async fn test_missing_email_fails_compose_step() {
        let h = harness();
        let mut b = business("No Mail Dental", "dentist");
        b.email = None;
        h.store.lock_sync().unwrap().insert(&b, wednesday(6)).unwrap();

        let report = h.scheduler.tick(wednesday(10)).await.unwrap();
        assert_eq!(report.failures[0].step, Step::Compose);
        assert!(report.failures[0].error.contains("no deliverable"));
    }

    #[tokio::test]
    async fn test_optimal_send_time_is_inside_window() {
        let h = harness();
        let lead = crate::testing::fixtures::lead("Smile Dental", "dentist");
        let rec = h
            .scheduler
            .compute_optimal_send_time(&lead, saturday(10))
            .await
            .unwrap();
        assert!((9..=14).contains(&rec.hour));
        assert!(rec.expected_open_rate > 0.0);
    }

    #[test]
    fn test_order_by_score_is_stable() {
        let leads = vec![
            crate::testing::fixtures::lead("First Bakery", "bakery"),
            crate::testing::fixtures::lead("Smile Dental", "dentist"),
            crate::testing::fixtures::lead("Second Bakery", "bakery"),
        ];
        let local = wednesday(10).naive_utc();
        let ordered: Vec<_> = order_by_score(leads, local)
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(ordered, ["Smile Dental", "First Bakery", "Second Bakery"]);
    }

    #[tokio::test]
    async fn test_scenario_dentists_are_contacted() {
        let h = harness();
        let guard = h.store.lock_sync().unwrap();
        for b in austin_dentists() {
            guard.insert(&b, wednesday(8)).unwrap();
        }
        drop(guard);

        let report = h.scheduler.tick(wednesday(10)).await.unwrap();
        assert_eq!(report.sent, 3);
    }
}
