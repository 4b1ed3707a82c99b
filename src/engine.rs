//! Engine context.
//!
//! Builds every component with explicit references to its collaborators
//! and the shared state, and drives them from the [`Scheduler`]:
//!
//! - outreach every `outreach.tick_interval_secs`, preceded by a phase check
//! - discovery at the phase's search times (or `discovery.daily_at`)
//! - a full health check every `health.interval_secs`
//! - a health heartbeat every `health.heartbeat_secs`
//!
//! A phase transition re-targets discovery immediately and re-registers its
//! daily times.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use crate::config::{parse_time_of_day, EngineConfig};
use crate::control::{EngineStats, RunControl};
use crate::discovery::{search_pairs, DiscoveryCycle, DiscoveryReport};
use crate::error::{EngineError, Result};
use crate::escalation::{AlertCooldown, EscalationGate, EscalationRecord};
use crate::health::{HealthMonitor, HealthSnapshot};
use crate::lead::{LeadStore, LeadStoreHandle};
use crate::outreach::{OutreachScheduler, OutreachSettings, TickReport};
use crate::phase::{Phase, PhaseController, PhaseTransition};
use crate::providers::{bounded, Channel, Issue, Providers};
use crate::report::EngineReport;
use crate::timer::{Scheduler, TaskId};

pub struct Engine {
    project_dir: PathBuf,
    config: EngineConfig,
    providers: Providers,
    store: LeadStoreHandle,
    phases: Arc<AsyncMutex<PhaseController>>,
    stats: Arc<EngineStats>,
    control: Arc<RunControl>,
    discovery: DiscoveryCycle,
    outreach: OutreachScheduler,
    health: HealthMonitor,
    escalation: EscalationGate,
    scheduler: Scheduler,
    discovery_task: std::sync::Mutex<Option<TaskId>>,
}

impl Engine {
    /// Open the project's state and wire the components.
    ///
    /// # Errors
    ///
    /// Fails when the lead store cannot be opened.
    pub fn open(project_dir: &Path, config: EngineConfig, providers: Providers) -> Result<Arc<Self>> {
        let store = LeadStoreHandle::new(LeadStore::open(&EngineConfig::leads_db_path(project_dir))?);
        let controller = PhaseController::load(
            EngineConfig::strategy_path(project_dir),
            config.phases.regression,
        );
        if controller.is_degraded() {
            warn!("Running on {}", controller.source());
        }
        let phase = controller.active_phase();
        if search_pairs(&phase, &config.discovery).is_empty() {
            warn!(
                "{} targets no cities or industries and no discovery overrides are set; \
                 discovery will not run",
                phase
            );
        }

        let stats = Arc::new(EngineStats::new(Utc::now()));
        let control = Arc::new(RunControl::new());
        let cooldown = Arc::new(AlertCooldown::new(config.escalation.cooldown()));
        let phases = Arc::new(AsyncMutex::new(controller));
        let timeout = config.outreach.provider_timeout();

        let discovery = DiscoveryCycle::new(
            providers.discovery.clone(),
            store.clone(),
            stats.clone(),
            control.clone(),
            timeout,
        );
        let outreach = OutreachScheduler::new(
            providers.clone(),
            store.clone(),
            phases.clone(),
            stats.clone(),
            control.clone(),
            OutreachSettings::from_config(&config),
        );
        let health = HealthMonitor::new(
            store.clone(),
            stats.clone(),
            providers.notifier.clone(),
            cooldown.clone(),
            config.health.clone(),
            EngineConfig::health_path(project_dir),
            timeout,
        );
        let escalation = EscalationGate::new(
            config.escalation.severity_threshold,
            providers.content.clone(),
            providers.notifier.clone(),
            cooldown,
            timeout,
        );

        Ok(Arc::new(Self {
            project_dir: project_dir.to_path_buf(),
            scheduler: Scheduler::new(control.clone()),
            config,
            providers,
            store,
            phases,
            stats,
            control,
            discovery,
            outreach,
            health,
            escalation,
            discovery_task: std::sync::Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn store(&self) -> &LeadStoreHandle {
        &self.store
    }

    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    /// Signal every loop to stop. Work already in flight finishes; `run`
    /// waits for it before returning.
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Stop and wait up to `engine.shutdown_grace_secs` for running timer
    /// tasks, aborting any that overrun.
    pub async fn shutdown(&self) {
        self.control.stop();
        self.scheduler
            .shutdown(self.config.engine.shutdown_grace())
            .await;
    }

    /// Startup checks for commands that send email.
    ///
    /// # Errors
    ///
    /// A missing sender address or a failing collaborator is a
    /// configuration error.
    pub async fn preflight(&self) -> Result<()> {
        self.config.require_outreach_settings()?;
        if self.config.testing.skip_testing {
            info!("Provider preflight skipped");
            return Ok(());
        }
        self.providers
            .preflight(self.config.outreach.provider_timeout())
            .await?;
        info!("Provider preflight passed");
        Ok(())
    }

    pub async fn active_phase(&self) -> Phase {
        self.phases.lock().await.active_phase()
    }

    /// Recompute the phase from the customer count, persisting and
    /// announcing any transition.
    pub async fn check_phase(&self, now: DateTime<Utc>) -> Result<Option<PhaseTransition>> {
        let customers = self.store.call(|s| s.customer_count()).await?;
        let transition = self.phases.lock().await.advance_if_needed(customers, now)?;

        if let Some(ref t) = transition {
            let message = format!(
                "Phase {} -> {} at {} customers",
                t.from, t.to, t.customer_count
            );
            let notify = self.providers.notifier.notify(Channel::Operator, &message);
            if let Err(e) = bounded("notifier", self.config.outreach.provider_timeout(), notify).await {
                warn!("Could not announce phase change: {}", e);
            }
        }
        Ok(transition)
    }

    /// One discovery cycle for the active phase.
    pub async fn discover(&self, now: DateTime<Utc>) -> Result<DiscoveryReport> {
        let phase = self.active_phase().await;
        self.discovery.run(&phase, &self.config.discovery, now).await
    }

    /// Phase check followed by one outreach tick.
    pub async fn outreach_tick(self: &Arc<Self>, now: DateTime<Utc>) -> Result<TickReport> {
        if self.check_phase(now).await?.is_some() {
            self.retarget_discovery(now).await;
        }
        self.outreach.tick(now).await
    }

    pub async fn health_check(&self, now: DateTime<Utc>) -> Result<Option<HealthSnapshot>> {
        self.health.check(now).await
    }

    pub async fn heartbeat(&self, now: DateTime<Utc>) -> Result<HealthSnapshot> {
        self.health.snapshot(now).await
    }

    /// Route an inbound issue through the escalation gate.
    pub async fn handle_issue(&self, issue: &Issue, now: DateTime<Utc>) -> Result<EscalationRecord> {
        self.escalation.handle(issue, now).await
    }

    pub async fn report(&self, now: DateTime<Utc>) -> Result<EngineReport> {
        let (phase, source) = {
            let phases = self.phases.lock().await;
            (phases.active_phase(), phases.source().clone())
        };
        let config = self.config.clone();
        let report = self
            .store
            .call(move |s| EngineReport::gather(s, &phase, &source, &config, now))
            .await?;
        Ok(report
            .with_health(self.health.last_snapshot()?, self.config.health.snapshot_max_age())
            .with_escalation(self.escalation.stats()))
    }

    /// Run until stopped, interrupted, or `duration` elapses, then return
    /// the final report.
    ///
    /// # Errors
    ///
    /// Startup failures (preflight, store) are returned; failures inside
    /// scheduled tasks are logged and the engine keeps running.
    pub async fn run(self: &Arc<Self>, duration: Option<Duration>) -> Result<EngineReport> {
        self.preflight().await?;
        if self.control.is_stopped() {
            return Err(EngineError::Stopped);
        }

        let now = Utc::now();
        let phase = self.active_phase().await;
        info!("Engine started in {} ({})", phase, self.config.engine.mode);

        if self.check_phase(now).await?.is_some() {
            info!("Now in {}", self.active_phase().await);
        }
        log_discovery(self.discover(now).await);
        self.register_tasks().await;

        let deadline = async {
            match duration {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = deadline => info!("Run duration elapsed"),
            _ = self.control.stopped() => info!("Engine stop requested"),
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => info!("Interrupted"),
                Err(e) => error!("Signal handler failed: {}", e),
            },
        }

        self.shutdown().await;
        let report = self.report(Utc::now()).await?;
        info!("Engine stopped\n{}", report);
        Ok(report)
    }

    async fn register_tasks(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.scheduler.register_interval(
            "outreach",
            self.config.outreach.tick_interval(),
            on_timer(&weak, |engine| async move {
                log_tick(engine.outreach_tick(Utc::now()).await);
            }),
        );

        self.scheduler.register(
            "health",
            crate::timer::SchedulePolicy::Interval {
                every: self.config.health.interval(),
                immediate: false,
            },
            on_timer(&weak, |engine| async move {
                if let Err(e) = engine.health_check(Utc::now()).await {
                    error!("Health check failed: {}", e);
                }
            }),
        );

        self.scheduler.register_interval(
            "heartbeat",
            self.config.health.heartbeat(),
            on_timer(&weak, |engine| async move {
                if let Err(e) = engine.heartbeat(Utc::now()).await {
                    error!("Heartbeat failed: {}", e);
                }
            }),
        );

        let phase = self.active_phase().await;
        self.schedule_discovery(&phase);
    }

    /// Register discovery at the phase's search times, replacing any
    /// earlier registration.
    fn schedule_discovery(self: &Arc<Self>, phase: &Phase) {
        let mut times: Vec<_> = phase
            .settings
            .search_times
            .iter()
            .filter_map(|t| parse_time_of_day(t))
            .collect();
        if times.is_empty() {
            times = self.config.discovery.times();
        }

        let mut slot = self
            .discovery_task
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = slot.take() {
            self.scheduler.cancel(previous);
        }
        if search_pairs(phase, &self.config.discovery).is_empty() {
            warn!("{} has nothing to search; discovery timer not registered", phase);
            return;
        }
        if times.is_empty() {
            warn!("No valid discovery times; discovery runs only on phase changes");
            return;
        }

        let weak = Arc::downgrade(self);
        let id = self.scheduler.register_daily_at(
            "discovery",
            times,
            self.config.utc_offset(),
            on_timer(&weak, |engine| async move {
                log_discovery(engine.discover(Utc::now()).await);
            }),
        );
        *slot = Some(id);
    }

    async fn retarget_discovery(self: &Arc<Self>, now: DateTime<Utc>) {
        let phase = self.active_phase().await;
        info!("Retargeting discovery for {}", phase);
        if !self.control.is_stopped() && !self.scheduler.tasks().is_empty() {
            self.schedule_discovery(&phase);
        }
        log_discovery(self.discover(now).await);
    }
}

type TimerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Adapt an engine method into a timer task holding only a weak reference.
fn on_timer<F, Fut>(
    weak: &Weak<Engine>,
    f: F,
) -> impl Fn() -> TimerFuture + Send + Sync + 'static
where
    F: Fn(Arc<Engine>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let weak = weak.clone();
    move || {
        let engine = weak.upgrade();
        let fut = engine.map(&f);
        Box::pin(async move {
            if let Some(fut) = fut {
                fut.await;
            }
        })
    }
}

fn log_tick(result: Result<TickReport>) {
    match result {
        Ok(report) => tracing::debug!("Outreach tick: {:?}", report.outcome),
        Err(e) => error!("Outreach tick failed: {}", e),
    }
}

fn log_discovery(result: Result<DiscoveryReport>) {
    if let Err(e) = result {
        error!("Discovery failed: {}", e);
    }
}
