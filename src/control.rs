//! Shared run-control state: pause/resume/stop, reentrancy guards and
//! engine counters.
//!
//! Everything here is cheap to share behind an `Arc` and lock-free on the
//! hot path.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

/// Cooperative run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

/// Pause/resume/stop signal consulted at loop and batch boundaries.
///
/// Flipping the state never interrupts work in progress; components check
/// it between units of work.
#[derive(Debug)]
pub struct RunControl {
    state: watch::Sender<RunState>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(RunState::Running);
        Self { state }
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn pause(&self) {
        self.transition(RunState::Paused);
    }

    pub fn resume(&self) {
        self.transition(RunState::Running);
    }

    /// Stop is terminal: later pause/resume calls are ignored.
    pub fn stop(&self) {
        self.transition(RunState::Stopped);
    }

    fn transition(&self, next: RunState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == RunState::Stopped || *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            info!("Engine {:?}", next);
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state() == RunState::Paused
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state() == RunState::Stopped
    }

    /// Wait while paused. Returns `false` if the engine is (or becomes)
    /// stopped, `true` once running.
    pub async fn wait_until_running(&self) -> bool {
        let mut rx = self.state.subscribe();
        loop {
            match *rx.borrow_and_update() {
                RunState::Running => return true,
                RunState::Stopped => return false,
                RunState::Paused => {}
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Resolve once the engine is stopped.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        // the sender lives in self, so wait_for only fails if self is gone
        let _ = rx.wait_for(|state| *state == RunState::Stopped).await;
    }
}

/// Per-component reentrancy flag.
#[derive(Debug, Default)]
pub struct TickGate {
    busy: AtomicBool,
}

impl TickGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the tick, or `None` if a previous tick is still running.
    #[must_use]
    pub fn try_enter(&self) -> Option<TickGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TickGuard { gate: self })
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases its [`TickGate`] on drop, including on early return or panic.
#[derive(Debug)]
pub struct TickGuard<'a> {
    gate: &'a TickGate,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

const NONE: i64 = i64::MIN;

fn load_time(cell: &AtomicI64) -> Option<DateTime<Utc>> {
    match cell.load(Ordering::SeqCst) {
        NONE => None,
        ms => DateTime::from_timestamp_millis(ms),
    }
}

/// Engine-wide counters, updated by the pipeline and read by health and
/// reporting.
#[derive(Debug)]
pub struct EngineStats {
    started_at: DateTime<Utc>,
    leads_generated: AtomicU64,
    emails_sent: AtomicU64,
    send_failures: AtomicU64,
    ticks_run: AtomicU64,
    ticks_skipped: AtomicU64,
    last_lead_at: AtomicI64,
    last_email_at: AtomicI64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub leads_generated: u64,
    pub emails_sent: u64,
    pub send_failures: u64,
    pub ticks_run: u64,
    pub ticks_skipped: u64,
    pub last_lead_at: Option<DateTime<Utc>>,
    pub last_email_at: Option<DateTime<Utc>>,
}

impl EngineStats {
    #[must_use]
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            leads_generated: AtomicU64::new(0),
            emails_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            ticks_run: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            last_lead_at: AtomicI64::new(NONE),
            last_email_at: AtomicI64::new(NONE),
        }
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn record_leads(&self, count: u64, at: DateTime<Utc>) {
        if count == 0 {
            return;
        }
        self.leads_generated.fetch_add(count, Ordering::SeqCst);
        self.last_lead_at.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn record_email_sent(&self, at: DateTime<Utc>) {
        self.emails_sent.fetch_add(1, Ordering::SeqCst);
        self.last_email_at.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_tick(&self, ran: bool) {
        if ran {
            self.ticks_run.fetch_add(1, Ordering::SeqCst);
        } else {
            self.ticks_skipped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[must_use]
    pub fn emails_sent(&self) -> u64 {
        self.emails_sent.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn leads_generated(&self) -> u64 {
        self.leads_generated.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: self.started_at,
            leads_generated: self.leads_generated(),
            emails_sent: self.emails_sent(),
            send_failures: self.send_failures.load(Ordering::SeqCst),
            ticks_run: self.ticks_run.load(Ordering::SeqCst),
            ticks_skipped: self.ticks_skipped.load(Ordering::SeqCst),
            last_lead_at: load_time(&self.last_lead_at),
            last_email_at: load_time(&self.last_email_at),
        }
    }
}
