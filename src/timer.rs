//! Periodic task scheduler.
//!
//! Tasks are registered with a [`SchedulePolicy`] and run on their own tokio
//! task. Every loop consults [`RunControl`]: paused tasks wait and a stop
//! ends them at the next boundary. [`Scheduler::shutdown`] lets a run that is
//! already in progress finish within a grace period; [`Scheduler::stop`]
//! aborts whatever is still running.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::control::RunControl;

/// Identifier returned by registration, used to cancel a task.
pub type TaskId = u64;

/// When a task runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulePolicy {
    /// Every `every`, first run immediately when `immediate`.
    Interval { every: Duration, immediate: bool },
    /// At each local time of day in `times`.
    DailyAt {
        times: Vec<NaiveTime>,
        offset: FixedOffset,
    },
}

/// Next instant after `now` matching one of `times` on the local clock.
#[must_use]
pub fn next_daily(times: &[NaiveTime], offset: FixedOffset, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let local = now.with_timezone(&offset).naive_local();
    times
        .iter()
        .filter_map(|time| {
            let today = local.date().and_time(*time);
            let at = if today > local {
                today
            } else {
                local.date().succ_opt()?.and_time(*time)
            };
            offset.from_local_datetime(&at).single()
        })
        .map(|t| t.with_timezone(&Utc))
        .min()
}

struct Registered {
    name: String,
    policy: SchedulePolicy,
    handle: JoinHandle<()>,
}

/// Owns the engine's timer tasks.
pub struct Scheduler {
    control: Arc<RunControl>,
    tasks: Mutex<BTreeMap<TaskId, Registered>>,
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new(control: Arc<RunControl>) -> Self {
        Self {
            control,
            tasks: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register_interval<F, Fut>(&self, name: &str, every: Duration, task: F) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(
            name,
            SchedulePolicy::Interval {
                every,
                immediate: true,
            },
            task,
        )
    }

    pub fn register_daily_at<F, Fut>(
        &self,
        name: &str,
        times: Vec<NaiveTime>,
        offset: FixedOffset,
        task: F,
    ) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(name, SchedulePolicy::DailyAt { times, offset }, task)
    }

    /// Spawn `task` under `policy`. Must be called inside a tokio runtime.
    pub fn register<F, Fut>(&self, name: &str, policy: SchedulePolicy, task: F) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let control = self.control.clone();
        let handle = match policy.clone() {
            SchedulePolicy::Interval { every, immediate } => {
                tokio::spawn(run_interval(control, every, immediate, task))
            }
            SchedulePolicy::DailyAt { times, offset } => {
                tokio::spawn(run_daily(control, times, offset, task))
            }
        };
        debug!("Registered task {} ({}): {:?}", id, name, policy);
        self.lock().insert(
            id,
            Registered {
                name: name.to_string(),
                policy,
                handle,
            },
        );
        id
    }

    /// Abort one task. False when the id is unknown.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.lock().remove(&id) {
            Some(task) => {
                task.handle.abort();
                debug!("Cancelled task {} ({})", id, task.name);
                true
            }
            None => false,
        }
    }

    /// Registered tasks as (id, name, policy).
    pub fn tasks(&self) -> Vec<(TaskId, String, SchedulePolicy)> {
        self.lock()
            .iter()
            .map(|(id, t)| (*id, t.name.clone(), t.policy.clone()))
            .collect()
    }

    /// Abort every task.
    pub fn stop(&self) {
        let tasks = std::mem::take(&mut *self.lock());
        for (_, task) in &tasks {
            task.handle.abort();
        }
        if !tasks.is_empty() {
            info!("Scheduler stopped {} tasks", tasks.len());
        }
    }

    /// Signal stop and wait up to `grace` for running tasks to finish,
    /// then abort the stragglers.
    pub async fn shutdown(&self, grace: Duration) {
        self.control.stop();
        let tasks = std::mem::take(&mut *self.lock());
        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0usize;
        for (id, mut task) in tasks {
            if tokio::time::timeout_at(deadline, &mut task.handle).await.is_err() {
                warn!("Task {} ({}) still running after grace period; aborting", id, task.name);
                task.handle.abort();
                aborted += 1;
            }
        }
        info!("Scheduler shut down ({} aborted)", aborted);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<TaskId, Registered>> {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_interval<F, Fut>(control: Arc<RunControl>, every: Duration, immediate: bool, task: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    let start = if immediate {
        tokio::time::Instant::now()
    } else {
        tokio::time::Instant::now() + every
    };
    let mut ticker = tokio::time::interval_at(start, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = control.stopped() => return,
        }
        if !control.wait_until_running().await {
            return;
        }
        task().await;
    }
}

async fn run_daily<F, Fut>(control: Arc<RunControl>, times: Vec<NaiveTime>, offset: FixedOffset, task: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let now = Utc::now();
        let Some(next) = next_daily(&times, offset, now) else {
            return;
        };
        let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = control.stopped() => return,
        }
        if !control.wait_until_running().await {
            return;
        }
        task().await;
    }
}
