//! Alert de-duplication.
//!
//! The send log lives in memory only. A restart re-arms every key, so the
//! first alert of each kind after a restart is always delivered.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Remembers when each alert key was last sent and suppresses repeats
/// inside the cooldown.
///
/// Shared by the escalation gate and the health monitor so one alert key
/// space covers every human-facing notification.
#[derive(Debug)]
pub struct AlertCooldown {
    cooldown: Duration,
    sent: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl AlertCooldown {
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            sent: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// True when `key` was never sent or its last send is at least one
    /// cooldown ago. Does not stamp the key.
    pub fn is_due(&self, key: &str, now: DateTime<Utc>) -> bool {
        match self.last_sent(key) {
            Some(last) if now - last < self.cooldown => {
                debug!("Alert {} suppressed (last sent {})", key, last);
                false
            }
            _ => true,
        }
    }

    /// Stamp `key` as delivered at `now`. Call only once delivery succeeded.
    pub fn record_sent(&self, key: &str, now: DateTime<Utc>) {
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), now);
    }

    /// `is_due` followed by `record_sent`, for callers whose delivery
    /// cannot fail.
    pub fn notify_if_due(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut sent = self.sent.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(last) = sent.get(key) {
            if now - *last < self.cooldown {
                debug!("Alert {} suppressed (last sent {})", key, last);
                return false;
            }
        }
        sent.insert(key.to_string(), now);
        true
    }

    /// When `key` was last sent.
    pub fn last_sent(&self, key: &str) -> Option<DateTime<Utc>> {
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .copied()
    }
}
