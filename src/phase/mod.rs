//! Growth phases - which markets to target as the business scales.
//!
//! A [`GrowthStrategy`] is an ordered list of [`Phase`]s, each owning a
//! customer-count range. The active phase is the first one whose range
//! contains the current customer count; no match falls back to the first
//! phase. The [`PhaseController`] owns the persisted strategy and records
//! every transition.
//!
//! # Modules
//!
//! - [`controller`] - Strategy loading, phase selection and transitions

pub mod controller;

pub use controller::{PhaseController, StrategySource};

use crate::error::{EngineError, Result};
use crate::lead::Lead;
use chrono::{DateTime, NaiveDateTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What to do when the customer count drops below the active phase's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionPolicy {
    /// Recompute the phase from the current count, even if that moves back.
    #[default]
    Recompute,
    /// Never move to a lower phase once reached.
    Hold,
}

/// Inclusive customer-count range; `max = None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRange {
    pub min: u64,
    #[serde(default)]
    pub max: Option<u64>,
}

impl CustomerRange {
    #[must_use]
    pub fn new(min: u64, max: Option<u64>) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn contains(&self, count: u64) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }
}

impl fmt::Display for CustomerRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "[{}, {}]", self.min, max),
            None => write!(f, "[{}, \u{221e})", self.min),
        }
    }
}

/// Days and hours (local time, inclusive) during which sends may happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendWindow {
    pub days: Vec<Weekday>,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for SendWindow {
    fn default() -> Self {
        Self {
            days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            start_hour: 9,
            end_hour: 14,
        }
    }
}

impl SendWindow {
    #[must_use]
    pub fn allows_day(&self, day: Weekday) -> bool {
        self.days.contains(&day)
    }

    #[must_use]
    pub fn allows_hour(&self, hour: u32) -> bool {
        (self.start_hour..=self.end_hour).contains(&hour)
    }

    #[must_use]
    pub fn contains(&self, local: NaiveDateTime) -> bool {
        use chrono::Datelike;
        self.allows_day(local.weekday()) && self.allows_hour(local.hour())
    }
}

/// Website requirement of a phase's target criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebsiteTarget {
    #[default]
    Any,
    /// Businesses with no website (new-site prospects).
    Without,
    /// Businesses that already have one (upgrade candidates).
    With,
}

impl WebsiteTarget {
    /// Required value of `has_website`, `None` for any.
    #[must_use]
    pub fn required_has_website(&self) -> Option<bool> {
        match self {
            Self::Any => None,
            Self::Without => Some(false),
            Self::With => Some(true),
        }
    }
}

/// Which leads a phase wants to contact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetCriteria {
    #[serde(default)]
    pub website: WebsiteTarget,
    #[serde(default)]
    pub min_rating: Option<f64>,
    #[serde(default)]
    pub min_reviews: Option<u32>,
}

impl TargetCriteria {
    #[must_use]
    pub fn matches(&self, lead: &Lead) -> bool {
        if let Some(required) = self.website.required_has_website() {
            if lead.has_website != required {
                return false;
            }
        }
        if let Some(min) = self.min_rating {
            if lead.rating.map_or(true, |r| r < min) {
                return false;
            }
        }
        if let Some(min) = self.min_reviews {
            if lead.review_count < min {
                return false;
            }
        }
        true
    }
}

/// Operating settings of a phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseSettings {
    /// "City, ST" locations searched by discovery.
    #[serde(default)]
    pub target_cities: Vec<String>,
    #[serde(default)]
    pub target_industries: Vec<String>,
    /// Local "HH:MM" discovery times; empty uses `discovery.daily_at`.
    #[serde(default)]
    pub search_times: Vec<String>,
    #[serde(default)]
    pub send_window: SendWindow,
    #[serde(default)]
    pub criteria: TargetCriteria,
    /// Overrides `outreach.daily_email_cap` while this phase is active.
    #[serde(default)]
    pub daily_email_cap: Option<u32>,
    /// Overrides `outreach.batch_size` while this phase is active.
    #[serde(default)]
    pub batch_size: Option<usize>,
}

/// Cost and revenue targets. Reporting only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseEconomics {
    #[serde(default)]
    pub monthly_cost: f64,
    #[serde(default)]
    pub monthly_revenue_target: f64,
    #[serde(default)]
    pub price_per_customer: f64,
}

/// A named operating configuration selected by customer count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub phase: u32,
    pub name: String,
    pub customer_range: CustomerRange,
    #[serde(default)]
    pub settings: PhaseSettings,
    #[serde(default)]
    pub economics: PhaseEconomics,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Phase {} ({}) {}", self.phase, self.name, self.customer_range)
    }
}

impl Phase {
    /// Single unbounded phase used when no usable strategy exists.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            phase: 1,
            name: "Default".to_string(),
            customer_range: CustomerRange::new(0, None),
            settings: PhaseSettings::default(),
            economics: PhaseEconomics::default(),
        }
    }
}

/// One recorded phase change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: u32,
    pub to: u32,
    pub customer_count: u64,
    pub timestamp: DateTime<Utc>,
}

impl PhaseTransition {
    #[must_use]
    pub fn is_regression(&self) -> bool {
        self.to < self.from
    }
}

/// Ordered phases, the active pointer and the transition log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthStrategy {
    pub phases: Vec<Phase>,
    pub current_phase: u32,
    #[serde(default)]
    pub transitions: Vec<PhaseTransition>,
}

impl Default for GrowthStrategy {
    fn default() -> Self {
        Self {
            phases: vec![Phase::fallback()],
            current_phase: 1,
            transitions: Vec::new(),
        }
    }
}

impl GrowthStrategy {
    /// Three-phase starter strategy written by `prospector init`.
    #[must_use]
    pub fn standard() -> Self {
        let phase = |n: u32, name: &str, range: CustomerRange, settings: PhaseSettings, price: f64| Phase {
            phase: n,
            name: name.to_string(),
            customer_range: range,
            settings,
            economics: PhaseEconomics {
                monthly_cost: 50.0 * n as f64,
                monthly_revenue_target: price * range.max.unwrap_or(range.min * 2) as f64,
                price_per_customer: price,
            },
        };

        Self {
            phases: vec![
                phase(
                    1,
                    "Local Launch",
                    CustomerRange::new(0, Some(4)),
                    PhaseSettings {
                        target_cities: vec!["Austin, TX".into()],
                        target_industries: vec!["dentist".into()],
                        criteria: TargetCriteria {
                            website: WebsiteTarget::Without,
                            ..Default::default()
                        },
                        daily_email_cap: Some(20),
                        ..Default::default()
                    },
                    99.0,
                ),
                phase(
                    2,
                    "Regional Growth",
                    CustomerRange::new(5, Some(14)),
                    PhaseSettings {
                        target_cities: vec!["Austin, TX".into(), "San Antonio, TX".into()],
                        target_industries: vec!["dentist".into(), "plumber".into(), "hvac".into()],
                        daily_email_cap: Some(50),
                        ..Default::default()
                    },
                    149.0,
                ),
                phase(
                    3,
                    "Scale",
                    CustomerRange::new(15, None),
                    PhaseSettings {
                        target_cities: vec![
                            "Austin, TX".into(),
                            "San Antonio, TX".into(),
                            "Dallas, TX".into(),
                            "Houston, TX".into(),
                        ],
                        target_industries: vec![
                            "dentist".into(),
                            "plumber".into(),
                            "hvac".into(),
                            "salon".into(),
                            "restaurant".into(),
                        ],
                        search_times: vec!["07:00".into(), "13:00".into()],
                        criteria: TargetCriteria {
                            min_rating: Some(3.5),
                            ..Default::default()
                        },
                        daily_email_cap: Some(100),
                        batch_size: Some(20),
                        ..Default::default()
                    },
                    199.0,
                ),
            ],
            current_phase: 1,
            transitions: Vec::new(),
        }
    }

    /// Structural checks: at least one phase, unique ordinals, sane ranges,
    /// and a pointer that names an existing phase.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(EngineError::InvalidStrategy { reason });

        if self.phases.is_empty() {
            return invalid("strategy has no phases".to_string());
        }
        for (i, phase) in self.phases.iter().enumerate() {
            if let Some(max) = phase.customer_range.max {
                if max < phase.customer_range.min {
                    return invalid(format!(
                        "phase {} has inverted range {}",
                        phase.phase, phase.customer_range
                    ));
                }
            }
            if self.phases[..i].iter().any(|p| p.phase == phase.phase) {
                return invalid(format!("duplicate phase ordinal {}", phase.phase));
            }
            if phase.settings.send_window.start_hour > 23 || phase.settings.send_window.end_hour > 23
            {
                return invalid(format!("phase {} send window hours exceed 23", phase.phase));
            }
        }
        if self.phase(self.current_phase).is_none() {
            return invalid(format!(
                "current phase {} is not defined",
                self.current_phase
            ));
        }
        Ok(())
    }

    /// First phase whose range contains `customer_count`, else the first phase.
    #[must_use]
    pub fn select(&self, customer_count: u64) -> Option<&Phase> {
        self.phases
            .iter()
            .find(|p| p.customer_range.contains(customer_count))
            .or_else(|| self.phases.first())
    }

    #[must_use]
    pub fn phase(&self, ordinal: u32) -> Option<&Phase> {
        self.phases.iter().find(|p| p.phase == ordinal)
    }

    /// The phase named by the stored pointer.
    #[must_use]
    pub fn current(&self) -> Option<&Phase> {
        self.phase(self.current_phase).or_else(|| self.phases.first())
    }
}
