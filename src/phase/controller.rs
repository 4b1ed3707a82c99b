//! Phase controller: owns the persisted growth strategy.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{GrowthStrategy, Phase, PhaseTransition, RegressionPolicy};
use crate::error::{EngineError, Result};
use crate::persistence::JsonDocument;

/// Where the active strategy came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategySource {
    /// Read from the strategy document.
    Persisted,
    /// No document yet; built-in default in use.
    Missing,
    /// Document unreadable or invalid; built-in default in use.
    Corrupt { reason: String },
}

impl fmt::Display for StrategySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persisted => write!(f, "persisted"),
            Self::Missing => write!(f, "default (no strategy file)"),
            Self::Corrupt { reason } => write!(f, "default (strategy corrupt: {})", reason),
        }
    }
}

/// Growth-phase state machine over the persisted [`GrowthStrategy`].
#[derive(Debug)]
pub struct PhaseController {
    document: JsonDocument<GrowthStrategy>,
    strategy: GrowthStrategy,
    source: StrategySource,
    policy: RegressionPolicy,
}

impl PhaseController {
    /// Load the strategy at `path`. Never fails: a missing or corrupt
    /// document degrades to the built-in single-phase default.
    pub fn load(path: impl AsRef<Path>, policy: RegressionPolicy) -> Self {
        let document = JsonDocument::new(path);
        let (strategy, source) = Self::load_strategy(&document);
        Self {
            document,
            strategy,
            source,
            policy,
        }
    }

    /// Read the persisted strategy, falling back to the default.
    pub fn load_strategy(document: &JsonDocument<GrowthStrategy>) -> (GrowthStrategy, StrategySource) {
        let loaded = document.load().and_then(|found| match found {
            Some(strategy) => strategy.validate().map(|_| Some(strategy)),
            None => Ok(None),
        });

        match loaded {
            Ok(Some(strategy)) => {
                info!(
                    "Loaded growth strategy with {} phase(s), current phase {}",
                    strategy.phases.len(),
                    strategy.current_phase
                );
                (strategy, StrategySource::Persisted)
            }
            Ok(None) => {
                info!(
                    "No growth strategy at {}, using single-phase default",
                    document.path().display()
                );
                (GrowthStrategy::default(), StrategySource::Missing)
            }
            Err(e) => {
                let err = EngineError::StrategyCorrupt {
                    path: document.path().to_path_buf(),
                    reason: e.to_string(),
                };
                warn!("{}. Falling back to single-phase default.", err);
                (
                    GrowthStrategy::default(),
                    StrategySource::Corrupt {
                        reason: e.to_string(),
                    },
                )
            }
        }
    }

    #[must_use]
    pub fn strategy(&self) -> &GrowthStrategy {
        &self.strategy
    }

    #[must_use]
    pub fn source(&self) -> &StrategySource {
        &self.source
    }

    /// True when running on the built-in default because the document was
    /// unusable.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self.source, StrategySource::Corrupt { .. })
    }

    #[must_use]
    pub fn policy(&self) -> RegressionPolicy {
        self.policy
    }

    /// The phase selected for `customer_count`, ignoring the stored pointer.
    #[must_use]
    pub fn current_phase(&self, customer_count: u64) -> Phase {
        self.strategy
            .select(customer_count)
            .cloned()
            .unwrap_or_else(Phase::fallback)
    }

    /// The phase named by the stored pointer.
    #[must_use]
    pub fn active_phase(&self) -> Phase {
        self.strategy.current().cloned().unwrap_or_else(Phase::fallback)
    }

    /// Move the pointer to the phase selected for `customer_count`.
    ///
    /// Returns the transition when the pointer moved, after the strategy has
    /// been persisted. A repeated call with the same count is a no-op and
    /// performs no write. Under [`RegressionPolicy::Hold`] a lower phase is
    /// never selected.
    pub fn advance_if_needed(
        &mut self,
        customer_count: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<PhaseTransition>> {
        let from = self.strategy.current_phase;
        let to = self.current_phase(customer_count).phase;

        if to == from {
            return Ok(None);
        }
        if to < from && self.policy == RegressionPolicy::Hold {
            return Ok(None);
        }

        let transition = PhaseTransition {
            from,
            to,
            customer_count,
            timestamp: now,
        };

        let mut updated = self.strategy.clone();
        updated.current_phase = to;
        updated.transitions.push(transition.clone());
        self.document.save(&updated)?;
        self.strategy = updated;
        self.source = StrategySource::Persisted;

        if transition.is_regression() {
            warn!(
                "Phase regressed {} -> {} at {} customers",
                from, to, customer_count
            );
        } else {
            info!(
                "Phase advanced {} -> {} at {} customers",
                from, to, customer_count
            );
        }
        Ok(Some(transition))
    }

    /// Replace and persist the whole strategy (operator `init`).
    pub fn replace(&mut self, strategy: GrowthStrategy) -> Result<()> {
        strategy.validate()?;
        self.document.save(&strategy)?;
        self.strategy = strategy;
        self.source = StrategySource::Persisted;
        Ok(())
    }
}
