//! Cooldown and rate-limit gates for intervention emission.
//!
//! `CooldownTracker` keeps the last emission time per intervention type and a
//! log of emissions within the trailing hour. Every scored decision passes
//! through `check` before it is emitted; successful emissions are recorded with
//! `record_emission` so later decisions are compared against them.

use crate::config::CooldownWindows;

use chrono::{DateTime, Utc};

use std::collections::{HashMap, VecDeque};
use std::fmt;

const RATE_WINDOW_SECS: i64 = 3600;

/// Reason a scored decision was not emitted. A normal outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum GateRejection {
    /// Nothing contributed to the score, so there is no type to emit.
    NoContributor,
    /// The adjusted score is under the minimum intervention threshold.
    BelowThreshold { score: f64, threshold: f64 },
    /// The type was emitted within its cooldown window.
    Cooldown { type_key: String, remaining_secs: i64 },
    /// The trailing-hour emission cap is reached.
    RateLimit { emitted: usize, max_per_hour: usize },
}

impl fmt::Display for GateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoContributor => write!(f, "no contributing signal"),
            Self::BelowThreshold { score, threshold } => {
                write!(f, "score {score:.3} below threshold {threshold:.3}")
            }
            Self::Cooldown { type_key, remaining_secs } => {
                write!(f, "{type_key} on cooldown for another {remaining_secs}s")
            }
            Self::RateLimit { emitted, max_per_hour } => {
                write!(f, "{emitted} emissions in the last hour (cap {max_per_hour})")
            }
        }
    }
}

/// Per-type cooldowns and the trailing-hour emission log.
#[derive(Debug, Clone, Default)]
pub struct CooldownTracker {
    /// Last successful emission per intervention type key.
    last_emitted: HashMap<String, DateTime<Utc>>,
    /// Emission times within the rate window, in recording order.
    recent_emissions: VecDeque<DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted cooldown timestamps and emission times.
    pub fn restore(
        last_emitted: impl IntoIterator<Item = (String, DateTime<Utc>)>,
        mut emissions: Vec<DateTime<Utc>>,
    ) -> Self {
        emissions.sort();
        Self {
            last_emitted: last_emitted.into_iter().collect(),
            recent_emissions: emissions.into(),
        }
    }

    /// Returns the rejection if a decision of `type_key` may not be emitted at
    /// `now`. Cooldown is checked before the hourly cap.
    pub fn check(
        &self,
        type_key: &str,
        now: DateTime<Utc>,
        windows: &CooldownWindows,
    ) -> Option<GateRejection> {
        if let Some(last) = self.last_emitted.get(type_key) {
            let elapsed = (now - *last).num_seconds();
            let window = windows.window_secs(type_key);
            if elapsed < window {
                return Some(GateRejection::Cooldown {
                    type_key: type_key.to_string(),
                    remaining_secs: window - elapsed,
                });
            }
        }

        let emitted = self.emitted_within_hour(now);
        if emitted >= windows.max_per_hour {
            return Some(GateRejection::RateLimit {
                emitted,
                max_per_hour: windows.max_per_hour,
            });
        }

        None
    }

    /// Record a successful emission and drop log entries older than an hour.
    pub fn record_emission(&mut self, type_key: &str, now: DateTime<Utc>) {
        self.last_emitted.insert(type_key.to_string(), now);
        self.recent_emissions.push_back(now);
        self.cleanup_expired(now);
    }

    /// Remove emission log entries more than an hour from `now` in either
    /// direction. Replayed timestamps can arrive out of order, so the whole
    /// log is scanned rather than just its front.
    pub fn cleanup_expired(&mut self, now: DateTime<Utc>) {
        self.recent_emissions
            .retain(|emitted| within_rate_window(now, *emitted));
    }

    /// Emissions within an hour of `now` in either direction, so replayed
    /// out-of-order timestamps still respect the cap.
    pub fn emitted_within_hour(&self, now: DateTime<Utc>) -> usize {
        self.recent_emissions
            .iter()
            .filter(|emitted| within_rate_window(now, **emitted))
            .count()
    }

    /// Cooldown timestamps for persistence, sorted by type key.
    pub fn snapshot(&self) -> Vec<(String, DateTime<Utc>)> {
        let mut entries: Vec<_> = self
            .last_emitted
            .iter()
            .map(|(key, at)| (key.clone(), *at))
            .collect();
        entries.sort_by(|left, right| left.0.cmp(&right.0));
        entries
    }
}

fn within_rate_window(now: DateTime<Utc>, emitted: DateTime<Utc>) -> bool {
    (now - emitted).num_seconds().abs() < RATE_WINDOW_SECS
}
