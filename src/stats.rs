//! Queryable statistics for CLI and dashboard collaborators.

use crate::calibration::CalibrationLoop;
use crate::scorer::InterventionScorer;
use crate::types::{ModuleCalibration, PreferenceProfile};

use chrono::{DateTime, Utc};
use serde::Serialize;

use std::collections::BTreeMap;

/// A point-in-time snapshot of the intervention loop.
#[derive(Debug, Clone, Serialize)]
pub struct InterventionStats {
    pub generated_at: DateTime<Utc>,
    pub total_emitted: u64,
    pub emitted_last_hour: usize,
    pub by_type: BTreeMap<String, u64>,
    pub by_intensity: BTreeMap<String, u64>,
    pub responses: BTreeMap<String, u64>,
    /// Acknowledged over all responses; zero before any response.
    pub acknowledgement_rate: f64,
    pub preferences: PreferenceProfile,
    pub multiplier: f64,
    /// Outcomes recorded since the multiplier last moved.
    pub samples_since_recalibration: u64,
    pub modules: BTreeMap<String, ModuleCalibration>,
    pub action_history_len: usize,
    /// Signals held in memory waiting for a consumer.
    pub buffered_signals: usize,
    /// Signals written to the durable buffer; `None` without a store.
    pub persisted_signals: Option<u64>,
}

impl InterventionStats {
    pub fn collect(
        scorer: &InterventionScorer,
        calibration: &CalibrationLoop,
        action_history_len: usize,
        buffered_signals: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let counts = scorer.counts();
        let answered: u64 = counts.responses.values().sum();
        let acknowledged = counts.responses.get("acknowledged").copied().unwrap_or(0);
        let acknowledgement_rate = if answered == 0 {
            0.0
        } else {
            acknowledged as f64 / answered as f64
        };

        Self {
            generated_at: now,
            total_emitted: counts.total,
            emitted_last_hour: scorer.cooldowns().emitted_within_hour(now),
            by_type: counts.by_type.clone(),
            by_intensity: counts.by_intensity.clone(),
            responses: counts.responses.clone(),
            acknowledgement_rate,
            preferences: calibration.preferences().clone(),
            multiplier: calibration.multiplier(),
            samples_since_recalibration: calibration.samples_since_recalibration(),
            modules: calibration.modules().clone(),
            action_history_len,
            buffered_signals,
            persisted_signals: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CalibrationRates, CooldownWindows, ScoringWeights};
    use crate::scorer::ScoreInputs;
    use crate::types::{BiasKind, Finding, UserResponse};

    use chrono::{Duration, TimeZone as _};

    #[test]
    fn test_stats_reflect_emissions_and_responses() {
        let now = Utc.with_ymd_and_hms(2026, 3, 5, 16, 0, 0).unwrap();
        let mut scorer = InterventionScorer::new(ScoringWeights::default(), CooldownWindows::default());
        let mut calibration = CalibrationLoop::new(CalibrationRates::default());

        let findings = [Finding {
            bias: BiasKind::Overconfidence,
            confidence: 0.9,
            evidence: vec!["3 blind writes".into()],
            suggestion: "Read before editing.".into(),
        }];
        let inputs = ScoreInputs {
            findings: &findings,
            psychology: None,
            topology: None,
            multiplier: calibration.multiplier(),
        };
        let decision = scorer
            .evaluate(&inputs, calibration.preferences(), now)
            .decision
            .unwrap();
        let updated = scorer
            .respond(&decision.id, UserResponse::Acknowledged, now + Duration::seconds(5))
            .unwrap()
            .unwrap();
        calibration.record_response(&updated, UserResponse::Acknowledged, now);

        let stats = InterventionStats::collect(&scorer, &calibration, 7, 2, now + Duration::seconds(10));
        assert_eq!(stats.total_emitted, 1);
        assert_eq!(stats.emitted_last_hour, 1);
        assert_eq!(stats.by_type.get("overconfidence"), Some(&1));
        assert_eq!(stats.acknowledgement_rate, 1.0);
        assert!(stats.preferences.is_effective("overconfidence"));
        assert!(stats.modules.contains_key("overall"));
        assert_eq!(stats.samples_since_recalibration, 1);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["action_history_len"], 7);
        assert!(json["persisted_signals"].is_null());
        assert_eq!(json["preferences"]["preferred_intensity"], "nudge");
    }
}
