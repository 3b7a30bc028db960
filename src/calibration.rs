//! Online calibration of module accuracy, the global confidence multiplier
//! and the user's preference profile.
//!
//! Outcomes update per-module accuracy through an exponential moving average
//! capped at the configured ceiling. The global multiplier only moves in
//! batches, once enough samples have accumulated since the last adjustment.
//! User responses feed the preference lists the scorer reads back.

use crate::config::CalibrationRates;
use crate::types::{
    IntensityLevel, InterventionDecision, ModuleCalibration, PreferenceProfile, UserResponse,
    clamp_unit,
};

use chrono::{DateTime, Utc};

use std::collections::{BTreeMap, VecDeque};

/// Module that aggregates every outcome.
pub const OVERALL_MODULE: &str = "overall";

/// Accuracy midpoint the multiplier is steered around.
const NEUTRAL_ACCURACY: f64 = 0.5;

/// What a single response changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseEffect {
    pub preferences_changed: bool,
    /// New multiplier if this response completed a recalibration batch.
    pub recalibrated: Option<f64>,
}

/// Persisted shape of the calibration partition.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSnapshot {
    pub modules: BTreeMap<String, ModuleCalibration>,
    pub multiplier: f64,
    pub samples_since_recalibration: u64,
    pub preferences: PreferenceProfile,
    /// Most recent responses, oldest first, keyed by intervention type.
    pub recent_responses: Vec<(String, UserResponse)>,
}

#[derive(Debug, Clone)]
pub struct CalibrationLoop {
    rates: CalibrationRates,
    modules: BTreeMap<String, ModuleCalibration>,
    multiplier: f64,
    samples_since_recalibration: u64,
    preferences: PreferenceProfile,
    recent_responses: VecDeque<(String, UserResponse)>,
}

impl CalibrationLoop {
    pub fn new(rates: CalibrationRates) -> Self {
        let multiplier = rates.multiplier_ceiling;
        Self {
            rates,
            modules: BTreeMap::new(),
            multiplier,
            samples_since_recalibration: 0,
            preferences: PreferenceProfile::default(),
            recent_responses: VecDeque::new(),
        }
    }

    /// Rebuild from a persisted snapshot. The multiplier is clamped to the
    /// current floor and ceiling, and the response log to the current window.
    pub fn restore(rates: CalibrationRates, snapshot: CalibrationSnapshot) -> Self {
        let mut calibration = Self {
            multiplier: snapshot
                .multiplier
                .clamp(rates.multiplier_floor, rates.multiplier_ceiling),
            modules: snapshot.modules,
            samples_since_recalibration: snapshot.samples_since_recalibration,
            preferences: snapshot.preferences,
            recent_responses: snapshot.recent_responses.into(),
            rates,
        };
        calibration.trim_responses();
        calibration
    }

    /// Everything the store persists for this partition.
    pub fn snapshot(&self) -> CalibrationSnapshot {
        CalibrationSnapshot {
            modules: self.modules.clone(),
            multiplier: self.multiplier,
            samples_since_recalibration: self.samples_since_recalibration,
            preferences: self.preferences.clone(),
            recent_responses: self.recent_responses.iter().cloned().collect(),
        }
    }

    /// Record whether `module`'s prediction was correct.
    ///
    /// Returns the new multiplier when this sample completed a batch.
    pub fn record_outcome(&mut self, module: &str, correct: bool, at: DateTime<Utc>) -> Option<f64> {
        self.update_module(module, correct, at);
        if module != OVERALL_MODULE {
            self.update_module(OVERALL_MODULE, correct, at);
        }

        self.samples_since_recalibration += 1;
        if self.samples_since_recalibration < self.rates.min_samples_for_recalibration {
            return None;
        }
        Some(self.recalibrate())
    }

    /// Fold a user response into the preference profile and module accuracy.
    ///
    /// Callers are responsible for only passing a response once per decision.
    pub fn record_response(
        &mut self,
        decision: &InterventionDecision,
        response: UserResponse,
        at: DateTime<Utc>,
    ) -> ResponseEffect {
        let key = decision.intervention_type.key();
        self.recent_responses.push_back((key.to_string(), response));
        self.trim_responses();

        let preferences_changed = match response {
            UserResponse::Acknowledged => {
                let mut changed = promote(&mut self.preferences.effective_types, key);
                changed |= demote(&mut self.preferences.disliked_types, key);
                if decision.intensity != IntensityLevel::Silent
                    && self.preferences.preferred_intensity != decision.intensity
                {
                    self.preferences.preferred_intensity = decision.intensity;
                    changed = true;
                }
                changed
            }
            UserResponse::Ignored | UserResponse::Dismissed => {
                let negatives = self
                    .recent_responses
                    .iter()
                    .filter(|(entry, response)| entry == key && response.is_negative())
                    .count();
                if negatives >= self.rates.ignore_threshold {
                    let changed = promote(&mut self.preferences.disliked_types, key);
                    if changed {
                        tracing::info!(kind = key, negatives, "intervention type marked disliked");
                    }
                    changed | demote(&mut self.preferences.effective_types, key)
                } else {
                    false
                }
            }
        };

        let recalibrated = self.record_outcome(key, response == UserResponse::Acknowledged, at);
        ResponseEffect {
            preferences_changed,
            recalibrated,
        }
    }

    /// Global confidence multiplier applied to every finding, within the
    /// configured floor and ceiling.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// The learned preference profile the scorer weighs types by.
    pub fn preferences(&self) -> &PreferenceProfile {
        &self.preferences
    }

    /// Per-module accuracy, including the `overall` aggregate.
    pub fn modules(&self) -> &BTreeMap<String, ModuleCalibration> {
        &self.modules
    }

    /// Outcomes recorded since the multiplier last moved.
    pub fn samples_since_recalibration(&self) -> u64 {
        self.samples_since_recalibration
    }

    fn update_module(&mut self, module: &str, correct: bool, at: DateTime<Utc>) {
        let rates = &self.rates;
        let entry = self
            .modules
            .entry(module.to_string())
            .or_insert_with(|| ModuleCalibration {
                correct: 0,
                total: 0,
                accuracy: rates.initial_accuracy.min(rates.accuracy_ceiling),
                last_updated: at,
            });

        entry.total += 1;
        if correct {
            entry.correct += 1;
        }
        let ratio = entry.correct as f64 / entry.total as f64;
        let smoothed = entry.accuracy * (1.0 - rates.alpha) + ratio * rates.alpha;
        entry.accuracy = clamp_unit(smoothed).min(rates.accuracy_ceiling);
        entry.last_updated = at;
    }

    fn recalibrate(&mut self) -> f64 {
        let overall = self
            .modules
            .get(OVERALL_MODULE)
            .map(|module| module.accuracy)
            .unwrap_or(NEUTRAL_ACCURACY);
        let adjustment = (overall - NEUTRAL_ACCURACY) * self.rates.adjustment_rate;
        let previous = self.multiplier;
        self.multiplier = (previous + adjustment)
            .clamp(self.rates.multiplier_floor, self.rates.multiplier_ceiling);
        self.samples_since_recalibration = 0;

        tracing::info!(
            overall_accuracy = overall,
            previous,
            multiplier = self.multiplier,
            "confidence multiplier recalibrated"
        );
        self.multiplier
    }

    fn trim_responses(&mut self) {
        while self.recent_responses.len() > self.rates.response_window {
            self.recent_responses.pop_front();
        }
    }
}

/// Add `key` to `list` if missing.
fn promote(list: &mut Vec<String>, key: &str) -> bool {
    if list.iter().any(|entry| entry == key) {
        return false;
    }
    list.push(key.to_string());
    true
}

/// Remove `key` from `list` if present.
fn demote(list: &mut Vec<String>, key: &str) -> bool {
    let before = list.len();
    list.retain(|entry| entry != key);
    list.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BiasKind, InterventionType};

    use chrono::{Duration, TimeZone as _};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 3, 10, 0, 0).unwrap()
    }

    fn decision(kind: InterventionType, intensity: IntensityLevel) -> InterventionDecision {
        InterventionDecision {
            id: uuid::Uuid::new_v4().to_string(),
            intervention_type: kind,
            intensity,
            score: 0.5,
            reasons: Vec::new(),
            message: "step back".into(),
            created_at: base(),
            response: None,
            response_latency_secs: None,
        }
    }

    fn anchoring() -> InterventionType {
        InterventionType::Bias(BiasKind::Anchoring)
    }

    // -----------------------------------------------------------------------
    // Accuracy
    // -----------------------------------------------------------------------

    #[test]
    fn test_accuracy_never_exceeds_ceiling() {
        let rates = CalibrationRates::default();
        let ceiling = rates.accuracy_ceiling;
        let mut calibration = CalibrationLoop::new(rates);
        for step in 0..200 {
            calibration.record_outcome("anchoring", step % 7 != 0, base());
            for module in calibration.modules().values() {
                assert!(module.accuracy >= 0.0);
                assert!(module.accuracy <= ceiling);
            }
        }
        let anchoring = calibration.modules.get("anchoring").unwrap();
        assert_eq!(anchoring.total, 200);
        assert!(anchoring.accuracy > 0.8);
    }

    #[test]
    fn test_ema_moves_toward_observed_ratio() {
        let mut calibration = CalibrationLoop::new(CalibrationRates::default());
        calibration.record_outcome("sunk_cost", true, base());
        // 0.5 * 0.8 + 1.0 * 0.2
        let accuracy = calibration.modules.get("sunk_cost").unwrap().accuracy;
        assert!((accuracy - 0.6).abs() < 1e-9);

        calibration.record_outcome("sunk_cost", false, base());
        // 0.6 * 0.8 + 0.5 * 0.2
        let accuracy = calibration.modules.get("sunk_cost").unwrap().accuracy;
        assert!((accuracy - 0.58).abs() < 1e-9);
    }

    #[test]
    fn test_overall_module_aggregates_every_outcome() {
        let mut calibration = CalibrationLoop::new(CalibrationRates::default());
        calibration.record_outcome("sunk_cost", true, base());
        calibration.record_outcome("anchoring", false, base());
        let overall = calibration.modules.get(OVERALL_MODULE).unwrap();
        assert_eq!(overall.total, 2);
        assert_eq!(overall.correct, 1);
    }

    // -----------------------------------------------------------------------
    // Multiplier
    // -----------------------------------------------------------------------

    #[test]
    fn test_multiplier_only_moves_after_a_full_batch() {
        let mut calibration = CalibrationLoop::new(CalibrationRates::default());
        for _ in 0..9 {
            assert_eq!(calibration.record_outcome("anchoring", false, base()), None);
        }
        assert_eq!(calibration.multiplier(), 1.0);

        let updated = calibration.record_outcome("anchoring", false, base()).unwrap();
        assert!(updated < 1.0);
        assert_eq!(calibration.samples_since_recalibration(), 0);
    }

    #[test]
    fn test_multiplier_stays_within_floor_and_ceiling() {
        let rates = CalibrationRates::default();
        let (floor, ceiling) = (rates.multiplier_floor, rates.multiplier_ceiling);
        let mut calibration = CalibrationLoop::new(rates);
        for _ in 0..500 {
            calibration.record_outcome("overconfidence", false, base());
            assert!(calibration.multiplier() >= floor);
        }
        assert!((calibration.multiplier() - floor).abs() < 1e-9);

        for _ in 0..1000 {
            calibration.record_outcome("overconfidence", true, base());
            assert!(calibration.multiplier() <= ceiling);
        }
        assert!(calibration.multiplier() > floor);
    }

    // -----------------------------------------------------------------------
    // Preferences
    // -----------------------------------------------------------------------

    #[test]
    fn test_acknowledged_marks_type_effective() {
        let mut calibration = CalibrationLoop::new(CalibrationRates::default());
        let decision = decision(anchoring(), IntensityLevel::Suggest);
        let effect = calibration.record_response(&decision, UserResponse::Acknowledged, base());
        assert!(effect.preferences_changed);
        assert!(calibration.preferences().is_effective("anchoring"));
        assert_eq!(calibration.preferences().preferred_intensity, IntensityLevel::Suggest);

        let again = calibration.record_response(&decision, UserResponse::Acknowledged, base());
        assert!(!again.preferences_changed);
        assert_eq!(calibration.preferences().effective_types.len(), 1);
    }

    #[test]
    fn test_repeated_ignores_mark_type_disliked() {
        let mut calibration = CalibrationLoop::new(CalibrationRates::default());
        let others = [
            InterventionType::Burnout,
            InterventionType::Frustration,
            InterventionType::Bias(BiasKind::SunkCost),
            InterventionType::RabbitHole,
        ];
        for step in 0..20 {
            let other = decision(others[step % others.len()], IntensityLevel::Nudge);
            calibration.record_response(&other, UserResponse::Ignored, base());
        }
        assert!(!calibration.preferences().is_disliked("anchoring"));

        for step in 0..3 {
            let effect = calibration.record_response(
                &decision(anchoring(), IntensityLevel::Nudge),
                UserResponse::Ignored,
                base() + Duration::seconds(step),
            );
            assert_eq!(effect.preferences_changed, step == 2);
        }
        assert!(calibration.preferences().is_disliked("anchoring"));
    }

    #[test]
    fn test_dismissals_count_as_negative() {
        let mut calibration = CalibrationLoop::new(CalibrationRates::default());
        calibration.record_response(&decision(anchoring(), IntensityLevel::Hint), UserResponse::Ignored, base());
        calibration.record_response(&decision(anchoring(), IntensityLevel::Hint), UserResponse::Dismissed, base());
        calibration.record_response(&decision(anchoring(), IntensityLevel::Hint), UserResponse::Dismissed, base());
        assert!(calibration.preferences().is_disliked("anchoring"));
    }

    #[test]
    fn test_effective_and_disliked_are_exclusive() {
        let mut calibration = CalibrationLoop::new(CalibrationRates::default());
        calibration.record_response(&decision(anchoring(), IntensityLevel::Nudge), UserResponse::Acknowledged, base());
        for _ in 0..3 {
            calibration.record_response(&decision(anchoring(), IntensityLevel::Nudge), UserResponse::Ignored, base());
        }
        let preferences = calibration.preferences();
        assert!(preferences.is_disliked("anchoring"));
        assert!(!preferences.is_effective("anchoring"));

        calibration.record_response(&decision(anchoring(), IntensityLevel::Nudge), UserResponse::Acknowledged, base());
        let preferences = calibration.preferences();
        assert!(preferences.is_effective("anchoring"));
        assert!(!preferences.is_disliked("anchoring"));
    }

    #[test]
    fn test_ignores_outside_response_window_do_not_count() {
        let mut calibration = CalibrationLoop::new(CalibrationRates::default());
        for _ in 0..2 {
            calibration.record_response(&decision(anchoring(), IntensityLevel::Nudge), UserResponse::Ignored, base());
        }
        for _ in 0..10 {
            calibration.record_response(
                &decision(InterventionType::Burnout, IntensityLevel::Nudge),
                UserResponse::Acknowledged,
                base(),
            );
        }
        calibration.record_response(&decision(anchoring(), IntensityLevel::Nudge), UserResponse::Ignored, base());
        assert!(!calibration.preferences().is_disliked("anchoring"));
    }

    #[test]
    fn test_snapshot_restores_equivalent_state() {
        let mut calibration = CalibrationLoop::new(CalibrationRates::default());
        for step in 0..12 {
            calibration.record_response(
                &decision(anchoring(), IntensityLevel::Nudge),
                if step % 3 == 0 { UserResponse::Acknowledged } else { UserResponse::Ignored },
                base(),
            );
        }
        let snapshot = calibration.snapshot();
        let restored = CalibrationLoop::restore(CalibrationRates::default(), snapshot.clone());
        assert_eq!(restored.snapshot(), snapshot);
    }
}
