//! Configuration for the intervention loop.
//!
//! Every tuning constant lives here and is injected at construction. The shipped
//! defaults keep the intended shape (asymmetric timing thresholds, capped
//! confidences, bounded multipliers); the exact numbers are adjustable from a
//! TOML file where any missing key falls back to its default.

use crate::error::ConfigError;

use serde::{Deserialize, Serialize};

use std::collections::HashMap;
use std::path::Path;

/// Upper bound for any configured window, cooldown or timing threshold (one week).
pub const MAX_WINDOW_SECS: i64 = 7 * 24 * 3600;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct NudgeConfig {
    pub collector: CollectorConfig,
    pub detection: DetectionThresholds,
    pub scoring: ScoringWeights,
    pub cooldowns: CooldownWindows,
    pub calibration: CalibrationRates,
}

impl NudgeConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break the loop's invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit_fields = [
            ("detection.detection_threshold", self.detection.detection_threshold),
            ("detection.max_confidence", self.detection.max_confidence),
            ("detection.overconfidence_blind_ratio", self.detection.overconfidence_blind_ratio),
            ("scoring.flow_suppression", self.scoring.flow_suppression),
            ("scoring.disliked_factor", self.scoring.disliked_factor),
            ("scoring.min_intervention_score", self.scoring.min_intervention_score),
            ("calibration.alpha", self.calibration.alpha),
            ("calibration.accuracy_ceiling", self.calibration.accuracy_ceiling),
            ("calibration.initial_accuracy", self.calibration.initial_accuracy),
        ];
        for (field, value) in unit_fields {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is not within [0, 1]"),
                });
            }
        }

        let bands = &self.scoring.bands;
        let ascending = bands.hint < bands.nudge
            && bands.nudge < bands.suggest
            && bands.suggest < bands.strong
            && bands.strong <= 1.0
            && bands.hint > 0.0;
        if !ascending {
            return Err(ConfigError::Invalid {
                field: "scoring.bands",
                reason: "band thresholds must be strictly ascending within (0, 1]".into(),
            });
        }

        if self.scoring.effective_factor < 1.0 {
            return Err(ConfigError::Invalid {
                field: "scoring.effective_factor",
                reason: "must be at least 1.0".into(),
            });
        }

        let calibration = &self.calibration;
        if !(calibration.multiplier_floor > 0.0
            && calibration.multiplier_floor <= calibration.multiplier_ceiling)
        {
            return Err(ConfigError::Invalid {
                field: "calibration.multiplier_floor",
                reason: "floor must be positive and not above the ceiling".into(),
            });
        }

        if self.cooldowns.max_per_hour == 0 {
            return Err(ConfigError::Invalid {
                field: "cooldowns.max_per_hour",
                reason: "must allow at least one emission per hour".into(),
            });
        }

        let detection = &self.detection;
        let windows = [
            ("detection.sunk_cost_window_secs", detection.sunk_cost_window_secs),
            ("detection.anchoring_window_secs", detection.anchoring_window_secs),
            ("detection.recency_recent_secs", detection.recency_recent_secs),
            ("detection.recency_older_secs", detection.recency_older_secs),
        ];
        for (field, secs) in windows {
            if !(1..=MAX_WINDOW_SECS).contains(&secs) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{secs}s is not within [1, {MAX_WINDOW_SECS}]"),
                });
            }
        }

        let durations = [
            ("detection.paralysis_idle_secs", detection.paralysis_idle_secs),
            ("cooldowns.default_secs", self.cooldowns.default_secs),
        ];
        for (field, secs) in durations {
            if !(0..=MAX_WINDOW_SECS).contains(&secs) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{secs}s is not within [0, {MAX_WINDOW_SECS}]"),
                });
            }
        }
        for (type_key, secs) in &self.cooldowns.per_type_secs {
            if !(0..=MAX_WINDOW_SECS).contains(secs) {
                return Err(ConfigError::Invalid {
                    field: "cooldowns.per_type_secs",
                    reason: format!("{type_key} cooldown {secs}s is not within [0, {MAX_WINDOW_SECS}]"),
                });
            }
        }

        let collector = &self.collector;
        let timings = [
            ("collector.fast_action_secs", collector.fast_action_secs),
            ("collector.slow_action_secs", collector.slow_action_secs),
            ("collector.long_session_secs", collector.long_session_secs),
            ("collector.session_reset_break_secs", collector.session_reset_break_secs),
        ];
        for (field, secs) in timings {
            if !secs.is_finite() || !(0.0..=MAX_WINDOW_SECS as f64).contains(&secs) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{secs}s is not within [0, {MAX_WINDOW_SECS}]"),
                });
            }
        }
        if collector.fast_action_secs >= collector.slow_action_secs {
            return Err(ConfigError::Invalid {
                field: "collector.fast_action_secs",
                reason: "must be below collector.slow_action_secs".into(),
            });
        }

        if self.collector.rolling_window < 3 || self.collector.action_history_cap == 0 {
            return Err(ConfigError::Invalid {
                field: "collector.rolling_window",
                reason: "rolling window must hold at least 3 entries and history must be non-empty"
                    .into(),
            });
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Timing thresholds, window sizes and base confidences for signal collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CollectorConfig {
    /// Gaps shorter than this produce a fast-action signal.
    pub fast_action_secs: f64,
    /// Gaps longer than this produce a slow-action signal.
    pub slow_action_secs: f64,
    /// Session length after which a long-session signal fires (once per session).
    pub long_session_secs: f64,
    /// A break at least this long starts a new session.
    pub session_reset_break_secs: f64,
    /// Size of the rolling tool-name and edited-file windows.
    pub rolling_window: usize,
    /// Maximum retained action records; oldest are evicted.
    pub action_history_cap: usize,
    /// Consecutive failures that upgrade action-failure to repeated-failure.
    pub repeated_failure_count: u32,
    /// Buffered signals that trigger a flush to durable storage.
    pub signal_buffer_max: usize,
    pub fast_action_confidence: f64,
    /// Lower than the fast-action confidence: a slow gap may just be thinking.
    pub slow_action_confidence: f64,
    pub long_session_confidence: f64,
    pub context_switch_confidence: f64,
    pub action_failure_confidence: f64,
    pub repeated_failure_confidence: f64,
    pub git_action_confidence: f64,
    pub break_confidence: f64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            fast_action_secs: 2.0,
            slow_action_secs: 300.0,
            long_session_secs: 5400.0,
            session_reset_break_secs: 900.0,
            rolling_window: 10,
            action_history_cap: 200,
            repeated_failure_count: 3,
            signal_buffer_max: 16,
            fast_action_confidence: 0.6,
            slow_action_confidence: 0.4,
            long_session_confidence: 0.8,
            context_switch_confidence: 0.6,
            action_failure_confidence: 0.5,
            repeated_failure_confidence: 0.85,
            git_action_confidence: 0.7,
            break_confidence: 0.9,
        }
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Shared detection threshold plus per-detector parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct DetectionThresholds {
    /// A finding is only reported at or above this confidence.
    pub detection_threshold: f64,
    /// Upper bound on any detector's confidence.
    pub max_confidence: f64,

    pub sunk_cost_window_secs: i64,
    pub sunk_cost_min_errors: usize,

    pub anchoring_window_secs: i64,
    pub anchoring_min_edits: usize,
    /// Share of edits in the window that one file must account for.
    pub anchoring_edit_share: f64,
    pub anchoring_max_files: usize,

    pub paralysis_min_reads: usize,
    pub paralysis_idle_secs: i64,
    /// Confidence gained per unit of read:write ratio.
    pub paralysis_ratio_slope: f64,

    pub overconfidence_window: usize,
    pub overconfidence_min_blind_writes: usize,
    /// Blind writes over total writes that must be exceeded (φ⁻¹ scale).
    pub overconfidence_blind_ratio: f64,

    pub recency_recent_secs: i64,
    pub recency_older_secs: i64,
    pub recency_min_recent_samples: usize,
    pub recency_min_older_samples: usize,
    pub recency_factor: f64,
    /// Stand-in for a zero older error rate so the factor stays meaningful.
    pub recency_rate_floor: f64,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            detection_threshold: 0.6,
            max_confidence: 0.95,
            sunk_cost_window_secs: 600,
            sunk_cost_min_errors: 3,
            anchoring_window_secs: 3600,
            anchoring_min_edits: 5,
            anchoring_edit_share: 0.6,
            anchoring_max_files: 2,
            paralysis_min_reads: 10,
            paralysis_idle_secs: 600,
            paralysis_ratio_slope: 0.02,
            overconfidence_window: 10,
            overconfidence_min_blind_writes: 3,
            overconfidence_blind_ratio: 0.618,
            recency_recent_secs: 300,
            recency_older_secs: 1800,
            recency_min_recent_samples: 3,
            recency_min_older_samples: 5,
            recency_factor: 3.0,
            recency_rate_floor: 0.05,
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Ascending lower bounds of the hint, nudge, suggest and strong bands.
/// Anything below `hint` is silent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct IntensityBands {
    pub hint: f64,
    pub nudge: f64,
    pub suggest: f64,
    pub strong: f64,
}

impl Default for IntensityBands {
    fn default() -> Self {
        Self {
            hint: 0.3,
            nudge: 0.45,
            suggest: 0.6,
            strong: 0.8,
        }
    }
}

/// Increments and factors used by the intervention scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ScoringWeights {
    /// A psychological composite counts as raised at or above this level.
    pub composite_flag_threshold: f64,
    /// Energy at or below this level counts toward burnout.
    pub low_energy_threshold: f64,
    pub burnout_weight: f64,
    pub frustration_weight: f64,
    pub procrastination_weight: f64,
    pub low_energy_weight: f64,
    /// Multiplied by finding confidence and the calibration multiplier.
    pub finding_weight: f64,
    pub rabbit_hole_weight: f64,
    /// Factor applied to the whole score while in flow.
    pub flow_suppression: f64,
    pub disliked_factor: f64,
    pub effective_factor: f64,
    pub min_intervention_score: f64,
    pub bands: IntensityBands,
    /// Retained emission history length.
    pub history_cap: usize,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            composite_flag_threshold: 0.6,
            low_energy_threshold: 0.3,
            burnout_weight: 0.4,
            frustration_weight: 0.3,
            procrastination_weight: 0.25,
            low_energy_weight: 0.15,
            finding_weight: 0.5,
            rabbit_hole_weight: 0.35,
            flow_suppression: 0.05,
            disliked_factor: 0.5,
            effective_factor: 1.2,
            min_intervention_score: 0.3,
            bands: IntensityBands::default(),
            history_cap: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// Cooldowns
// ---------------------------------------------------------------------------

/// Per-type cooldowns and the hourly emission cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CooldownWindows {
    pub default_secs: i64,
    /// Overrides keyed by intervention type key (e.g. `"burnout"`).
    pub per_type_secs: HashMap<String, i64>,
    pub max_per_hour: usize,
}

impl Default for CooldownWindows {
    fn default() -> Self {
        Self {
            default_secs: 900,
            per_type_secs: HashMap::from([
                ("burnout".to_string(), 1800),
                ("rabbit_hole".to_string(), 1200),
            ]),
            max_per_hour: 4,
        }
    }
}

impl CooldownWindows {
    pub fn window_secs(&self, type_key: &str) -> i64 {
        self.per_type_secs
            .get(type_key)
            .copied()
            .unwrap_or(self.default_secs)
    }
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

/// Rates and bounds for the calibration loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CalibrationRates {
    /// Exponential moving average rate.
    pub alpha: f64,
    /// Maximum trustworthy confidence; accuracy never exceeds it.
    pub accuracy_ceiling: f64,
    pub initial_accuracy: f64,
    /// Samples required since the last recalibration before the multiplier moves.
    pub min_samples_for_recalibration: u64,
    /// Multiplier change per unit of distance from the 0.5 midpoint.
    pub adjustment_rate: f64,
    pub multiplier_floor: f64,
    pub multiplier_ceiling: f64,
    /// Negative responses for one type within the window that mark it disliked.
    pub ignore_threshold: usize,
    /// Number of most recent responses considered for the disliked rule.
    pub response_window: usize,
}

impl Default for CalibrationRates {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            accuracy_ceiling: 0.9,
            initial_accuracy: 0.5,
            min_samples_for_recalibration: 10,
            adjustment_rate: 0.4,
            multiplier_floor: 0.3,
            multiplier_ceiling: 1.0,
            ignore_threshold: 3,
            response_window: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        NudgeConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config = NudgeConfig::from_toml(
            r#"
            [cooldowns]
            max_per_hour = 2

            [detection]
            detection_threshold = 0.7
            "#,
        )
        .unwrap();
        assert_eq!(config.cooldowns.max_per_hour, 2);
        assert_eq!(config.cooldowns.default_secs, 900);
        assert!((config.detection.detection_threshold - 0.7).abs() < 1e-9);
        assert_eq!(config.collector.rolling_window, 10);
    }

    #[test]
    fn test_inverted_bands_are_rejected() {
        let mut config = NudgeConfig::default();
        config.scoring.bands.suggest = 0.9;
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("scoring.bands"));
    }

    #[test]
    fn test_out_of_range_threshold_is_rejected() {
        let error = NudgeConfig::from_toml("[calibration]\naccuracy_ceiling = 1.5\n").unwrap_err();
        assert!(error.to_string().contains("calibration.accuracy_ceiling"));
    }

    #[test]
    fn test_zero_rate_limit_is_rejected() {
        let mut config = NudgeConfig::default();
        config.cooldowns.max_per_hour = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_detection_window_is_rejected() {
        let error = NudgeConfig::from_toml("[detection]\nsunk_cost_window_secs = 9223372036854775807\n")
            .unwrap_err();
        assert!(error.to_string().contains("detection.sunk_cost_window_secs"));
    }

    #[test]
    fn test_every_detection_window_is_bounded() {
        let cases: [(&str, fn(&mut DetectionThresholds, i64)); 4] = [
            ("detection.sunk_cost_window_secs", |d, v| d.sunk_cost_window_secs = v),
            ("detection.anchoring_window_secs", |d, v| d.anchoring_window_secs = v),
            ("detection.recency_recent_secs", |d, v| d.recency_recent_secs = v),
            ("detection.recency_older_secs", |d, v| d.recency_older_secs = v),
        ];
        for (field, set) in cases {
            for value in [0, -5, MAX_WINDOW_SECS + 1] {
                let mut config = NudgeConfig::default();
                set(&mut config.detection, value);
                let error = config.validate().unwrap_err();
                assert!(error.to_string().contains(field), "{field} = {value}");
            }
            let mut config = NudgeConfig::default();
            set(&mut config.detection, MAX_WINDOW_SECS);
            config.validate().unwrap();
        }
    }

    #[test]
    fn test_paralysis_idle_must_be_in_range() {
        let mut config = NudgeConfig::default();
        config.detection.paralysis_idle_secs = -1;
        assert!(config.validate().unwrap_err().to_string().contains("paralysis_idle_secs"));

        config.detection.paralysis_idle_secs = MAX_WINDOW_SECS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_cooldowns_are_rejected() {
        let mut config = NudgeConfig::default();
        config.cooldowns.default_secs = -60;
        assert!(config.validate().unwrap_err().to_string().contains("cooldowns.default_secs"));

        let mut config = NudgeConfig::default();
        config.cooldowns.per_type_secs.insert("anchoring".into(), -1);
        let error = config.validate().unwrap_err().to_string();
        assert!(error.contains("cooldowns.per_type_secs"));
        assert!(error.contains("anchoring"));

        let mut config = NudgeConfig::default();
        config.cooldowns.per_type_secs.insert("anchoring".into(), i64::MAX);
        assert!(config.validate().is_err());

        // Zero disables a cooldown and stays valid.
        let mut config = NudgeConfig::default();
        config.cooldowns.default_secs = 0;
        config.validate().unwrap();
    }

    #[test]
    fn test_collector_timings_are_bounded() {
        let cases: [(&str, fn(&mut CollectorConfig, f64)); 4] = [
            ("collector.fast_action_secs", |c, v| c.fast_action_secs = v),
            ("collector.slow_action_secs", |c, v| c.slow_action_secs = v),
            ("collector.long_session_secs", |c, v| c.long_session_secs = v),
            ("collector.session_reset_break_secs", |c, v| c.session_reset_break_secs = v),
        ];
        for (field, set) in cases {
            for value in [-1.0, f64::NAN, f64::INFINITY, MAX_WINDOW_SECS as f64 + 1.0] {
                let mut config = NudgeConfig::default();
                set(&mut config.collector, value);
                let error = config.validate().unwrap_err();
                assert!(error.to_string().contains(field), "{field} = {value}");
            }
        }

        let mut config = NudgeConfig::default();
        config.collector.fast_action_secs = 400.0;
        assert!(config.validate().unwrap_err().to_string().contains("fast_action_secs"));
    }

    #[test]
    fn test_per_type_cooldown_override() {
        let windows = CooldownWindows::default();
        assert_eq!(windows.window_secs("burnout"), 1800);
        assert_eq!(windows.window_secs("anchoring"), 900);
    }
}
