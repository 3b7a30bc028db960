//! Intervention scoring with preference adjustment and emission gates.
//!
//! Findings, psychological composite flags and topology flags are fused into a
//! single score in `[0.0, 1.0]`. The first contributor fixes the intervention
//! type and its default message; later contributors only add to the score.
//! Flow suppresses the whole score multiplicatively, preferences scale it,
//! and only then is the score mapped to an intensity band. A decision is
//! emitted only when it clears the minimum score, the per-type cooldown and
//! the hourly cap.

use crate::config::{CooldownWindows, IntensityBands, ScoringWeights};
use crate::cooldowns::{CooldownTracker, GateRejection};
use crate::error::{NudgeError, Result};
use crate::types::{
    Finding, IntensityLevel, InterventionDecision, InterventionType, PreferenceProfile,
    UserResponse, clamp_unit,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, VecDeque};

// ---------------------------------------------------------------------------
// Input types
// ---------------------------------------------------------------------------

/// Psychological composite flags supplied by an external collaborator.
/// Every field is optional; absent fields contribute nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PsychologyComposite {
    pub burnout_risk: Option<f64>,
    pub flow: Option<bool>,
    pub frustration: Option<f64>,
    pub energy: Option<f64>,
    pub procrastination: Option<f64>,
}

impl PsychologyComposite {
    pub fn in_flow(&self) -> bool {
        self.flow.unwrap_or(false)
    }
}

/// A rabbit-hole flag from the topology collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RabbitHole {
    /// What kind of rabbit hole (e.g. "dependency_chase").
    pub kind: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyFlags {
    pub rabbit_hole: Option<RabbitHole>,
}

/// Everything one scoring pass reads.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs<'a> {
    pub findings: &'a [Finding],
    pub psychology: Option<&'a PsychologyComposite>,
    pub topology: Option<&'a TopologyFlags>,
    /// Global confidence multiplier from the calibration loop.
    pub multiplier: f64,
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// A scored but not yet gated intervention candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDecision {
    /// `None` when nothing contributed.
    pub intervention_type: Option<InterventionType>,
    /// Message of the first contributor, before band formatting.
    pub base_message: String,
    /// Clamped additive sum before flow and preferences.
    pub raw_score: f64,
    /// Final score after flow suppression and preference adjustment.
    pub score: f64,
    pub intensity: IntensityLevel,
    pub reasons: Vec<String>,
}

/// Result of scoring plus gating.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub scored: ScoredDecision,
    pub decision: Option<InterventionDecision>,
    pub rejection: Option<GateRejection>,
}

/// Emission counters, kept independent of the bounded history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmissionCounts {
    pub total: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_intensity: BTreeMap<String, u64>,
    /// Recorded responses keyed by response label.
    pub responses: BTreeMap<String, u64>,
}

impl EmissionCounts {
    /// Count an emitted decision under its type and band.
    pub fn record(&mut self, decision: &InterventionDecision) {
        self.total += 1;
        *self
            .by_type
            .entry(decision.intervention_type.key().to_string())
            .or_default() += 1;
        *self
            .by_intensity
            .entry(decision.intensity.to_string())
            .or_default() += 1;
    }

    pub fn record_response(&mut self, response: UserResponse) {
        *self.responses.entry(response.to_string()).or_default() += 1;
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Scores candidates, applies the gates and keeps the emission history.
#[derive(Debug, Clone)]
pub struct InterventionScorer {
    weights: ScoringWeights,
    windows: CooldownWindows,
    cooldowns: CooldownTracker,
    history: VecDeque<InterventionDecision>,
    counts: EmissionCounts,
}

impl InterventionScorer {
    pub fn new(weights: ScoringWeights, windows: CooldownWindows) -> Self {
        Self {
            weights,
            windows,
            cooldowns: CooldownTracker::new(),
            history: VecDeque::new(),
            counts: EmissionCounts::default(),
        }
    }

    /// Rebuild from persisted state. `history` is oldest first.
    pub fn restore(
        weights: ScoringWeights,
        windows: CooldownWindows,
        cooldowns: CooldownTracker,
        history: Vec<InterventionDecision>,
        counts: EmissionCounts,
    ) -> Self {
        let mut scorer = Self {
            weights,
            windows,
            cooldowns,
            history: history.into(),
            counts,
        };
        while scorer.history.len() > scorer.weights.history_cap {
            scorer.history.pop_front();
        }
        scorer
    }

    /// Fuse all inputs into one score and band. Pure; does not gate.
    pub fn score(&self, inputs: &ScoreInputs<'_>, preferences: &PreferenceProfile) -> ScoredDecision {
        let weights = &self.weights;
        let mut fused = Fusion::default();

        if let Some(psychology) = inputs.psychology {
            if let Some(risk) = psychology.burnout_risk.filter(|risk| *risk >= weights.composite_flag_threshold) {
                fused.add(
                    InterventionType::Burnout,
                    weights.burnout_weight,
                    format!("burnout risk {risk:.2}"),
                    "You've been at this a long time. A short break now will pay for itself.",
                );
            }
            if let Some(level) = psychology.frustration.filter(|level| *level >= weights.composite_flag_threshold) {
                fused.add(
                    InterventionType::Frustration,
                    weights.frustration_weight,
                    format!("frustration {level:.2}"),
                    "This looks frustrating. Step back and restate the problem in one sentence.",
                );
            }
            if let Some(level) = psychology
                .procrastination
                .filter(|level| *level >= weights.composite_flag_threshold)
            {
                fused.add(
                    InterventionType::Procrastination,
                    weights.procrastination_weight,
                    format!("procrastination {level:.2}"),
                    "Pick the smallest next step on the main task and do just that.",
                );
            }
            if let Some(energy) = psychology.energy.filter(|energy| *energy <= weights.low_energy_threshold) {
                fused.add(
                    InterventionType::Burnout,
                    weights.low_energy_weight,
                    format!("low energy {energy:.2}"),
                    "Energy looks low. Consider a pause before the next hard problem.",
                );
            }
        }

        let multiplier = if inputs.multiplier.is_finite() {
            inputs.multiplier.max(0.0)
        } else {
            1.0
        };
        for finding in inputs.findings {
            let increment = finding.confidence * weights.finding_weight * multiplier;
            let evidence = finding.evidence.first().map(String::as_str).unwrap_or("no evidence");
            fused.add(
                InterventionType::Bias(finding.bias),
                increment,
                format!("{} {:.2}: {evidence}", finding.bias, finding.confidence),
                &finding.suggestion,
            );
        }

        if let Some(rabbit_hole) = inputs.topology.and_then(|topology| topology.rabbit_hole.as_ref()) {
            fused.add(
                InterventionType::RabbitHole,
                weights.rabbit_hole_weight,
                format!("rabbit hole: {}", rabbit_hole.kind),
                &rabbit_hole.suggestion,
            );
        }

        let raw_score = clamp_unit(fused.score);
        let mut score = raw_score;
        let mut reasons = fused.reasons;

        if inputs.psychology.is_some_and(PsychologyComposite::in_flow) {
            score *= weights.flow_suppression;
            reasons.push("in flow: score suppressed".to_string());
        }

        if let Some((kind, _)) = &fused.primary {
            let key = kind.key();
            if preferences.is_disliked(key) {
                score *= weights.disliked_factor;
                reasons.push(format!("{key} is disliked"));
            } else if preferences.is_effective(key) {
                score *= weights.effective_factor;
                reasons.push(format!("{key} has been effective"));
            }
        }
        let score = clamp_unit(score);

        let (intervention_type, base_message) = match fused.primary {
            Some((kind, message)) => (Some(kind), message),
            None => (None, String::new()),
        };
        ScoredDecision {
            intervention_type,
            base_message,
            raw_score,
            score,
            intensity: intensity_for(score, &weights.bands),
            reasons,
        }
    }

    /// Run the gates in order: threshold, cooldown, hourly cap.
    pub fn check_gates(&self, scored: &ScoredDecision, now: DateTime<Utc>) -> Option<GateRejection> {
        let Some(kind) = scored.intervention_type else {
            return Some(GateRejection::NoContributor);
        };

        let threshold = self.weights.min_intervention_score;
        if scored.score < threshold || scored.intensity == IntensityLevel::Silent {
            return Some(GateRejection::BelowThreshold {
                score: scored.score,
                threshold: threshold.max(self.weights.bands.hint),
            });
        }

        self.cooldowns.check(kind.key(), now, &self.windows)
    }

    /// Record a decision that passed every gate. Callers must have run
    /// `check_gates` under the same borrow.
    fn commit(&mut self, scored: &ScoredDecision, kind: InterventionType, now: DateTime<Utc>) -> InterventionDecision {
        let decision = InterventionDecision {
            id: uuid::Uuid::new_v4().to_string(),
            intervention_type: kind,
            intensity: scored.intensity,
            score: scored.score,
            reasons: scored.reasons.clone(),
            message: scored.intensity.format_message(&scored.base_message),
            created_at: now,
            response: None,
            response_latency_secs: None,
        };

        self.cooldowns.record_emission(kind.key(), now);
        self.counts.record(&decision);
        self.history.push_back(decision.clone());
        while self.history.len() > self.weights.history_cap {
            self.history.pop_front();
        }

        tracing::info!(
            id = %decision.id,
            kind = %kind,
            intensity = %decision.intensity,
            score = decision.score,
            "intervention emitted"
        );
        decision
    }

    /// Score, gate and, if every gate passes, emit.
    pub fn evaluate(
        &mut self,
        inputs: &ScoreInputs<'_>,
        preferences: &PreferenceProfile,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let scored = self.score(inputs, preferences);
        match (self.check_gates(&scored, now), scored.intervention_type) {
            (None, Some(kind)) => {
                let decision = self.commit(&scored, kind, now);
                Evaluation {
                    scored,
                    decision: Some(decision),
                    rejection: None,
                }
            }
            (rejection, _) => {
                let rejection = rejection.unwrap_or(GateRejection::NoContributor);
                tracing::debug!(%rejection, score = scored.score, "intervention gated");
                Evaluation {
                    scored,
                    decision: None,
                    rejection: Some(rejection),
                }
            }
        }
    }

    /// Attach a response to a decision in the retained history.
    ///
    /// Returns the updated decision, or `None` when the identical response was
    /// already recorded.
    pub fn respond(
        &mut self,
        id: &str,
        response: UserResponse,
        at: DateTime<Utc>,
    ) -> Result<Option<InterventionDecision>> {
        let decision = self
            .history
            .iter_mut()
            .find(|decision| decision.id == id)
            .ok_or_else(|| NudgeError::UnknownDecision(id.to_string()))?;
        if !apply_response(decision, response, at)? {
            return Ok(None);
        }
        let updated = decision.clone();
        self.counts.record_response(response);
        Ok(Some(updated))
    }

    /// Count a response applied to a decision no longer in the retained
    /// history.
    pub fn note_response(&mut self, response: UserResponse) {
        self.counts.record_response(response);
    }

    /// A decision still held in the in-memory history.
    pub fn find(&self, id: &str) -> Option<&InterventionDecision> {
        self.history.iter().find(|decision| decision.id == id)
    }

    /// Emission and response totals since the state was first created.
    pub fn counts(&self) -> &EmissionCounts {
        &self.counts
    }

    /// Cooldown timestamps and the trailing-hour emission log.
    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }
}

/// Set the response on a decision exactly once.
///
/// Returns `Ok(true)` when the response was applied, `Ok(false)` when the same
/// response was already present, and `ResponseConflict` when a different one
/// was.
pub fn apply_response(
    decision: &mut InterventionDecision,
    response: UserResponse,
    at: DateTime<Utc>,
) -> Result<bool> {
    match decision.response {
        Some(existing) if existing == response => Ok(false),
        Some(existing) => Err(NudgeError::ResponseConflict {
            id: decision.id.clone(),
            existing: existing.to_string(),
        }),
        None => {
            let latency_ms = (at - decision.created_at).num_milliseconds().max(0);
            decision.response = Some(response);
            decision.response_latency_secs = Some(latency_ms as f64 / 1000.0);
            Ok(true)
        }
    }
}

/// Map a score onto the ascending band thresholds.
pub fn intensity_for(score: f64, bands: &IntensityBands) -> IntensityLevel {
    if score >= bands.strong {
        IntensityLevel::Strong
    } else if score >= bands.suggest {
        IntensityLevel::Suggest
    } else if score >= bands.nudge {
        IntensityLevel::Nudge
    } else if score >= bands.hint {
        IntensityLevel::Hint
    } else {
        IntensityLevel::Silent
    }
}

/// Running additive sum; the first contributor wins the type and message.
#[derive(Default)]
struct Fusion {
    score: f64,
    primary: Option<(InterventionType, String)>,
    reasons: Vec<String>,
}

impl Fusion {
    fn add(&mut self, kind: InterventionType, increment: f64, reason: String, message: &str) {
        let increment = if increment.is_finite() { increment.max(0.0) } else { 0.0 };
        self.score += increment;
        self.reasons.push(format!("{reason} (+{increment:.2})"));
        if self.primary.is_none() {
            self.primary = Some((kind, message.to_string()));
        }
    }
}
