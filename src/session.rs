//! Session: the context object that wires the collector, detectors, scorer
//! and calibration loop together.
//!
//! Each state partition sits behind its own mutex so concurrent callers are
//! serialized per partition. Locks are always taken in the order collector,
//! scorer, calibration. Durable writes happen while the owning partition's
//! lock is held, so memory and storage advance in the same order. A failed
//! write never fails the call: it comes back as a [`PersistenceWarning`] and
//! the in-memory state stays authoritative.

use crate::calibration::CalibrationLoop;
use crate::collector::{BehaviorEvent, EventFamily, SignalCollector};
use crate::config::NudgeConfig;
use crate::cooldowns::{CooldownTracker, GateRejection};
use crate::detectors::run_detectors;
use crate::error::{NudgeError, Result};
use crate::scorer::{
    InterventionScorer, PsychologyComposite, ScoreInputs, TopologyFlags, apply_response,
};
use crate::stats::InterventionStats;
use crate::store::StateStore;
use crate::types::{
    ActionRecord, BiasKind, Finding, InterventionDecision, PreferenceProfile, Signal,
    UserResponse,
};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Collaborator seams
// ---------------------------------------------------------------------------

/// Supplies the psychological composite for an evaluation pass.
pub trait PsychologySource: Send + Sync {
    fn composite(&self) -> anyhow::Result<PsychologyComposite>;
}

/// Supplies topology flags (rabbit holes) for an evaluation pass.
pub trait TopologySource: Send + Sync {
    fn flags(&self) -> anyhow::Result<TopologyFlags>;
}

/// Downstream consumer of collected signals.
pub trait SignalSink: Send + Sync {
    fn deliver(&self, signals: &[Signal]) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Durable state partition named in a persistence warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatePartition {
    ActionHistory,
    SignalBuffer,
    Interventions,
    Calibration,
}

impl fmt::Display for StatePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActionHistory => write!(f, "action_history"),
            Self::SignalBuffer => write!(f, "signal_buffer"),
            Self::Interventions => write!(f, "interventions"),
            Self::Calibration => write!(f, "calibration"),
        }
    }
}

/// A durable write that failed. The in-memory update it shadowed still stands.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceWarning {
    pub partition: StatePartition,
    pub error: String,
}

impl PersistenceWarning {
    fn new(partition: StatePartition, error: NudgeError) -> Self {
        tracing::warn!(%partition, %error, "state write failed, keeping in-memory state");
        Self {
            partition,
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvaluationOutcome {
    pub findings: Vec<Finding>,
    pub detector_failures: Vec<(BiasKind, String)>,
    /// Final score after flow and preference adjustment.
    pub score: f64,
    pub decision: Option<InterventionDecision>,
    pub rejection: Option<GateRejection>,
    pub warnings: Vec<PersistenceWarning>,
}

#[derive(Debug, Clone, Default)]
pub struct ObserveOutcome {
    pub signals: Vec<Signal>,
    /// Present for tool and git events.
    pub evaluation: Option<EvaluationOutcome>,
    /// Signals written out and drained by a buffer overflow during this call.
    /// Empty when that write failed; the signals are still buffered then.
    pub flushed: Vec<Signal>,
    pub warnings: Vec<PersistenceWarning>,
}

impl ObserveOutcome {
    pub fn decision(&self) -> Option<&InterventionDecision> {
        self.evaluation
            .as_ref()
            .and_then(|evaluation| evaluation.decision.as_ref())
    }
}

#[derive(Debug, Clone)]
pub struct ResponseOutcome {
    pub decision: InterventionDecision,
    /// False when the identical response was already recorded.
    pub applied: bool,
    pub preferences_changed: bool,
    pub recalibrated: Option<f64>,
    pub warnings: Vec<PersistenceWarning>,
}

#[derive(Debug, Clone, Default)]
pub struct CalibrationOutcome {
    pub recalibrated: Option<f64>,
    pub warnings: Vec<PersistenceWarning>,
}

#[derive(Debug, Clone, Default)]
pub struct FlushOutcome {
    pub signals: Vec<Signal>,
    pub warnings: Vec<PersistenceWarning>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct Session {
    config: NudgeConfig,
    collector: Mutex<SignalCollector>,
    scorer: Mutex<InterventionScorer>,
    calibration: Mutex<CalibrationLoop>,
    store: Option<Arc<StateStore>>,
    psychology: Option<Arc<dyn PsychologySource>>,
    topology: Option<Arc<dyn TopologySource>>,
    sink: Option<Arc<dyn SignalSink>>,
}

impl Session {
    /// A session with no durable state.
    pub fn in_memory(config: NudgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            collector: Mutex::new(SignalCollector::new(config.collector.clone())),
            scorer: Mutex::new(InterventionScorer::new(
                config.scoring.clone(),
                config.cooldowns.clone(),
            )),
            calibration: Mutex::new(CalibrationLoop::new(config.calibration.clone())),
            store: None,
            psychology: None,
            topology: None,
            sink: None,
            config,
        })
    }

    /// A session restored from every partition in `store`.
    pub async fn open(config: NudgeConfig, store: Arc<StateStore>) -> Result<Self> {
        config.validate()?;

        let mut collector = SignalCollector::new(config.collector.clone());
        collector.restore(store.load_actions(config.collector.action_history_cap).await?);

        let history = store.load_interventions(config.scoring.history_cap).await?;
        let emissions = match history.last() {
            Some(latest) => {
                store
                    .load_emission_times(latest.created_at - Duration::hours(1))
                    .await?
            }
            None => Vec::new(),
        };
        let cooldowns = CooldownTracker::restore(store.load_cooldowns().await?, emissions);
        let scorer = InterventionScorer::restore(
            config.scoring.clone(),
            config.cooldowns.clone(),
            cooldowns,
            history,
            store.emission_counts().await?,
        );

        let calibration = match store
            .load_calibration(config.calibration.response_window)
            .await?
        {
            Some(snapshot) => CalibrationLoop::restore(config.calibration.clone(), snapshot),
            None => CalibrationLoop::new(config.calibration.clone()),
        };

        tracing::info!(
            actions = collector.history_len(),
            emitted = scorer.counts().total,
            multiplier = calibration.multiplier(),
            "session restored"
        );

        Ok(Self {
            collector: Mutex::new(collector),
            scorer: Mutex::new(scorer),
            calibration: Mutex::new(calibration),
            store: Some(store),
            psychology: None,
            topology: None,
            sink: None,
            config,
        })
    }

    pub fn with_psychology(mut self, source: Arc<dyn PsychologySource>) -> Self {
        self.psychology = Some(source);
        self
    }

    pub fn with_topology(mut self, source: Arc<dyn TopologySource>) -> Self {
        self.topology = Some(source);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn SignalSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &NudgeConfig {
        &self.config
    }

    /// Collect one event, route its signals and, for tool and git events, run
    /// an evaluation pass at the event's timestamp.
    ///
    /// Only a malformed event is an error; rolling state is untouched then.
    pub async fn observe(&self, event: &BehaviorEvent) -> Result<ObserveOutcome> {
        let mut outcome = ObserveOutcome::default();

        {
            let mut collector = self.collector.lock().await;
            let collected = collector.observe(event)?;

            if let (Some(action), Some(store)) = (&collected.action, &self.store) {
                if let Err(error) = store
                    .append_action(action, self.config.collector.action_history_cap)
                    .await
                {
                    outcome
                        .warnings
                        .push(PersistenceWarning::new(StatePartition::ActionHistory, error));
                }
            }

            if !collected.signals.is_empty()
                && !self.deliver(&collected.signals)
                && collector.buffer_signals(collected.signals.clone())
            {
                tracing::debug!(count = collector.buffered_len(), "signal buffer full, flushing");
                let written = self.persist_signals(collector.buffered()).await;
                match written {
                    Ok(()) => outcome.flushed = collector.flush(),
                    Err(warning) => outcome.warnings.push(warning),
                }
            }
            outcome.signals = collected.signals;
        }

        if matches!(event.event, EventFamily::Tool(_) | EventFamily::Git(_)) {
            outcome.evaluation = Some(self.evaluate(event.timestamp).await);
        }
        Ok(outcome)
    }

    /// Run every detector, score and gate. Never fails; see the outcome's
    /// rejection and warnings for what happened.
    pub async fn evaluate(&self, now: DateTime<Utc>) -> EvaluationOutcome {
        let history = {
            let collector = self.collector.lock().await;
            collector.recent_actions(collector.history_len())
        };
        let report = run_detectors(&history, now, &self.config.detection);

        let psychology = self.psychology.as_ref().and_then(|source| {
            source
                .composite()
                .inspect_err(|error| tracing::warn!(%error, "psychology source failed, scoring without it"))
                .ok()
        });
        let topology = self.topology.as_ref().and_then(|source| {
            source
                .flags()
                .inspect_err(|error| tracing::warn!(%error, "topology source failed, scoring without it"))
                .ok()
        });

        let (preferences, multiplier) = {
            let calibration = self.calibration.lock().await;
            (calibration.preferences().clone(), calibration.multiplier())
        };

        let mut outcome = EvaluationOutcome {
            detector_failures: report
                .failures
                .iter()
                .map(|(kind, error)| (*kind, error.to_string()))
                .collect(),
            ..Default::default()
        };

        let mut scorer = self.scorer.lock().await;
        let evaluation = scorer.evaluate(
            &ScoreInputs {
                findings: &report.findings,
                psychology: psychology.as_ref(),
                topology: topology.as_ref(),
                multiplier,
            },
            &preferences,
            now,
        );

        if let (Some(decision), Some(store)) = (&evaluation.decision, &self.store) {
            if let Err(error) = store.save_emission(decision).await {
                outcome
                    .warnings
                    .push(PersistenceWarning::new(StatePartition::Interventions, error));
            }
        }
        drop(scorer);

        outcome.findings = report.findings;
        outcome.score = evaluation.scored.score;
        outcome.decision = evaluation.decision;
        outcome.rejection = evaluation.rejection;
        outcome
    }

    /// Record the user's response to an emitted decision.
    ///
    /// Repeating the same response is a no-op (`applied == false`); a
    /// different response for an answered decision is `ResponseConflict`.
    pub async fn record_response(
        &self,
        decision_id: &str,
        response: UserResponse,
        at: DateTime<Utc>,
    ) -> Result<ResponseOutcome> {
        let mut scorer = self.scorer.lock().await;
        let decision = match scorer.respond(decision_id, response, at) {
            Ok(Some(decision)) => decision,
            Ok(None) => return Self::unchanged(scorer.find(decision_id).cloned(), decision_id),
            Err(NudgeError::UnknownDecision(_)) => {
                // Evicted from the in-memory history; fall back to the store.
                let Some(store) = &self.store else {
                    return Err(NudgeError::UnknownDecision(decision_id.to_string()));
                };
                let mut decision = store
                    .load_intervention(decision_id)
                    .await?
                    .ok_or_else(|| NudgeError::UnknownDecision(decision_id.to_string()))?;
                if !apply_response(&mut decision, response, at)? {
                    return Self::unchanged(Some(decision), decision_id);
                }
                scorer.note_response(response);
                decision
            }
            Err(error) => return Err(error),
        };

        let mut calibration = self.calibration.lock().await;
        let effect = calibration.record_response(&decision, response, at);
        let mut warnings = Vec::new();
        if let Some(store) = &self.store {
            if let Err(error) = store.save_response(&decision, at, &calibration.snapshot()).await {
                warnings.push(PersistenceWarning::new(StatePartition::Calibration, error));
            }
        }

        tracing::info!(
            id = %decision.id,
            kind = %decision.intervention_type,
            %response,
            preferences_changed = effect.preferences_changed,
            "response recorded"
        );

        Ok(ResponseOutcome {
            decision,
            applied: true,
            preferences_changed: effect.preferences_changed,
            recalibrated: effect.recalibrated,
            warnings,
        })
    }

    /// Record a module-level prediction outcome.
    pub async fn record_outcome(&self, module: &str, correct: bool, at: DateTime<Utc>) -> CalibrationOutcome {
        let mut calibration = self.calibration.lock().await;
        let recalibrated = calibration.record_outcome(module, correct, at);
        let mut warnings = Vec::new();
        if let Some(store) = &self.store {
            if let Err(error) = store.save_calibration(&calibration.snapshot()).await {
                warnings.push(PersistenceWarning::new(StatePartition::Calibration, error));
            }
        }
        CalibrationOutcome {
            recalibrated,
            warnings,
        }
    }

    pub async fn multiplier(&self) -> f64 {
        self.calibration.lock().await.multiplier()
    }

    pub async fn preferences(&self) -> PreferenceProfile {
        self.calibration.lock().await.preferences().clone()
    }

    /// Drain the signal buffer, writing it out when a store is attached.
    ///
    /// When the write fails the signals stay buffered and `signals` is empty.
    pub async fn flush(&self) -> FlushOutcome {
        let mut collector = self.collector.lock().await;
        let mut outcome = FlushOutcome::default();
        let written = self.persist_signals(collector.buffered()).await;
        match written {
            Ok(()) => outcome.signals = collector.flush(),
            Err(warning) => outcome.warnings.push(warning),
        }
        outcome
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> InterventionStats {
        let (history_len, buffered) = {
            let collector = self.collector.lock().await;
            (collector.history_len(), collector.buffered_len())
        };
        let mut stats = {
            let scorer = self.scorer.lock().await;
            let calibration = self.calibration.lock().await;
            InterventionStats::collect(&scorer, &calibration, history_len, buffered, now)
        };
        if let Some(store) = &self.store {
            stats.persisted_signals = store
                .buffered_signal_count()
                .await
                .inspect_err(|error| tracing::warn!(%error, "failed to count persisted signals"))
                .ok();
        }
        stats
    }

    /// The most recent `count` actions, oldest first.
    pub async fn recent_actions(&self, count: usize) -> Vec<ActionRecord> {
        self.collector.lock().await.recent_actions(count)
    }

    /// Hand signals to the sink. False means they still need a home.
    fn deliver(&self, signals: &[Signal]) -> bool {
        let Some(sink) = &self.sink else {
            return false;
        };
        match sink.deliver(signals) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, count = signals.len(), "signal sink failed, buffering");
                false
            }
        }
    }

    async fn persist_signals(&self, signals: &[Signal]) -> std::result::Result<(), PersistenceWarning> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store
            .flush_signals(signals)
            .await
            .map_err(|error| PersistenceWarning::new(StatePartition::SignalBuffer, error))
    }

    fn unchanged(decision: Option<InterventionDecision>, decision_id: &str) -> Result<ResponseOutcome> {
        let decision = decision.ok_or_else(|| NudgeError::UnknownDecision(decision_id.to_string()))?;
        Ok(ResponseOutcome {
            decision,
            applied: false,
            preferences_changed: false,
            recalibrated: None,
            warnings: Vec::new(),
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}
