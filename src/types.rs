//! Data types shared across the collector, detectors, scorer and calibration loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Kind of advisory observation derived from raw telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    FastAction,
    SlowAction,
    LongSession,
    ContextSwitch,
    ActionFailure,
    RepeatedFailure,
    GitAction,
    BreakTaken,
    CodePattern,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::FastAction => "fast_action",
            Self::SlowAction => "slow_action",
            Self::LongSession => "long_session",
            Self::ContextSwitch => "context_switch",
            Self::ActionFailure => "action_failure",
            Self::RepeatedFailure => "repeated_failure",
            Self::GitAction => "git_action",
            Self::BreakTaken => "break_taken",
            Self::CodePattern => "code_pattern",
        };
        f.write_str(label)
    }
}

/// A typed, confidence-weighted observation produced by the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f64,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        kind: SignalKind,
        confidence: f64,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            confidence: clamp_unit(confidence),
            data,
            timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Action history
// ---------------------------------------------------------------------------

/// Coarse classification of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Read,
    Write,
    Exec,
}

impl ActionKind {
    /// Parse from a string, defaulting to Exec.
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "read" => Self::Read,
            "write" => Self::Write,
            _ => Self::Exec,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Exec => write!(f, "exec"),
        }
    }
}

/// One entry in the collector's rolling action log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub kind: ActionKind,
    pub tool: String,
    pub file: Option<String>,
    /// Error text when the action failed.
    pub error: Option<String>,
    /// Label of the approach the user is currently pursuing, when known.
    pub approach: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActionRecord {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// The five canonical behavioral patterns, one per detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasKind {
    SunkCost,
    Anchoring,
    AnalysisParalysis,
    Overconfidence,
    RecencyBias,
}

impl BiasKind {
    /// Every detector kind, in evaluation order.
    pub const ALL: [BiasKind; 5] = [
        BiasKind::SunkCost,
        BiasKind::Anchoring,
        BiasKind::AnalysisParalysis,
        BiasKind::Overconfidence,
        BiasKind::RecencyBias,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SunkCost => "sunk_cost",
            Self::Anchoring => "anchoring",
            Self::AnalysisParalysis => "analysis_paralysis",
            Self::Overconfidence => "overconfidence",
            Self::RecencyBias => "recency_bias",
        }
    }

    pub fn from_str_lossy(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for BiasKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detector's positive identification of a behavioral pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub bias: BiasKind,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub suggestion: String,
}

// ---------------------------------------------------------------------------
// Interventions
// ---------------------------------------------------------------------------

/// What an intervention is about. Keys are stable and used for cooldowns,
/// preferences and calibration modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "bias")]
pub enum InterventionType {
    Burnout,
    Frustration,
    Procrastination,
    RabbitHole,
    Bias(BiasKind),
}

impl InterventionType {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Burnout => "burnout",
            Self::Frustration => "frustration",
            Self::Procrastination => "procrastination",
            Self::RabbitHole => "rabbit_hole",
            Self::Bias(bias) => bias.as_str(),
        }
    }

    pub fn from_key(value: &str) -> Option<Self> {
        match value {
            "burnout" => Some(Self::Burnout),
            "frustration" => Some(Self::Frustration),
            "procrastination" => Some(Self::Procrastination),
            "rabbit_hole" => Some(Self::RabbitHole),
            other => BiasKind::from_str_lossy(other).map(Self::Bias),
        }
    }
}

impl fmt::Display for InterventionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// The five discrete intensity bands, ordered from quietest to loudest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntensityLevel {
    Silent,
    Hint,
    Nudge,
    Suggest,
    Strong,
}

impl IntensityLevel {
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "hint" => Self::Hint,
            "nudge" => Self::Nudge,
            "suggest" => Self::Suggest,
            "strong" => Self::Strong,
            _ => Self::Silent,
        }
    }

    /// Wrap an intervention message in the voice of this band.
    pub fn format_message(&self, message: &str) -> String {
        match self {
            Self::Silent => message.to_string(),
            Self::Hint => format!("(hint) {message}"),
            Self::Nudge => format!("Worth a thought: {message}"),
            Self::Suggest => format!("Suggestion: {message}"),
            Self::Strong => format!("Pause for a moment. {message}"),
        }
    }
}

impl fmt::Display for IntensityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Silent => write!(f, "silent"),
            Self::Hint => write!(f, "hint"),
            Self::Nudge => write!(f, "nudge"),
            Self::Suggest => write!(f, "suggest"),
            Self::Strong => write!(f, "strong"),
        }
    }
}

/// How the user reacted to an emitted intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserResponse {
    Acknowledged,
    Ignored,
    Dismissed,
}

impl UserResponse {
    pub fn from_str_lossy(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "acknowledged" | "ack" => Some(Self::Acknowledged),
            "ignored" => Some(Self::Ignored),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }

    /// Ignored and dismissed both count against the intervention type.
    pub fn is_negative(&self) -> bool {
        matches!(self, Self::Ignored | Self::Dismissed)
    }
}

impl fmt::Display for UserResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::Ignored => write!(f, "ignored"),
            Self::Dismissed => write!(f, "dismissed"),
        }
    }
}

/// An emitted intervention. Immutable apart from the single response update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionDecision {
    pub id: String,
    pub intervention_type: InterventionType,
    pub intensity: IntensityLevel,
    pub score: f64,
    pub reasons: Vec<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub response: Option<UserResponse>,
    pub response_latency_secs: Option<f64>,
}

// ---------------------------------------------------------------------------
// Calibration and preferences
// ---------------------------------------------------------------------------

/// Accumulated prediction accuracy for one scored module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleCalibration {
    pub correct: u64,
    pub total: u64,
    /// Exponential moving average, never above the configured ceiling.
    pub accuracy: f64,
    pub last_updated: DateTime<Utc>,
}

/// Learned user preferences, mutated only by the calibration loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceProfile {
    pub preferred_intensity: IntensityLevel,
    pub effective_types: Vec<String>,
    pub disliked_types: Vec<String>,
}

impl Default for PreferenceProfile {
    fn default() -> Self {
        Self {
            preferred_intensity: IntensityLevel::Nudge,
            effective_types: Vec::new(),
            disliked_types: Vec::new(),
        }
    }
}

impl PreferenceProfile {
    pub fn is_disliked(&self, key: &str) -> bool {
        self.disliked_types.iter().any(|entry| entry == key)
    }

    pub fn is_effective(&self, key: &str) -> bool {
        self.effective_types.iter().any(|entry| entry == key)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Clamp to `[0.0, 1.0]`, mapping NaN to zero.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
