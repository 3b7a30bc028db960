//! Nudge: behavioral telemetry in, rate-limited and self-calibrating
//! interventions out.
//!
//! Data flows collector → detectors → scorer → emission → calibration, with
//! calibration feeding the confidence multiplier and preference profile back
//! into the scorer. [`Session`] owns all of it.

pub mod calibration;
pub mod collector;
pub mod config;
pub mod cooldowns;
pub mod detectors;
pub mod error;
pub mod scorer;
pub mod session;
pub mod stats;
pub mod store;
pub mod types;

pub use collector::{BehaviorEvent, EventFamily};
pub use config::NudgeConfig;
pub use error::{NudgeError, Result};
pub use scorer::{PsychologyComposite, TopologyFlags};
pub use session::{
    EvaluationOutcome, ObserveOutcome, PersistenceWarning, PsychologySource, Session, SignalSink,
    TopologySource,
};
pub use stats::InterventionStats;
pub use store::StateStore;
pub use types::{
    Finding, IntensityLevel, InterventionDecision, InterventionType, PreferenceProfile, Signal,
    UserResponse,
};
