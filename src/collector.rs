//! Signal collection from raw behavioral telemetry.
//!
//! `SignalCollector` turns tool, git, break and semantic events into typed
//! [`Signal`]s and maintains the rolling action log the detectors read. Timing
//! signals compare the gap since the previous event against independent fast,
//! slow and long-session thresholds. The tool and edited-file windows drive
//! the context-switch rule, and a per-process failure streak upgrades ordinary
//! failures to repeated failures.
//!
//! Collection is synchronous and never performs I/O. Signals that cannot be
//! delivered downstream are held in a buffer that the caller flushes to
//! durable storage once it overflows.

use crate::config::CollectorConfig;
use crate::error::EventError;
use crate::types::{ActionKind, ActionRecord, Signal, SignalKind};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use std::collections::{HashSet, VecDeque};
use std::path::Path;

// ---------------------------------------------------------------------------
// Inbound events
// ---------------------------------------------------------------------------

/// A timestamped event submitted by a telemetry collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorEvent {
    pub timestamp: DateTime<Utc>,
    pub event: EventFamily,
}

/// The four inbound event families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "payload", rename_all = "snake_case")]
pub enum EventFamily {
    Tool(ToolAction),
    Git(GitAction),
    Break(BreakEvent),
    Semantic(SemanticPattern),
}

impl EventFamily {
    fn label(&self) -> &'static str {
        match self {
            Self::Tool(_) => "tool",
            Self::Git(_) => "git",
            Self::Break(_) => "break",
            Self::Semantic(_) => "semantic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolAction {
    pub name: String,
    #[serde(default)]
    pub input: JsonValue,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    /// Label of the approach being pursued, when the host knows it.
    #[serde(default)]
    pub approach: Option<String>,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitAction {
    pub action: String,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakEvent {
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticPattern {
    pub pattern: String,
    pub confidence: f64,
    #[serde(default)]
    pub file: Option<String>,
}

/// Result of observing one event.
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub signals: Vec<Signal>,
    /// The action appended to the rolling log, if the event produced one.
    pub action: Option<ActionRecord>,
}

// ---------------------------------------------------------------------------
// SignalCollector
// ---------------------------------------------------------------------------

/// Converts raw events into signals and owns the rolling action log.
#[derive(Debug, Clone)]
pub struct SignalCollector {
    config: CollectorConfig,
    actions: VecDeque<ActionRecord>,
    recent_tools: VecDeque<String>,
    recent_files: VecDeque<String>,
    last_event_at: Option<DateTime<Utc>>,
    session_started_at: Option<DateTime<Utc>>,
    long_session_signalled: bool,
    failure_streak: u32,
    buffer: Vec<Signal>,
}

impl SignalCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            actions: VecDeque::new(),
            recent_tools: VecDeque::new(),
            recent_files: VecDeque::new(),
            last_event_at: None,
            session_started_at: None,
            long_session_signalled: false,
            failure_streak: 0,
            buffer: Vec::new(),
        }
    }

    /// Rebuild the rolling windows from a previously persisted action log.
    ///
    /// The failure streak and session clock are per-process and start fresh.
    pub fn restore(&mut self, actions: Vec<ActionRecord>) {
        self.actions.clear();
        self.recent_tools.clear();
        self.recent_files.clear();
        for action in actions {
            self.push_tool(&action.tool);
            if action.kind == ActionKind::Write {
                if let Some(file) = &action.file {
                    self.push_file(file);
                }
            }
            self.last_event_at = Some(action.timestamp);
            self.push_action(action);
        }
    }

    /// Validate an event, update rolling state and return the derived signals.
    ///
    /// Malformed events are rejected before any state changes.
    pub fn observe(&mut self, event: &BehaviorEvent) -> Result<Collected, EventError> {
        validate(&event.event)?;

        let now = event.timestamp;
        let mut collected = Collected::default();

        if let EventFamily::Break(pause) = &event.event {
            if pause.duration_secs >= self.config.session_reset_break_secs {
                self.start_session(now);
            }
            collected.signals.push(Signal::new(
                SignalKind::BreakTaken,
                self.config.break_confidence,
                json!({ "duration_secs": pause.duration_secs }),
                now,
            ));
            self.mark_event(now);
            return Ok(collected);
        }

        self.timing_signals(now, &mut collected.signals);

        match &event.event {
            EventFamily::Tool(tool) => self.observe_tool(tool, now, &mut collected),
            EventFamily::Git(git) => {
                let action = ActionRecord {
                    kind: ActionKind::Exec,
                    tool: "git".into(),
                    file: None,
                    error: None,
                    approach: None,
                    timestamp: now,
                };
                self.push_action(action.clone());
                collected.action = Some(action);
                collected.signals.push(Signal::new(
                    SignalKind::GitAction,
                    self.config.git_action_confidence,
                    json!({ "action": git.action, "detail": git.detail }),
                    now,
                ));
            }
            EventFamily::Semantic(pattern) => {
                collected.signals.push(Signal::new(
                    SignalKind::CodePattern,
                    pattern.confidence,
                    json!({ "pattern": pattern.pattern, "file": pattern.file }),
                    now,
                ));
            }
            EventFamily::Break(_) => {}
        }

        self.mark_event(now);
        Ok(collected)
    }

    /// The most recent `count` actions, oldest first.
    pub fn recent_actions(&self, count: usize) -> Vec<ActionRecord> {
        let skip = self.actions.len().saturating_sub(count);
        self.actions.iter().skip(skip).cloned().collect()
    }

    /// Actions currently held in the ring buffer.
    pub fn history_len(&self) -> usize {
        self.actions.len()
    }

    /// Signals waiting for a consumer.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Hold signals that could not be delivered downstream.
    ///
    /// Returns true once the buffer reaches the configured maximum. The caller
    /// writes out [`buffered`](Self::buffered) and drains with
    /// [`flush`](Self::flush) only after that write succeeds, so a failed write
    /// leaves every signal in memory.
    pub fn buffer_signals(&mut self, signals: Vec<Signal>) -> bool {
        self.buffer.extend(signals);
        self.buffer.len() >= self.config.signal_buffer_max
    }

    /// Signals waiting for a consumer, oldest first.
    pub fn buffered(&self) -> &[Signal] {
        &self.buffer
    }

    /// Drain every buffered signal.
    pub fn flush(&mut self) -> Vec<Signal> {
        std::mem::take(&mut self.buffer)
    }

    // -- internals ----------------------------------------------------------

    fn observe_tool(&mut self, tool: &ToolAction, now: DateTime<Utc>, collected: &mut Collected) {
        let kind = classify_action(&tool.name);
        let file = extract_file(&tool.input);
        let error = if tool.success {
            None
        } else {
            Some(
                tool.error
                    .clone()
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or_else(|| "failed".to_string()),
            )
        };

        let action = ActionRecord {
            kind,
            tool: tool.name.clone(),
            file: file.clone(),
            error: error.clone(),
            approach: tool.approach.clone(),
            timestamp: now,
        };
        self.push_action(action.clone());
        collected.action = Some(action);

        self.push_tool(&tool.name);
        let mut switched = self.tools_span_categories();
        if kind == ActionKind::Write {
            if let Some(path) = &file {
                self.push_file(path);
                switched = switched || self.files_span_directories();
            }
        }
        if switched {
            collected.signals.push(Signal::new(
                SignalKind::ContextSwitch,
                self.config.context_switch_confidence,
                json!({
                    "tools": self.recent_tools.iter().rev().take(3).collect::<Vec<_>>(),
                    "files": self.recent_files.iter().rev().take(3).collect::<Vec<_>>(),
                }),
                now,
            ));
        }

        match error {
            Some(error) => {
                self.failure_streak += 1;
                let repeated = self.failure_streak >= self.config.repeated_failure_count;
                let (signal_kind, confidence) = if repeated {
                    (
                        SignalKind::RepeatedFailure,
                        self.config.repeated_failure_confidence,
                    )
                } else {
                    (SignalKind::ActionFailure, self.config.action_failure_confidence)
                };
                collected.signals.push(Signal::new(
                    signal_kind,
                    confidence,
                    json!({
                        "tool": tool.name,
                        "error": error,
                        "streak": self.failure_streak,
                        "latency_ms": tool.latency_ms,
                    }),
                    now,
                ));
            }
            None => self.failure_streak = 0,
        }
    }

    fn timing_signals(&mut self, now: DateTime<Utc>, signals: &mut Vec<Signal>) {
        if let Some(last) = self.last_event_at {
            let gap_secs = ((now - last).num_milliseconds() as f64 / 1000.0).max(0.0);
            if gap_secs >= self.config.session_reset_break_secs {
                self.start_session(now);
            }
            if gap_secs < self.config.fast_action_secs {
                signals.push(Signal::new(
                    SignalKind::FastAction,
                    self.config.fast_action_confidence,
                    json!({ "gap_secs": gap_secs }),
                    now,
                ));
            } else if gap_secs > self.config.slow_action_secs {
                signals.push(Signal::new(
                    SignalKind::SlowAction,
                    self.config.slow_action_confidence,
                    json!({ "gap_secs": gap_secs }),
                    now,
                ));
            }
        }

        let started = *self.session_started_at.get_or_insert(now);
        let session_secs = (now - started).num_seconds() as f64;
        if session_secs > self.config.long_session_secs && !self.long_session_signalled {
            self.long_session_signalled = true;
            signals.push(Signal::new(
                SignalKind::LongSession,
                self.config.long_session_confidence,
                json!({ "session_secs": session_secs }),
                now,
            ));
        }
    }

    fn start_session(&mut self, now: DateTime<Utc>) {
        self.session_started_at = Some(now);
        self.long_session_signalled = false;
    }

    fn mark_event(&mut self, now: DateTime<Utc>) {
        self.last_event_at = Some(match self.last_event_at {
            Some(last) if last > now => last,
            _ => now,
        });
    }

    fn push_action(&mut self, action: ActionRecord) {
        self.actions.push_back(action);
        while self.actions.len() > self.config.action_history_cap {
            self.actions.pop_front();
        }
    }

    fn push_tool(&mut self, name: &str) {
        self.recent_tools.push_back(name.to_string());
        while self.recent_tools.len() > self.config.rolling_window {
            self.recent_tools.pop_front();
        }
    }

    fn push_file(&mut self, path: &str) {
        self.recent_files.push_back(path.to_string());
        while self.recent_files.len() > self.config.rolling_window {
            self.recent_files.pop_front();
        }
    }

    /// True when the last three tools fall into three distinct categories.
    fn tools_span_categories(&self) -> bool {
        if self.recent_tools.len() < 3 {
            return false;
        }
        let categories: HashSet<&str> = self
            .recent_tools
            .iter()
            .rev()
            .take(3)
            .map(|name| tool_category(name))
            .collect();
        categories.len() == 3
    }

    /// True when the last three edited files sit in three distinct directories.
    fn files_span_directories(&self) -> bool {
        if self.recent_files.len() < 3 {
            return false;
        }
        let directories: HashSet<String> = self
            .recent_files
            .iter()
            .rev()
            .take(3)
            .map(|path| {
                Path::new(path)
                    .parent()
                    .map(|parent| parent.display().to_string())
                    .unwrap_or_default()
            })
            .collect();
        directories.len() == 3
    }
}

// ---------------------------------------------------------------------------
// Validation and classification helpers
// ---------------------------------------------------------------------------

fn validate(event: &EventFamily) -> Result<(), EventError> {
    let family = event.label();
    match event {
        EventFamily::Tool(tool) => {
            if tool.name.trim().is_empty() {
                return Err(EventError::MissingField { family, field: "name" });
            }
        }
        EventFamily::Git(git) => {
            if git.action.trim().is_empty() {
                return Err(EventError::MissingField { family, field: "action" });
            }
        }
        EventFamily::Break(pause) => {
            if !pause.duration_secs.is_finite() || pause.duration_secs < 0.0 {
                return Err(EventError::OutOfRange {
                    family,
                    field: "duration_secs",
                    value: pause.duration_secs,
                });
            }
        }
        EventFamily::Semantic(pattern) => {
            if pattern.pattern.trim().is_empty() {
                return Err(EventError::MissingField { family, field: "pattern" });
            }
            if !(0.0..=1.0).contains(&pattern.confidence) {
                return Err(EventError::OutOfRange {
                    family,
                    field: "confidence",
                    value: pattern.confidence,
                });
            }
        }
    }
    Ok(())
}

/// Input keys that carry the file a tool operates on.
const FILE_KEYS: &[&str] = &["file_path", "path", "file", "notebook_path"];

fn extract_file(input: &JsonValue) -> Option<String> {
    FILE_KEYS
        .iter()
        .find_map(|key| input.get(key).and_then(JsonValue::as_str))
        .filter(|path| !path.is_empty())
        .map(String::from)
}

/// Category of a tool for the context-switch rule.
pub fn tool_category(tool_name: &str) -> &'static str {
    let name = tool_name.trim().to_ascii_lowercase();
    if name.contains("grep") || name.contains("glob") || name.contains("search") || name == "find" {
        "search"
    } else if name.contains("web") || name.contains("fetch") || name.contains("browser") {
        "web"
    } else if name.contains("git") {
        "git"
    } else if name.contains("write")
        || name.contains("edit")
        || name.contains("create")
        || name.contains("patch")
    {
        "write"
    } else if name.contains("read") || name.contains("view") || name == "cat" || name == "ls" {
        "read"
    } else if name.contains("bash")
        || name.contains("shell")
        || name.contains("exec")
        || name.contains("run")
        || name.contains("terminal")
    {
        "exec"
    } else {
        "other"
    }
}

/// Map a tool name onto the read/write/exec action taxonomy.
pub fn classify_action(tool_name: &str) -> ActionKind {
    match tool_category(tool_name) {
        "write" => ActionKind::Write,
        "read" | "search" => ActionKind::Read,
        _ => ActionKind::Exec,
    }
}
