//! Behavioral pattern detectors.
//!
//! Five independent heuristics read the collector's action log and each
//! report at most one [`Finding`] per pass. `run_detectors` evaluates all of
//! them, keeps findings that clear the shared detection threshold, and
//! isolates any detector that fails so the rest of the pass still runs.

use crate::config::DetectionThresholds;
use crate::error::DetectorError;
use crate::types::{ActionKind, ActionRecord, BiasKind, Finding, clamp_unit};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

// ---------------------------------------------------------------------------
// Evaluation pass
// ---------------------------------------------------------------------------

/// Outcome of running every detector once.
#[derive(Debug, Default)]
pub struct DetectionReport {
    /// Findings at or above the detection threshold, in detector order.
    pub findings: Vec<Finding>,
    /// Detectors that failed during this pass.
    pub failures: Vec<(BiasKind, DetectorError)>,
}

/// Run a single detector.
pub fn detect(
    kind: BiasKind,
    history: &[ActionRecord],
    now: DateTime<Utc>,
    thresholds: &DetectionThresholds,
) -> Result<Option<Finding>, DetectorError> {
    match kind {
        BiasKind::SunkCost => detect_sunk_cost(history, now, thresholds),
        BiasKind::Anchoring => detect_anchoring(history, now, thresholds),
        BiasKind::AnalysisParalysis => detect_analysis_paralysis(history, now, thresholds),
        BiasKind::Overconfidence => detect_overconfidence(history, thresholds),
        BiasKind::RecencyBias => detect_recency_bias(history, now, thresholds),
    }
}

/// Run all five detectors, isolating failures.
pub fn run_detectors(
    history: &[ActionRecord],
    now: DateTime<Utc>,
    thresholds: &DetectionThresholds,
) -> DetectionReport {
    let mut report = DetectionReport::default();
    for kind in BiasKind::ALL {
        match detect(kind, history, now, thresholds) {
            Ok(Some(finding)) if finding.confidence >= thresholds.detection_threshold => {
                tracing::debug!(bias = %kind, confidence = finding.confidence, "pattern detected");
                report.findings.push(finding);
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(bias = %kind, %error, "detector failed, skipping for this pass");
                report.failures.push((kind, error));
            }
        }
    }
    report
}

// ---------------------------------------------------------------------------
// Detectors
// ---------------------------------------------------------------------------

/// Repeated errors under the current approach within a trailing window.
///
/// Confidence grows with how many of those errors share one dominant error
/// label.
pub fn detect_sunk_cost(
    history: &[ActionRecord],
    now: DateTime<Utc>,
    thresholds: &DetectionThresholds,
) -> Result<Option<Finding>, DetectorError> {
    const NAME: &str = "sunk_cost";
    require_positive(NAME, "sunk_cost_window_secs", thresholds.sunk_cost_window_secs as f64)?;
    require_positive(NAME, "sunk_cost_min_errors", thresholds.sunk_cost_min_errors as f64)?;

    let current_approach = history.iter().rev().find_map(|action| action.approach.as_deref());
    let start = window_start(NAME, "sunk_cost_window_secs", now, thresholds.sunk_cost_window_secs)?;
    let errors: Vec<&str> = within(history, start, now)
        .filter(|action| action.approach.as_deref() == current_approach)
        .filter_map(|action| action.error.as_deref())
        .collect();

    if errors.len() < thresholds.sunk_cost_min_errors {
        return Ok(None);
    }

    let mut label_counts: HashMap<String, usize> = HashMap::new();
    for error in &errors {
        *label_counts.entry(error_label(error)).or_default() += 1;
    }
    let (dominant_label, dominant_count) = label_counts
        .into_iter()
        .max_by(|left, right| left.1.cmp(&right.1).then_with(|| right.0.cmp(&left.0)))
        .unwrap_or_default();
    let homogeneity = dominant_count as f64 / errors.len() as f64;

    let approach = current_approach.unwrap_or("current approach");
    finding(
        NAME,
        BiasKind::SunkCost,
        0.5 + 0.5 * homogeneity,
        thresholds.max_confidence,
        vec![
            format!("{} errors on {approach} in the last {}s", errors.len(), thresholds.sunk_cost_window_secs),
            format!("{dominant_count} share the error type {dominant_label}"),
        ],
        format!("The same failure keeps coming back on {approach}. Is it time to try a different approach?"),
    )
    .map(Some)
}

/// One file dominating recent edits while almost nothing else is touched.
pub fn detect_anchoring(
    history: &[ActionRecord],
    now: DateTime<Utc>,
    thresholds: &DetectionThresholds,
) -> Result<Option<Finding>, DetectorError> {
    const NAME: &str = "anchoring";
    require_positive(NAME, "anchoring_window_secs", thresholds.anchoring_window_secs as f64)?;
    require_unit(NAME, "anchoring_edit_share", thresholds.anchoring_edit_share)?;

    let start = window_start(NAME, "anchoring_window_secs", now, thresholds.anchoring_window_secs)?;
    let recent: Vec<&ActionRecord> = within(history, start, now).collect();
    let mut edits_per_file: HashMap<&str, usize> = HashMap::new();
    for action in &recent {
        if action.kind == ActionKind::Write {
            if let Some(file) = action.file.as_deref() {
                *edits_per_file.entry(file).or_default() += 1;
            }
        }
    }
    let total_edits: usize = edits_per_file.values().sum();
    let Some((top_file, top_count)) = edits_per_file
        .into_iter()
        .max_by(|left, right| left.1.cmp(&right.1).then_with(|| right.0.cmp(left.0)))
    else {
        return Ok(None);
    };

    let files_touched: HashSet<&str> = recent
        .iter()
        .filter_map(|action| action.file.as_deref())
        .collect();
    let edit_share = top_count as f64 / total_edits as f64;

    if top_count < thresholds.anchoring_min_edits
        || edit_share < thresholds.anchoring_edit_share
        || files_touched.len() > thresholds.anchoring_max_files
    {
        return Ok(None);
    }

    let action_share = top_count as f64 / recent.len() as f64;
    finding(
        NAME,
        BiasKind::Anchoring,
        0.4 + 0.6 * action_share,
        thresholds.max_confidence,
        vec![
            format!("{top_count} of {total_edits} recent edits went to {top_file}"),
            format!("{} distinct files touched", files_touched.len()),
        ],
        format!("You've been circling {top_file}. Could the problem live somewhere else?"),
    )
    .map(Some)
}

/// Many reads with no write for a long stretch.
pub fn detect_analysis_paralysis(
    history: &[ActionRecord],
    now: DateTime<Utc>,
    thresholds: &DetectionThresholds,
) -> Result<Option<Finding>, DetectorError> {
    const NAME: &str = "analysis_paralysis";
    require_positive(NAME, "paralysis_min_reads", thresholds.paralysis_min_reads as f64)?;
    require_positive(NAME, "paralysis_ratio_slope", thresholds.paralysis_ratio_slope)?;

    let Some(first) = history.first() else {
        return Ok(None);
    };
    let last_write = history
        .iter()
        .rposition(|action| action.kind == ActionKind::Write);
    let (reads_since, idle_since) = match last_write {
        Some(index) => (
            history[index + 1..]
                .iter()
                .filter(|action| action.kind == ActionKind::Read)
                .count(),
            history[index].timestamp,
        ),
        None => (
            history
                .iter()
                .filter(|action| action.kind == ActionKind::Read)
                .count(),
            first.timestamp,
        ),
    };
    let idle_secs = (now - idle_since).num_seconds();

    if reads_since < thresholds.paralysis_min_reads || idle_secs <= thresholds.paralysis_idle_secs {
        return Ok(None);
    }

    let writes = history
        .iter()
        .filter(|action| action.kind == ActionKind::Write)
        .count();
    let ratio = reads_since as f64 / writes.max(1) as f64;
    finding(
        NAME,
        BiasKind::AnalysisParalysis,
        0.5 + ratio * thresholds.paralysis_ratio_slope,
        thresholds.max_confidence,
        vec![
            format!("{reads_since} reads since the last write"),
            format!("no write for {idle_secs}s"),
        ],
        "You have read a lot without changing anything. Try a small, reversible edit.".to_string(),
    )
    .map(Some)
}

/// Writes to files that were never read in the recent window.
pub fn detect_overconfidence(
    history: &[ActionRecord],
    thresholds: &DetectionThresholds,
) -> Result<Option<Finding>, DetectorError> {
    const NAME: &str = "overconfidence";
    require_positive(NAME, "overconfidence_window", thresholds.overconfidence_window as f64)?;
    require_unit(NAME, "overconfidence_blind_ratio", thresholds.overconfidence_blind_ratio)?;

    let skip = history.len().saturating_sub(thresholds.overconfidence_window);
    let window = &history[skip..];

    let mut read_files: HashSet<&str> = HashSet::new();
    let mut writes = 0usize;
    let mut blind_writes = 0usize;
    let mut blind_files: Vec<&str> = Vec::new();
    for action in window {
        let Some(file) = action.file.as_deref() else {
            continue;
        };
        match action.kind {
            ActionKind::Read => {
                read_files.insert(file);
            }
            ActionKind::Write => {
                writes += 1;
                if !read_files.contains(file) {
                    blind_writes += 1;
                    if !blind_files.contains(&file) {
                        blind_files.push(file);
                    }
                }
            }
            ActionKind::Exec => {}
        }
    }

    if writes == 0 || blind_writes < thresholds.overconfidence_min_blind_writes {
        return Ok(None);
    }
    let ratio = blind_writes as f64 / writes as f64;
    if ratio <= thresholds.overconfidence_blind_ratio {
        return Ok(None);
    }

    finding(
        NAME,
        BiasKind::Overconfidence,
        0.5 + 0.5 * ratio,
        thresholds.max_confidence,
        vec![
            format!("{blind_writes} of {writes} recent writes hit files that were not read first"),
            format!("files: {}", blind_files.join(", ")),
        ],
        "Several edits landed on files you haven't looked at. A quick read first may save a revert."
            .to_string(),
    )
    .map(Some)
}

/// A sharp rise in the recent error rate compared to the preceding window.
pub fn detect_recency_bias(
    history: &[ActionRecord],
    now: DateTime<Utc>,
    thresholds: &DetectionThresholds,
) -> Result<Option<Finding>, DetectorError> {
    const NAME: &str = "recency_bias";
    require_positive(NAME, "recency_recent_secs", thresholds.recency_recent_secs as f64)?;
    require_positive(NAME, "recency_older_secs", thresholds.recency_older_secs as f64)?;
    require_positive(NAME, "recency_factor", thresholds.recency_factor)?;

    let recent_start = window_start(NAME, "recency_recent_secs", now, thresholds.recency_recent_secs)?;
    let older_start = window_start(NAME, "recency_older_secs", recent_start, thresholds.recency_older_secs)?;

    let (mut recent_total, mut recent_errors) = (0usize, 0usize);
    let (mut older_total, mut older_errors) = (0usize, 0usize);
    for action in history.iter().filter(|action| action.timestamp <= now) {
        if action.timestamp > recent_start {
            recent_total += 1;
            recent_errors += usize::from(action.is_error());
        } else if action.timestamp > older_start {
            older_total += 1;
            older_errors += usize::from(action.is_error());
        }
    }

    if recent_total < thresholds.recency_min_recent_samples
        || older_total < thresholds.recency_min_older_samples
    {
        return Ok(None);
    }

    let recent_rate = recent_errors as f64 / recent_total as f64;
    let older_rate = older_errors as f64 / older_total as f64;
    let baseline = older_rate.max(thresholds.recency_rate_floor);
    if recent_rate == 0.0 || recent_rate < baseline * thresholds.recency_factor {
        return Ok(None);
    }

    finding(
        NAME,
        BiasKind::RecencyBias,
        0.5 + 0.5 * (recent_rate - older_rate),
        thresholds.max_confidence,
        vec![
            format!("recent error rate {recent_rate:.2} over {recent_total} actions"),
            format!("earlier error rate {older_rate:.2} over {older_total} actions"),
        ],
        "The last few minutes went badly, but the session as a whole has not. Don't let the latest failures set the whole plan."
            .to_string(),
    )
    .map(Some)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Actions in the half-open window `(start, now]`.
fn within(
    history: &[ActionRecord],
    start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> impl Iterator<Item = &ActionRecord> {
    history
        .iter()
        .filter(move |action| action.timestamp > start && action.timestamp <= now)
}

/// `secs` before `from`, or an invalid-threshold error when that instant is
/// not representable.
fn window_start(
    detector: &'static str,
    name: &'static str,
    from: DateTime<Utc>,
    secs: i64,
) -> Result<DateTime<Utc>, DetectorError> {
    Duration::try_seconds(secs)
        .and_then(|span| from.checked_sub_signed(span))
        .ok_or(DetectorError::InvalidThreshold {
            detector,
            name,
            value: secs as f64,
        })
}

fn require_positive(detector: &'static str, name: &'static str, value: f64) -> Result<(), DetectorError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(DetectorError::InvalidThreshold { detector, name, value })
    }
}

fn require_unit(detector: &'static str, name: &'static str, value: f64) -> Result<(), DetectorError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(DetectorError::InvalidThreshold { detector, name, value })
    }
}

fn finding(
    detector: &'static str,
    bias: BiasKind,
    raw_confidence: f64,
    cap: f64,
    evidence: Vec<String>,
    suggestion: String,
) -> Result<Finding, DetectorError> {
    if !raw_confidence.is_finite() {
        return Err(DetectorError::NonFiniteConfidence { detector });
    }
    Ok(Finding {
        bias,
        confidence: clamp_unit(raw_confidence.min(cap)),
        evidence,
        suggestion,
    })
}

/// Patterns that pull a stable error type out of free-form error text.
static ERROR_LABEL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"error\[(E\d{4})\]").unwrap(),
        Regex::new(r"\b([A-Z][A-Za-z]*(?:Error|Exception))\b").unwrap(),
        Regex::new(r"\b(E[A-Z]{3,})\b").unwrap(),
    ]
});

/// Reduce an error message to a label used for homogeneity checks.
///
/// Falls back to the text before the first `:` (lowercased) when no known
/// error shape matches.
pub fn error_label(error: &str) -> String {
    for pattern in ERROR_LABEL_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(error) {
            if let Some(label) = captures.get(1) {
                return label.as_str().to_string();
            }
        }
    }
    let prefix = error.split(':').next().unwrap_or(error).trim().to_lowercase();
    prefix.chars().take(60).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone as _;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn action(kind: ActionKind, file: Option<&str>, secs_ago: i64) -> ActionRecord {
        ActionRecord {
            kind,
            tool: match kind {
                ActionKind::Read => "Read".into(),
                ActionKind::Write => "Edit".into(),
                ActionKind::Exec => "Bash".into(),
            },
            file: file.map(String::from),
            error: None,
            approach: None,
            timestamp: now() - Duration::seconds(secs_ago),
        }
    }

    fn failure(error: &str, approach: Option<&str>, secs_ago: i64) -> ActionRecord {
        ActionRecord {
            error: Some(error.into()),
            approach: approach.map(String::from),
            ..action(ActionKind::Write, Some("src/lib.rs"), secs_ago)
        }
    }

    fn thresholds() -> DetectionThresholds {
        DetectionThresholds::default()
    }

    // -----------------------------------------------------------------------
    // Sunk cost
    // -----------------------------------------------------------------------

    #[test]
    fn test_sunk_cost_fires_on_homogeneous_errors() {
        let history: Vec<ActionRecord> = (0..5)
            .map(|step| failure("TypeError: cannot read x", Some("X"), 500 - step * 100))
            .collect();
        let finding = detect_sunk_cost(&history, now(), &thresholds()).unwrap().unwrap();
        assert_eq!(finding.bias, BiasKind::SunkCost);
        assert!(finding.confidence >= thresholds().detection_threshold);
        assert!(finding.confidence <= thresholds().max_confidence);
    }

    #[test]
    fn test_sunk_cost_confidence_drops_with_mixed_errors() {
        let same: Vec<ActionRecord> = (0..4)
            .map(|step| failure("TypeError: a", Some("X"), 400 - step * 60))
            .collect();
        let mixed = vec![
            failure("TypeError: a", Some("X"), 400),
            failure("ENOENT: no such file", Some("X"), 300),
            failure("error[E0308]: mismatched types", Some("X"), 200),
            failure("TypeError: b", Some("X"), 100),
        ];
        let same_confidence = detect_sunk_cost(&same, now(), &thresholds()).unwrap().unwrap().confidence;
        let mixed_confidence = detect_sunk_cost(&mixed, now(), &thresholds()).unwrap().unwrap().confidence;
        assert!(mixed_confidence < same_confidence);
    }

    #[test]
    fn test_sunk_cost_only_counts_current_approach() {
        let mut history: Vec<ActionRecord> = (0..4)
            .map(|step| failure("TypeError: a", Some("old"), 500 - step * 50))
            .collect();
        history.push(failure("TypeError: a", Some("new"), 10));
        assert!(detect_sunk_cost(&history, now(), &thresholds()).unwrap().is_none());
    }

    #[test]
    fn test_sunk_cost_ignores_errors_outside_window() {
        let history: Vec<ActionRecord> = (0..5)
            .map(|step| failure("TypeError: a", Some("X"), 3600 + step))
            .collect();
        assert!(detect_sunk_cost(&history, now(), &thresholds()).unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Anchoring
    // -----------------------------------------------------------------------

    #[test]
    fn test_anchoring_fires_on_single_file_focus() {
        let mut history: Vec<ActionRecord> = (0..6)
            .map(|step| action(ActionKind::Write, Some("src/parser.rs"), 1800 - step * 120))
            .collect();
        history.insert(0, action(ActionKind::Read, Some("src/parser.rs"), 2000));
        let finding = detect_anchoring(&history, now(), &thresholds()).unwrap().unwrap();
        assert!(finding.evidence[0].contains("src/parser.rs"));
        assert!(finding.confidence > 0.9);
    }

    #[test]
    fn test_anchoring_requires_narrow_file_set() {
        let mut history: Vec<ActionRecord> = (0..6)
            .map(|step| action(ActionKind::Write, Some("src/parser.rs"), 1800 - step * 120))
            .collect();
        history.push(action(ActionKind::Read, Some("src/lexer.rs"), 100));
        history.push(action(ActionKind::Read, Some("src/ast.rs"), 50));
        assert!(detect_anchoring(&history, now(), &thresholds()).unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Analysis paralysis
    // -----------------------------------------------------------------------

    #[test]
    fn test_paralysis_fires_after_long_read_streak() {
        let mut history = vec![action(ActionKind::Write, Some("a.rs"), 1500)];
        history.extend((0..12).map(|step| action(ActionKind::Read, Some("b.rs"), 1400 - step * 60)));
        let finding = detect_analysis_paralysis(&history, now(), &thresholds()).unwrap().unwrap();
        assert!(finding.confidence >= thresholds().detection_threshold);
    }

    #[test]
    fn test_paralysis_waits_for_idle_window() {
        let mut history = vec![action(ActionKind::Write, Some("a.rs"), 300)];
        history.extend((0..12).map(|step| action(ActionKind::Read, Some("b.rs"), 290 - step * 10)));
        assert!(detect_analysis_paralysis(&history, now(), &thresholds()).unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Overconfidence
    // -----------------------------------------------------------------------

    #[test]
    fn test_overconfidence_fires_on_blind_writes() {
        let history = vec![
            action(ActionKind::Write, Some("a.rs"), 50),
            action(ActionKind::Write, Some("b.rs"), 40),
            action(ActionKind::Write, Some("c.rs"), 30),
            action(ActionKind::Read, Some("d.rs"), 20),
            action(ActionKind::Write, Some("d.rs"), 10),
        ];
        let finding = detect_overconfidence(&history, &thresholds()).unwrap().unwrap();
        assert!(finding.confidence >= thresholds().detection_threshold);
    }

    #[test]
    fn test_overconfidence_lists_each_blind_file_once() {
        let history = vec![
            action(ActionKind::Write, Some("a.rs"), 50),
            action(ActionKind::Write, Some("b.rs"), 40),
            action(ActionKind::Write, Some("a.rs"), 30),
            action(ActionKind::Write, Some("c.rs"), 20),
        ];
        let finding = detect_overconfidence(&history, &thresholds()).unwrap().unwrap();
        assert!(finding.evidence[0].starts_with("4 of 4"));
        assert_eq!(finding.evidence[1], "files: a.rs, b.rs, c.rs");
    }

    #[test]
    fn test_overconfidence_quiet_when_files_were_read() {
        let history = vec![
            action(ActionKind::Read, Some("a.rs"), 60),
            action(ActionKind::Write, Some("a.rs"), 50),
            action(ActionKind::Read, Some("b.rs"), 40),
            action(ActionKind::Write, Some("b.rs"), 30),
            action(ActionKind::Write, Some("c.rs"), 20),
            action(ActionKind::Write, Some("d.rs"), 10),
        ];
        // 2 blind writes out of 4: below the minimum count and the ratio.
        assert!(detect_overconfidence(&history, &thresholds()).unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Recency bias
    // -----------------------------------------------------------------------

    #[test]
    fn test_recency_fires_on_error_spike() {
        let mut history: Vec<ActionRecord> = (0..8)
            .map(|step| action(ActionKind::Exec, None, 1500 - step * 120))
            .collect();
        history.extend((0..3).map(|step| failure("TypeError: a", None, 200 - step * 50)));
        let finding = detect_recency_bias(&history, now(), &thresholds()).unwrap().unwrap();
        assert!(finding.confidence >= thresholds().detection_threshold);
    }

    #[test]
    fn test_recency_needs_minimum_samples() {
        let mut history = vec![action(ActionKind::Exec, None, 1000)];
        history.extend((0..3).map(|step| failure("TypeError: a", None, 200 - step * 50)));
        assert!(detect_recency_bias(&history, now(), &thresholds()).unwrap().is_none());
    }

    #[test]
    fn test_recency_quiet_when_error_rate_is_steady() {
        let mut history = Vec::new();
        for step in 0..8 {
            let record = if step % 2 == 0 {
                failure("TypeError: a", None, 1500 - step * 120)
            } else {
                action(ActionKind::Exec, None, 1500 - step * 120)
            };
            history.push(record);
        }
        history.push(failure("TypeError: a", None, 200));
        history.push(action(ActionKind::Exec, None, 150));
        history.push(failure("TypeError: a", None, 100));
        assert!(detect_recency_bias(&history, now(), &thresholds()).unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Pass-level behaviour
    // -----------------------------------------------------------------------

    #[test]
    fn test_failing_detector_is_isolated() {
        let mut config = thresholds();
        config.sunk_cost_window_secs = 0;
        let history = vec![
            action(ActionKind::Write, Some("a.rs"), 50),
            action(ActionKind::Write, Some("b.rs"), 40),
            action(ActionKind::Write, Some("c.rs"), 30),
        ];
        let report = run_detectors(&history, now(), &config);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, BiasKind::SunkCost);
        assert!(report.findings.iter().any(|finding| finding.bias == BiasKind::Overconfidence));
    }

    #[test]
    fn test_oversized_window_fails_detector_instead_of_panicking() {
        let mut config = thresholds();
        config.sunk_cost_window_secs = i64::MAX;
        config.recency_older_secs = i64::MAX;
        let history = vec![failure("TypeError: a", Some("X"), 30)];

        let report = run_detectors(&history, now(), &config);
        let failed: Vec<BiasKind> = report.failures.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(failed, vec![BiasKind::SunkCost, BiasKind::RecencyBias]);
        assert!(matches!(
            report.failures[0].1,
            DetectorError::InvalidThreshold { name: "sunk_cost_window_secs", .. }
        ));
    }

    #[test]
    fn test_findings_respect_threshold_and_bounds() {
        let mut config = thresholds();
        config.detection_threshold = 0.99;
        let history: Vec<ActionRecord> = (0..5)
            .map(|step| failure("TypeError: a", Some("X"), 300 - step * 30))
            .collect();
        let report = run_detectors(&history, now(), &config);
        assert!(report.findings.is_empty());

        let report = run_detectors(&history, now(), &thresholds());
        assert!(!report.findings.is_empty());
        for finding in &report.findings {
            assert!((0.0..=1.0).contains(&finding.confidence));
            assert!(finding.confidence >= thresholds().detection_threshold);
        }
    }

    #[test]
    fn test_empty_history_produces_nothing() {
        let report = run_detectors(&[], now(), &thresholds());
        assert!(report.findings.is_empty());
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_error_label_shapes() {
        assert_eq!(error_label("error[E0308]: mismatched types"), "E0308");
        assert_eq!(error_label("Uncaught TypeError: x is undefined"), "TypeError");
        assert_eq!(error_label("open failed: ENOENT"), "ENOENT");
        assert_eq!(error_label("Build failed: exit 2"), "build failed");
    }
}
