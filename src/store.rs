//! StateStore: durable state partitions in a local SQLite file.
//!
//! Each partition has a load/save pair. Saves that touch more than one row run
//! in a single transaction, so the file always holds a complete prior snapshot.

use crate::calibration::CalibrationSnapshot;
use crate::error::Result;
use crate::scorer::EmissionCounts;
use crate::types::{
    ActionKind, ActionRecord, IntensityLevel, InterventionDecision, InterventionType,
    ModuleCalibration, PreferenceProfile, Signal, UserResponse,
};

use chrono::{DateTime, Utc};
use sqlx::Row as _;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Sqlite, SqlitePool, Transaction};

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

const MULTIPLIER_KEY: &str = "multiplier";
const SAMPLES_KEY: &str = "samples_since_recalibration";

/// Wraps the SQLite pool holding every durable partition.
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    /// Connect to (or create) the state database at `path`.
    ///
    /// Enables WAL, sets a short busy timeout and runs the embedded schema.
    pub async fn connect(path: &Path) -> Result<Arc<Self>> {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(Arc::new(Self { pool }))
    }

    /// Close the pool so every later call fails.
    #[cfg(test)]
    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }

    // -----------------------------------------------------------------------
    // Action history
    // -----------------------------------------------------------------------

    /// Append one action and trim the ring to `cap` rows.
    pub async fn append_action(&self, action: &ActionRecord, cap: usize) -> Result<()> {
        let mut transaction = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO action_history (kind, tool, file, error, approach, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(action.kind.to_string())
        .bind(&action.tool)
        .bind(&action.file)
        .bind(&action.error)
        .bind(&action.approach)
        .bind(action.timestamp)
        .execute(&mut *transaction)
        .await?;

        sqlx::query(
            "DELETE FROM action_history WHERE id NOT IN (
                 SELECT id FROM action_history ORDER BY id DESC LIMIT ?
             )",
        )
        .bind(cap as i64)
        .execute(&mut *transaction)
        .await?;

        transaction.commit().await?;
        Ok(())
    }

    /// The newest `cap` actions, oldest first.
    pub async fn load_actions(&self, cap: usize) -> Result<Vec<ActionRecord>> {
        let rows: Vec<(String, String, Option<String>, Option<String>, Option<String>, DateTime<Utc>)> =
            sqlx::query_as(
                "SELECT kind, tool, file, error, approach, occurred_at FROM (
                     SELECT id, kind, tool, file, error, approach, occurred_at
                     FROM action_history ORDER BY id DESC LIMIT ?
                 ) ORDER BY id ASC",
            )
            .bind(cap as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(kind, tool, file, error, approach, timestamp)| ActionRecord {
                kind: ActionKind::from_str_lossy(&kind),
                tool,
                file,
                error,
                approach,
                timestamp,
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Signal buffer
    // -----------------------------------------------------------------------

    /// Append a flushed batch of signals.
    pub async fn flush_signals(&self, signals: &[Signal]) -> Result<()> {
        if signals.is_empty() {
            return Ok(());
        }
        let mut transaction = self.pool.begin().await?;
        for signal in signals {
            sqlx::query(
                "INSERT INTO signal_buffer (kind, confidence, data, observed_at) VALUES (?, ?, ?, ?)",
            )
            .bind(signal.kind.to_string())
            .bind(signal.confidence)
            .bind(signal.data.to_string())
            .bind(signal.timestamp)
            .execute(&mut *transaction)
            .await?;
        }
        transaction.commit().await?;
        tracing::debug!(count = signals.len(), "signal batch flushed");
        Ok(())
    }

    /// Total signals ever written to the buffer table.
    pub async fn buffered_signal_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM signal_buffer")
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;
        Ok(count.max(0) as u64)
    }

    // -----------------------------------------------------------------------
    // Interventions and cooldowns
    // -----------------------------------------------------------------------

    /// Record an emitted decision and its cooldown timestamp together.
    pub async fn save_emission(&self, decision: &InterventionDecision) -> Result<()> {
        let mut transaction = self.pool.begin().await?;
        insert_intervention(&mut transaction, decision).await?;
        sqlx::query(
            "INSERT INTO cooldowns (intervention_type, last_emitted_at) VALUES (?, ?)
             ON CONFLICT(intervention_type) DO UPDATE SET last_emitted_at = excluded.last_emitted_at",
        )
        .bind(decision.intervention_type.key())
        .bind(decision.created_at)
        .execute(&mut *transaction)
        .await?;
        transaction.commit().await?;
        Ok(())
    }

    /// Last emission time per intervention type key.
    pub async fn load_cooldowns(&self) -> Result<Vec<(String, DateTime<Utc>)>> {
        let rows: Vec<(String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT intervention_type, last_emitted_at FROM cooldowns ORDER BY intervention_type",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Emission times at or after `since`, oldest first.
    pub async fn load_emission_times(&self, since: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
        let rows: Vec<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT created_at FROM interventions WHERE created_at >= ? ORDER BY created_at",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(created_at,)| created_at).collect())
    }

    /// The newest `limit` decisions, oldest first.
    pub async fn load_interventions(&self, limit: usize) -> Result<Vec<InterventionDecision>> {
        let rows = sqlx::query(
            "SELECT * FROM (
                 SELECT id, intervention_type, intensity, score, reasons, message, created_at,
                        response, response_latency_secs
                 FROM interventions ORDER BY created_at DESC, rowid DESC LIMIT ?
             ) ORDER BY created_at ASC",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().filter_map(|row| row_to_decision(row).transpose()).collect()
    }

    /// A single decision by id, including ones evicted from memory.
    pub async fn load_intervention(&self, id: &str) -> Result<Option<InterventionDecision>> {
        let row = sqlx::query(
            "SELECT id, intervention_type, intensity, score, reasons, message, created_at,
                    response, response_latency_secs
             FROM interventions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_decision(&row),
            None => Ok(None),
        }
    }

    /// Totals per type, band and response over every recorded decision.
    pub async fn emission_counts(&self) -> Result<EmissionCounts> {
        let mut counts = EmissionCounts::default();

        let by_type: Vec<(String, i64)> = sqlx::query_as(
            "SELECT intervention_type, COUNT(*) FROM interventions GROUP BY intervention_type",
        )
        .fetch_all(&self.pool)
        .await?;
        for (kind, count) in by_type {
            counts.total += count.max(0) as u64;
            counts.by_type.insert(kind, count.max(0) as u64);
        }

        let by_intensity: Vec<(String, i64)> =
            sqlx::query_as("SELECT intensity, COUNT(*) FROM interventions GROUP BY intensity")
                .fetch_all(&self.pool)
                .await?;
        counts.by_intensity = by_intensity
            .into_iter()
            .map(|(intensity, count)| (intensity, count.max(0) as u64))
            .collect();

        let responses: Vec<(String, i64)> = sqlx::query_as(
            "SELECT response, COUNT(*) FROM interventions WHERE response IS NOT NULL GROUP BY response",
        )
        .fetch_all(&self.pool)
        .await?;
        counts.responses = responses
            .into_iter()
            .map(|(response, count)| (response, count.max(0) as u64))
            .collect();

        Ok(counts)
    }

    // -----------------------------------------------------------------------
    // Calibration and preferences
    // -----------------------------------------------------------------------

    /// Record a response together with the calibration state it produced.
    pub async fn save_response(
        &self,
        decision: &InterventionDecision,
        responded_at: DateTime<Utc>,
        calibration: &CalibrationSnapshot,
    ) -> Result<()> {
        let mut transaction = self.pool.begin().await?;
        sqlx::query(
            "UPDATE interventions SET response = ?, response_latency_secs = ?, responded_at = ?
             WHERE id = ? AND response IS NULL",
        )
        .bind(decision.response.map(|response| response.to_string()))
        .bind(decision.response_latency_secs)
        .bind(responded_at)
        .bind(&decision.id)
        .execute(&mut *transaction)
        .await?;
        write_calibration(&mut transaction, calibration).await?;
        transaction.commit().await?;
        Ok(())
    }

    /// Overwrite module accuracy, the multiplier state and the preference
    /// profile in one transaction.
    pub async fn save_calibration(&self, calibration: &CalibrationSnapshot) -> Result<()> {
        let mut transaction = self.pool.begin().await?;
        write_calibration(&mut transaction, calibration).await?;
        transaction.commit().await?;
        Ok(())
    }

    /// Load the calibration partition, or `None` on a fresh database.
    ///
    /// `response_window` bounds how many recent responses are read back.
    pub async fn load_calibration(&self, response_window: usize) -> Result<Option<CalibrationSnapshot>> {
        let module_rows: Vec<(String, i64, i64, f64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT module, correct, total, accuracy, last_updated FROM module_calibration",
        )
        .fetch_all(&self.pool)
        .await?;

        let state_rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM calibration_state")
                .fetch_all(&self.pool)
                .await?;

        let profile_row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT preferred_intensity, effective_types, disliked_types
             FROM preference_profile WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        if module_rows.is_empty() && state_rows.is_empty() && profile_row.is_none() {
            return Ok(None);
        }

        let modules: BTreeMap<String, ModuleCalibration> = module_rows
            .into_iter()
            .map(|(module, correct, total, accuracy, last_updated)| {
                (
                    module,
                    ModuleCalibration {
                        correct: correct.max(0) as u64,
                        total: total.max(0) as u64,
                        accuracy,
                        last_updated,
                    },
                )
            })
            .collect();

        let state: BTreeMap<String, String> = state_rows.into_iter().collect();
        let multiplier = state
            .get(MULTIPLIER_KEY)
            .and_then(|value| value.parse::<f64>().ok())
            .unwrap_or(1.0);
        let samples_since_recalibration = state
            .get(SAMPLES_KEY)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);

        let preferences = match profile_row {
            Some((preferred_intensity, effective_types, disliked_types)) => PreferenceProfile {
                preferred_intensity: IntensityLevel::from_str_lossy(&preferred_intensity),
                effective_types: serde_json::from_str(&effective_types)?,
                disliked_types: serde_json::from_str(&disliked_types)?,
            },
            None => PreferenceProfile::default(),
        };

        let response_rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT intervention_type, response FROM (
                 SELECT intervention_type, response, responded_at FROM interventions
                 WHERE response IS NOT NULL ORDER BY responded_at DESC LIMIT ?
             ) ORDER BY responded_at ASC",
        )
        .bind(response_window as i64)
        .fetch_all(&self.pool)
        .await?;
        let recent_responses = response_rows
            .into_iter()
            .filter_map(|(kind, response)| {
                UserResponse::from_str_lossy(&response).map(|response| (kind, response))
            })
            .collect();

        Ok(Some(CalibrationSnapshot {
            modules,
            multiplier,
            samples_since_recalibration,
            preferences,
            recent_responses,
        }))
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

async fn insert_intervention(
    transaction: &mut Transaction<'_, Sqlite>,
    decision: &InterventionDecision,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO interventions
             (id, intervention_type, intensity, score, reasons, message, created_at,
              response, response_latency_secs)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&decision.id)
    .bind(decision.intervention_type.key())
    .bind(decision.intensity.to_string())
    .bind(decision.score)
    .bind(serde_json::to_string(&decision.reasons)?)
    .bind(&decision.message)
    .bind(decision.created_at)
    .bind(decision.response.map(|response| response.to_string()))
    .bind(decision.response_latency_secs)
    .execute(&mut **transaction)
    .await?;
    Ok(())
}

async fn write_calibration(
    transaction: &mut Transaction<'_, Sqlite>,
    calibration: &CalibrationSnapshot,
) -> Result<()> {
    for (module, record) in &calibration.modules {
        sqlx::query(
            "INSERT INTO module_calibration (module, correct, total, accuracy, last_updated)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(module) DO UPDATE SET
                 correct = excluded.correct,
                 total = excluded.total,
                 accuracy = excluded.accuracy,
                 last_updated = excluded.last_updated",
        )
        .bind(module)
        .bind(record.correct as i64)
        .bind(record.total as i64)
        .bind(record.accuracy)
        .bind(record.last_updated)
        .execute(&mut **transaction)
        .await?;
    }

    for (key, value) in [
        (MULTIPLIER_KEY, calibration.multiplier.to_string()),
        (SAMPLES_KEY, calibration.samples_since_recalibration.to_string()),
    ] {
        sqlx::query(
            "INSERT INTO calibration_state (key, value, updated_at) VALUES (?, ?, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .execute(&mut **transaction)
        .await?;
    }

    let preferences = &calibration.preferences;
    sqlx::query(
        "INSERT INTO preference_profile (id, preferred_intensity, effective_types, disliked_types, updated_at)
         VALUES (1, ?, ?, ?, datetime('now'))
         ON CONFLICT(id) DO UPDATE SET
             preferred_intensity = excluded.preferred_intensity,
             effective_types = excluded.effective_types,
             disliked_types = excluded.disliked_types,
             updated_at = excluded.updated_at",
    )
    .bind(preferences.preferred_intensity.to_string())
    .bind(serde_json::to_string(&preferences.effective_types)?)
    .bind(serde_json::to_string(&preferences.disliked_types)?)
    .execute(&mut **transaction)
    .await?;

    Ok(())
}

/// Decode one intervention row. Rows with an unknown type key are skipped.
fn row_to_decision(row: &SqliteRow) -> Result<Option<InterventionDecision>> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("intervention_type")?;
    let Some(intervention_type) = InterventionType::from_key(&kind) else {
        tracing::warn!(%id, kind, "skipping intervention with unknown type");
        return Ok(None);
    };
    let intensity: String = row.try_get("intensity")?;
    let reasons: String = row.try_get("reasons")?;
    let response: Option<String> = row.try_get("response")?;

    Ok(Some(InterventionDecision {
        id,
        intervention_type,
        intensity: IntensityLevel::from_str_lossy(&intensity),
        score: row.try_get("score")?,
        reasons: serde_json::from_str(&reasons)?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
        response: response.as_deref().and_then(UserResponse::from_str_lossy),
        response_latency_secs: row.try_get("response_latency_secs")?,
    }))
}

/// Embedded schema. Every statement is `IF NOT EXISTS`, so re-running is safe.
const SCHEMA: &str = r#"
-- Rolling action log (ring buffer, trimmed on append)
CREATE TABLE IF NOT EXISTS action_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    tool TEXT NOT NULL,
    file TEXT,
    error TEXT,
    approach TEXT,
    occurred_at TEXT NOT NULL
);

-- Signals flushed when no consumer took them
CREATE TABLE IF NOT EXISTS signal_buffer (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    confidence REAL NOT NULL,
    data TEXT NOT NULL,
    observed_at TEXT NOT NULL,
    flushed_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Last emission per intervention type
CREATE TABLE IF NOT EXISTS cooldowns (
    intervention_type TEXT PRIMARY KEY,
    last_emitted_at TEXT NOT NULL
);

-- Emitted interventions and their responses
CREATE TABLE IF NOT EXISTS interventions (
    id TEXT PRIMARY KEY,
    intervention_type TEXT NOT NULL,
    intensity TEXT NOT NULL,
    score REAL NOT NULL,
    reasons TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL,
    response TEXT,
    response_latency_secs REAL,
    responded_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_interventions_created ON interventions(created_at);
CREATE INDEX IF NOT EXISTS idx_interventions_responded ON interventions(responded_at);

-- Per-module accuracy, including "overall"
CREATE TABLE IF NOT EXISTS module_calibration (
    module TEXT PRIMARY KEY,
    correct INTEGER NOT NULL DEFAULT 0,
    total INTEGER NOT NULL DEFAULT 0,
    accuracy REAL NOT NULL,
    last_updated TEXT NOT NULL
);

-- Global calibration values (multiplier, batch counter)
CREATE TABLE IF NOT EXISTS calibration_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Singleton preference profile
CREATE TABLE IF NOT EXISTS preference_profile (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    preferred_intensity TEXT NOT NULL,
    effective_types TEXT NOT NULL DEFAULT '[]',
    disliked_types TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BiasKind, SignalKind};

    use chrono::{Duration, TimeZone as _};

    async fn open_store() -> Arc<StateStore> {
        let path = std::env::temp_dir().join(format!("nudge_store_test_{}.db", uuid::Uuid::new_v4()));
        StateStore::connect(&path).await.unwrap()
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 8, 30, 0).unwrap()
    }

    fn decision(kind: InterventionType, offset_secs: i64) -> InterventionDecision {
        InterventionDecision {
            id: uuid::Uuid::new_v4().to_string(),
            intervention_type: kind,
            intensity: IntensityLevel::Nudge,
            score: 0.5,
            reasons: vec!["anchoring 0.90: a.rs (+0.45)".into()],
            message: "Worth a thought: look elsewhere".into(),
            created_at: base() + Duration::seconds(offset_secs),
            response: None,
            response_latency_secs: None,
        }
    }

    // -----------------------------------------------------------------------
    // Actions and signals
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_action_ring_is_trimmed_to_cap() {
        let store = open_store().await;
        for step in 0..8 {
            let action = ActionRecord {
                kind: ActionKind::Write,
                tool: "Edit".into(),
                file: Some(format!("src/file_{step}.rs")),
                error: (step % 2 == 0).then(|| "TypeError: x".to_string()),
                approach: Some("X".into()),
                timestamp: base() + Duration::seconds(step),
            };
            store.append_action(&action, 5).await.unwrap();
        }

        let actions = store.load_actions(100).await.unwrap();
        assert_eq!(actions.len(), 5);
        assert_eq!(actions[0].file.as_deref(), Some("src/file_3.rs"));
        assert_eq!(actions[4].timestamp, base() + Duration::seconds(7));
        assert_eq!(actions[4].kind, ActionKind::Write);
    }

    #[tokio::test]
    async fn test_signal_flush_appends() {
        let store = open_store().await;
        let signals: Vec<Signal> = (0..3)
            .map(|step| {
                Signal::new(
                    SignalKind::FastAction,
                    0.6,
                    serde_json::json!({ "gap_ms": 500 }),
                    base() + Duration::seconds(step),
                )
            })
            .collect();
        store.flush_signals(&signals).await.unwrap();
        store.flush_signals(&signals[..1]).await.unwrap();
        assert_eq!(store.buffered_signal_count().await.unwrap(), 4);
    }

    // -----------------------------------------------------------------------
    // Interventions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_emission_round_trip() {
        let store = open_store().await;
        let first = decision(InterventionType::Bias(BiasKind::Anchoring), 0);
        let second = decision(InterventionType::Burnout, 120);
        store.save_emission(&first).await.unwrap();
        store.save_emission(&second).await.unwrap();

        let loaded = store.load_interventions(10).await.unwrap();
        assert_eq!(loaded, vec![first.clone(), second.clone()]);

        let cooldowns = store.load_cooldowns().await.unwrap();
        assert_eq!(
            cooldowns,
            vec![
                ("anchoring".to_string(), first.created_at),
                ("burnout".to_string(), second.created_at),
            ]
        );

        let recent = store
            .load_emission_times(base() + Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(recent, vec![second.created_at]);

        let counts = store.emission_counts().await.unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.by_intensity.get("nudge"), Some(&2));
    }

    #[tokio::test]
    async fn test_response_and_calibration_saved_together() {
        let store = open_store().await;
        let mut emitted = decision(InterventionType::Bias(BiasKind::SunkCost), 0);
        store.save_emission(&emitted).await.unwrap();

        emitted.response = Some(UserResponse::Ignored);
        emitted.response_latency_secs = Some(30.0);
        let snapshot = CalibrationSnapshot {
            modules: BTreeMap::from([(
                "sunk_cost".to_string(),
                ModuleCalibration {
                    correct: 0,
                    total: 1,
                    accuracy: 0.4,
                    last_updated: base(),
                },
            )]),
            multiplier: 0.85,
            samples_since_recalibration: 1,
            preferences: PreferenceProfile {
                preferred_intensity: IntensityLevel::Hint,
                effective_types: vec!["burnout".into()],
                disliked_types: vec!["sunk_cost".into()],
            },
            recent_responses: vec![("sunk_cost".into(), UserResponse::Ignored)],
        };
        store
            .save_response(&emitted, base() + Duration::seconds(30), &snapshot)
            .await
            .unwrap();

        let loaded = store.load_calibration(10).await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        let reloaded = store.load_intervention(&emitted.id).await.unwrap().unwrap();
        assert_eq!(reloaded.response, Some(UserResponse::Ignored));
        assert_eq!(reloaded.response_latency_secs, Some(30.0));
        assert!(store.load_intervention("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fresh_database_has_no_calibration() {
        let store = open_store().await;
        assert!(store.load_calibration(10).await.unwrap().is_none());
        assert!(store.load_actions(10).await.unwrap().is_empty());
        assert_eq!(store.emission_counts().await.unwrap(), EmissionCounts::default());
    }

    #[tokio::test]
    async fn test_closed_pool_surfaces_database_errors() {
        let store = open_store().await;
        store.close().await;

        let error = store
            .save_emission(&decision(InterventionType::Bias(BiasKind::Anchoring), 0))
            .await
            .unwrap_err();
        assert!(matches!(error, crate::error::NudgeError::Database(_)));
        assert!(store.flush_signals(&[Signal::new(
            SignalKind::BreakTaken,
            0.9,
            serde_json::Value::Null,
            base(),
        )])
        .await
        .is_err());
    }
}
