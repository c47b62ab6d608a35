//! Persistence of finalized runs.
//!
//! Sinks are write-only: the core pushes a [`RunRecord`] for every
//! finalized run and never reads anything back.  A sink failure is logged
//! and swallowed; persistence never fails a query.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::engine::{FinalAnswer, ReasoningState};
use crate::error::{CoreError, ErrorKind, Result};
use crate::usage::UsageTotals;

/// How a run finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Answered,
    Failed,
}

/// One finalized run, as handed to a sink.
#[derive(Debug, Serialize)]
pub struct RunRecord<'a> {
    pub query_id: Uuid,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// Present for answered runs.
    pub answer: Option<&'a FinalAnswer>,
    /// Present for failed runs.
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    pub usage: UsageTotals,
    pub state: &'a ReasoningState,
}

impl<'a> RunRecord<'a> {
    pub fn answered(state: &'a ReasoningState, answer: &'a FinalAnswer) -> Self {
        Self {
            query_id: state.query_id,
            finished_at: Utc::now(),
            outcome: RunOutcome::Answered,
            answer: Some(answer),
            error_kind: None,
            error: None,
            usage: state.ledger().totals(),
            state,
        }
    }

    pub fn failed(state: &'a ReasoningState, error: &CoreError) -> Self {
        Self {
            query_id: state.query_id,
            finished_at: Utc::now(),
            outcome: RunOutcome::Failed,
            answer: None,
            error_kind: Some(error.kind()),
            error: Some(error.to_string()),
            usage: state.ledger().totals(),
            state,
        }
    }
}

/// Write-only destination for finalized runs.
pub trait PersistenceSink: Send + Sync {
    fn record(&self, record: &RunRecord<'_>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Emits one structured log line per finalized run.
pub struct TracingSink;

impl PersistenceSink for TracingSink {
    fn record(&self, record: &RunRecord<'_>) -> Result<()> {
        tracing::info!(
            query_id = %record.query_id,
            outcome = ?record.outcome,
            steps = record.state.steps().len(),
            cost = %record.usage.cost,
            attempts = record.usage.attempts,
            error = record.error.as_deref().unwrap_or(""),
            "run finalized"
        );
        Ok(())
    }
}

/// Appends one JSON object per run to a file.
pub struct JsonlSink {
    file: Mutex<File>,
}

impl JsonlSink {
    /// Open (or create) the target file in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| CoreError::Config {
                reason: format!("failed to open sink file {}: {e}", path.display()),
            })?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl PersistenceSink for JsonlSink {
    fn record(&self, record: &RunRecord<'_>) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(&line)
            .map_err(|e| CoreError::Internal(format!("sink write failed: {e}")))?;
        Ok(())
    }
}
