use std::io::Write;
use std::path::{Path, PathBuf};

use crate::agent_engine::state::{StepResult, Summary};
use crate::errors::PilotResult;
use crate::planner::types::HistoryEntry;

/// Append-only record of every executed step of one task, plus the compact
/// history the planner sees.
pub struct ExecutionLedger {
    results: Vec<StepResult>,
    history: Vec<HistoryEntry>,
    file_path: Option<PathBuf>,
}

impl ExecutionLedger {
    pub fn in_memory() -> Self {
        Self { results: Vec::new(), history: Vec::new(), file_path: None }
    }

    /// A ledger that also appends each result as one JSON line under the
    /// platform data directory.
    pub fn persistent(task_id: &str) -> Self {
        let file_path = ledger_dir().join(format!("task_{task_id}.jsonl"));
        Self { file_path: Some(file_path), ..Self::in_memory() }
    }

    pub fn record(&mut self, result: StepResult) {
        self.history.push(HistoryEntry {
            id: result.step_id.clone(),
            description: result.description.clone(),
            success: result.success,
            error: result.error.clone(),
        });
        self.results.push(result);
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "ledger entry not persisted");
        }
    }

    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn last(&self) -> Option<&StepResult> {
        self.results.last()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }

    pub fn summary(&self, iterations: u32) -> Summary {
        let failed = self.failures();
        Summary {
            total: self.results.len(),
            succeeded: self.results.len() - failed,
            failed,
            iterations,
        }
    }

    pub fn into_results(self) -> Vec<StepResult> {
        self.results
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Append the latest result to the JSONL file, if persistence is on.
    fn flush(&self) -> PilotResult<()> {
        let (Some(path), Some(last)) = (&self.file_path, self.results.last()) else {
            return Ok(());
        };
        let line = serde_json::to_string(last)?;
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        tracing::debug!(path = %path.display(), step_id = %last.step_id, "ledger entry flushed");
        Ok(())
    }
}

/// `<data_local_dir>/droidpilot/ledgers`, falling back to the working
/// directory.
fn ledger_dir() -> PathBuf {
    if let Some(base) = dirs::data_local_dir() {
        let dir = base.join("droidpilot").join("ledgers");
        if std::fs::create_dir_all(&dir).is_ok() {
            return dir;
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
