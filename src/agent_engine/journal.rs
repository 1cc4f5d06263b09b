use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent_engine::state::{AutomationResult, ExecutionStep, RunFailure, RunStatus, RunTiming};
use crate::config::JournalConfig;
use crate::errors::{WebClawError, WebClawResult};
use crate::llm::types::TokenUsage;

const JOURNAL_FILE: &str = "runs.jsonl";

/// One line of the run journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalRecord {
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
    pub intent: String,
    pub status: RunStatus,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunFailure>,
    pub steps: Vec<ExecutionStep>,
    pub iterations: u32,
    pub usage: TokenUsage,
    pub timing: RunTiming,
}

impl JournalRecord {
    pub fn from_result(intent: &str, result: &AutomationResult) -> Self {
        Self {
            run_id: result.run_id.clone(),
            recorded_at: Utc::now(),
            intent: intent.to_string(),
            status: result.status,
            success: result.success,
            error: result.error.clone(),
            steps: result.execution_history.clone(),
            iterations: result.iterations,
            usage: result.usage,
            timing: result.timing.clone(),
        }
    }
}

/// Append-only JSONL audit trail of finished runs.
pub struct RunJournal {
    file_path: PathBuf,
}

impl RunJournal {
    pub fn new(dir: &Path) -> WebClawResult<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            file_path: dir.join(JOURNAL_FILE),
        })
    }

    /// `None` when the journal is disabled.
    pub fn from_config(cfg: &JournalConfig) -> WebClawResult<Option<Self>> {
        if !cfg.enabled {
            return Ok(None);
        }
        let dir = match &cfg.dir {
            Some(dir) => dir.clone(),
            None => default_dir()?,
        };
        Self::new(&dir).map(Some)
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn append(&self, intent: &str, result: &AutomationResult) -> WebClawResult<()> {
        let line = serde_json::to_string(&JournalRecord::from_result(intent, result))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        writeln!(file, "{line}")?;
        tracing::debug!(path = %self.file_path.display(), run_id = %result.run_id, "run journaled");
        Ok(())
    }

    pub fn read_all(&self) -> WebClawResult<Vec<JournalRecord>> {
        if !self.file_path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.file_path)?;
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(WebClawError::from))
            .collect()
    }
}

/// `<data dir>/webclaw`, e.g. `~/.local/share/webclaw` on Linux.
fn default_dir() -> WebClawResult<PathBuf> {
    dirs::data_dir()
        .map(|d| d.join("webclaw"))
        .ok_or_else(|| WebClawError::Config("no data directory on this platform; set journal.dir".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(run_id: &str, status: RunStatus) -> AutomationResult {
        let now = Utc::now();
        AutomationResult {
            run_id: run_id.into(),
            status,
            success: status == RunStatus::Completed,
            result: None,
            error: None,
            execution_history: Vec::new(),
            iterations: 1,
            timing: RunTiming {
                started_at: now,
                finished_at: now,
                duration_ms: 0,
                planning_ms: 0,
                execution_ms: 0,
            },
            usage: TokenUsage::default(),
        }
    }

    #[test]
    fn appends_one_line_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let journal = RunJournal::new(dir.path()).unwrap();
        journal.append("first", &result("a", RunStatus::Completed)).unwrap();
        journal.append("second", &result("b", RunStatus::Cancelled)).unwrap();

        let records = journal.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].run_id, "a");
        assert_eq!(records[1].status, RunStatus::Cancelled);
        assert_eq!(records[1].intent, "second");
    }

    #[test]
    fn disabled_journal_is_none() {
        let cfg = JournalConfig {
            enabled: false,
            dir: None,
        };
        assert!(RunJournal::from_config(&cfg).unwrap().is_none());
    }
}
