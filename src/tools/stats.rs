use std::collections::HashMap;

use dashmap::DashMap;
use serde::Serialize;

use crate::tools::call::ToolName;
use crate::tools::types::ToolErrorCode;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStats {
    pub total_executions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub average_execution_time_ms: f64,
    pub errors_by_code: HashMap<ToolErrorCode, u64>,
}

impl ToolStats {
    fn record(&mut self, elapsed_ms: u64, error: Option<ToolErrorCode>) {
        self.total_executions += 1;
        match error {
            None => self.success_count += 1,
            Some(code) => {
                self.failure_count += 1;
                *self.errors_by_code.entry(code).or_insert(0) += 1;
            }
        }
        let n = self.total_executions as f64;
        self.average_execution_time_ms += (elapsed_ms as f64 - self.average_execution_time_ms) / n;
    }
}

/// Sink for per-tool execution statistics, shared by every run that uses the
/// same registry.
pub trait StatsCollector: Send + Sync {
    fn record(&self, tool: ToolName, elapsed_ms: u64, error: Option<ToolErrorCode>);

    fn snapshot(&self, tool: ToolName) -> Option<ToolStats>;
}

/// Lock-per-key map; concurrent runs never lose an update.
#[derive(Debug, Default)]
pub struct InMemoryStats {
    by_tool: DashMap<ToolName, ToolStats>,
}

impl InMemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> HashMap<ToolName, ToolStats> {
        self.by_tool
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}

impl StatsCollector for InMemoryStats {
    fn record(&self, tool: ToolName, elapsed_ms: u64, error: Option<ToolErrorCode>) {
        self.by_tool.entry(tool).or_default().record(elapsed_ms, error);
    }

    fn snapshot(&self, tool: ToolName) -> Option<ToolStats> {
        self.by_tool.get(&tool).map(|s| s.clone())
    }
}
