use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{WebClawError, WebClawResult};
use crate::llm::types::TokenUsage;
use crate::session::analyzer::RecordedSession;
use crate::tools::types::ToolResult;

/// Lifecycle phases of one automation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Planning,
    Executing,
    Reflecting,
    Recovering,
    Completed,
    Failed,
    Cancelled,
}

impl AgentPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Executing,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }
}

/// One planned step as the planner emits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    #[serde(default)]
    pub reasoning: String,
    #[serde(alias = "tool_name", alias = "name")]
    pub tool: String,
    #[serde(default = "empty_object", alias = "params", alias = "input")]
    pub parameters: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl PlannedStep {
    pub fn new(tool: &str, parameters: Value) -> Self {
        Self {
            reasoning: String::new(),
            tool: tool.to_string(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub step_number: u32,
    pub reasoning: String,
    pub tool_name: String,
    pub parameters: Value,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionStep {
    pub fn new(step_number: u32, planned: PlannedStep) -> Self {
        Self {
            step_number,
            reasoning: planned.reasoning,
            tool_name: planned.tool,
            parameters: planned.parameters,
            status: StepStatus::Pending,
            result: None,
            error: None,
            retry_count: 0,
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, allowed_from: &[StepStatus], to: StepStatus) -> WebClawResult<()> {
        if !allowed_from.contains(&self.status) {
            return Err(WebClawError::InvalidTransition {
                step: self.step_number,
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// pending → executing
    pub fn begin(&mut self) -> WebClawResult<()> {
        self.transition(&[StepStatus::Pending], StepStatus::Executing)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Stores the latest attempt without finishing the step.
    pub fn record_attempt(&mut self, result: ToolResult) {
        self.error = result.error.as_ref().map(|e| e.to_string());
        self.result = Some(result);
    }

    /// executing → success
    pub fn succeed(&mut self, result: ToolResult) -> WebClawResult<()> {
        self.transition(&[StepStatus::Executing], StepStatus::Success)?;
        self.error = None;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// executing → failed. `None` keeps the last recorded attempt.
    pub fn fail(&mut self, result: Option<ToolResult>) -> WebClawResult<()> {
        self.transition(&[StepStatus::Executing], StepStatus::Failed)?;
        if let Some(result) = result {
            self.record_attempt(result);
        }
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// pending | executing → skipped
    pub fn skip(&mut self, reason: &str) -> WebClawResult<()> {
        self.transition(&[StepStatus::Pending, StepStatus::Executing], StepStatus::Skipped)?;
        self.error = Some(reason.to_string());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn one_line(&self) -> String {
        format!(
            "{}. {} {} -> {}{}",
            self.step_number,
            self.tool_name,
            self.parameters,
            self.status.as_str(),
            self.error.as_deref().map(|e| format!(" ({e})")).unwrap_or_default()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub intent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
    pub steps: Vec<ExecutionStep>,
    /// 0 for the first plan, +1 per replan.
    pub revision: u32,
}

impl ExecutionPlan {
    pub fn new(intent: &str, expected_outcome: Option<String>, planned: Vec<PlannedStep>) -> Self {
        let steps = planned
            .into_iter()
            .enumerate()
            .map(|(i, p)| ExecutionStep::new(i as u32 + 1, p))
            .collect();
        Self {
            intent: intent.to_string(),
            expected_outcome,
            steps,
            revision: 0,
        }
    }

    /// New plan keeping every finished step and appending `tail`.
    /// Unfinished steps of the old plan are dropped.
    pub fn spliced(&self, tail: Vec<PlannedStep>, expected_outcome: Option<String>) -> Self {
        let mut steps: Vec<ExecutionStep> = self
            .steps
            .iter()
            .filter(|s| s.status.is_finished())
            .cloned()
            .collect();
        let offset = steps.len() as u32;
        steps.extend(
            tail.into_iter()
                .enumerate()
                .map(|(i, p)| ExecutionStep::new(offset + i as u32 + 1, p)),
        );
        Self {
            intent: self.intent.clone(),
            expected_outcome: expected_outcome.or_else(|| self.expected_outcome.clone()),
            steps,
            revision: self.revision + 1,
        }
    }

    pub fn next_open_step(&self) -> Option<usize> {
        self.steps.iter().position(|s| !s.status.is_finished())
    }

    pub fn finished_steps(&self) -> impl Iterator<Item = &ExecutionStep> {
        self.steps.iter().filter(|s| s.status.is_finished())
    }
}

/// Observable state of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub run_id: String,
    pub phase: AgentPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
    pub current_step: usize,
    pub iteration: u32,
    pub errors: Vec<String>,
    pub is_replanning: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
}

impl AgentState {
    pub fn new(run_id: String) -> Self {
        Self {
            run_id,
            phase: AgentPhase::Planning,
            plan: None,
            current_step: 0,
            iteration: 0,
            errors: Vec::new(),
            is_replanning: false,
            status: None,
        }
    }

    pub fn history(&self) -> Vec<ExecutionStep> {
        self.plan
            .as_ref()
            .map(|p| p.finished_steps().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new(String::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRequest {
    pub user_intent: String,
    #[serde(default)]
    pub recorded_session: Option<RecordedSession>,
    #[serde(default)]
    pub start_url: Option<String>,
    #[serde(default)]
    pub expected_outcome: Option<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl AutomationRequest {
    pub fn new(user_intent: impl Into<String>) -> Self {
        Self {
            user_intent: user_intent.into(),
            ..Default::default()
        }
    }
}

/// What the user sees when a run fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub message: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub succeeded_steps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTiming {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub planning_ms: u64,
    pub execution_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationResult {
    pub run_id: String,
    pub status: RunStatus,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunFailure>,
    pub execution_history: Vec<ExecutionStep>,
    pub iterations: u32,
    pub timing: RunTiming,
    pub usage: TokenUsage,
}
