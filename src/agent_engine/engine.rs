use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::event_bus::{EventBus, RunEvent};
use crate::agent_engine::executor::{ExecutionEngine, ExecutorSettings};
use crate::agent_engine::journal::RunJournal;
use crate::agent_engine::loop_control::{LoopConfig, LoopController};
use crate::agent_engine::memory::ConversationMemory;
use crate::agent_engine::planner::Planner;
use crate::agent_engine::state::{
    AgentPhase, AgentState, AutomationRequest, AutomationResult, ExecutionPlan, ExecutionStep, RunFailure, RunStatus,
    RunTiming, StepStatus,
};
use crate::agent_engine::verify::HeuristicVerifier;
use crate::browser::driver::PageDriver;
use crate::config::{AgentConfig, AppConfig, MemoryConfig};
use crate::errors::{WebClawError, WebClawResult};
use crate::llm::registry::ProviderRegistry;
use crate::llm::types::TokenUsage;
use crate::session::analyzer::SessionAnalyzer;
use crate::tools::registry::{ToolContext, ToolRegistry};
use crate::tools::stats::InMemoryStats;

pub const ITERATION_CEILING_MESSAGE: &str = "iteration ceiling exceeded";

/// How a run ends.
#[derive(Debug)]
enum Ending {
    Completed(String),
    Failed {
        step: Option<(u32, String)>,
        message: String,
        suggestions: Vec<String>,
    },
    Cancelled,
}

impl Ending {
    fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            step: None,
            message: message.into(),
            suggestions: Vec::new(),
        }
    }

    fn internal(e: WebClawError) -> Self {
        Self::failed(format!("internal error: {e}"))
    }
}

enum Transition {
    To(AgentPhase),
    Finish(Ending),
}

/// Why the run entered Recovering.
#[derive(Debug)]
enum Trouble {
    StepFailed(usize),
    OutcomeMismatch(String),
}

/// Per-run working state that never leaves the orchestrator.
struct RunCtx<'a> {
    request: &'a AutomationRequest,
    run_id: String,
    token: CancellationToken,
    memory: ConversationMemory,
    loop_ctl: LoopController,
    session_notes: Option<String>,
    trouble: Option<Trouble>,
    replan_reason: Option<String>,
    usage: TokenUsage,
    planning_time: Duration,
    execution_time: Duration,
}

/// Drives one automation run through Planning, Executing, Reflecting and
/// Recovering until it completes, fails or is cancelled.
pub struct Orchestrator {
    planner: Planner,
    executor: ExecutionEngine,
    analyzer: SessionAnalyzer,
    agent: AgentConfig,
    memory: MemoryConfig,
    events: EventBus,
    journal: Option<RunJournal>,
    state: RwLock<AgentState>,
    cancel: Mutex<CancellationToken>,
}

impl Orchestrator {
    pub fn new(planner: Planner, executor: ExecutionEngine, agent: AgentConfig, memory: MemoryConfig) -> Self {
        Self {
            planner,
            executor,
            analyzer: SessionAnalyzer::default(),
            agent,
            memory,
            events: EventBus::new(),
            journal: None,
            state: RwLock::new(AgentState::default()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn with_journal(mut self, journal: RunJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Wires the full stack for one page from configuration.
    pub fn from_config(
        config: &AppConfig,
        driver: Arc<dyn PageDriver>,
        providers: Arc<ProviderRegistry>,
    ) -> WebClawResult<Self> {
        let registry = Arc::new(ToolRegistry::new(Arc::new(InMemoryStats::new())));
        let planner = Planner::new(providers, &registry, config.agent.thinking_budget_tokens)?;
        let executor = ExecutionEngine::new(
            registry,
            ToolContext::new(driver, config.tools.clone()),
            ExecutorSettings::from_config(&config.agent, &config.browser, &config.memory),
            Arc::new(HeuristicVerifier),
        );
        let mut orchestrator = Self::new(planner, executor, config.agent.clone(), config.memory.clone());
        match RunJournal::from_config(&config.journal) {
            Ok(Some(journal)) => {
                tracing::info!(path = %journal.path().display(), "run journal enabled");
                orchestrator.journal = Some(journal);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "run journal unavailable; continuing without it"),
        }
        Ok(orchestrator)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn executor(&self) -> &ExecutionEngine {
        &self.executor
    }

    /// Requests cooperative cancellation of the current run. Takes effect at
    /// the next step boundary or during a retry backoff. A request made while
    /// no run is active cancels the next run before it plans.
    pub fn cancel(&self) {
        tracing::info!("cancellation requested");
        self.cancel.lock().cancel();
    }

    pub async fn get_state(&self) -> AgentState {
        self.state.read().await.clone()
    }

    pub async fn execute_automation(&self, request: AutomationRequest) -> AutomationResult {
        let run_id = uuid::Uuid::new_v4().to_string();
        let token = self.cancel.lock().clone();
        *self.state.write().await = AgentState::new(run_id.clone());

        let started_at = Utc::now();
        let clock = Instant::now();
        tracing::info!(run_id = %run_id, intent = %request.user_intent, "automation run started");
        self.events.publish(RunEvent::RunStarted {
            run_id: run_id.clone(),
            intent: request.user_intent.clone(),
            timestamp: started_at,
        });

        let session_notes = request.recorded_session.as_ref().map(|s| self.analyzer.analyze(s).to_prompt());
        let mut run = RunCtx {
            request: &request,
            run_id: run_id.clone(),
            token,
            memory: ConversationMemory::new(self.memory.max_entries),
            loop_ctl: LoopController::new(LoopConfig::from(&self.agent)),
            session_notes,
            trouble: None,
            replan_reason: None,
            usage: TokenUsage::default(),
            planning_time: Duration::ZERO,
            execution_time: Duration::ZERO,
        };

        let ending = self.drive(&mut run).await;
        if run.token.is_cancelled() {
            *self.cancel.lock() = CancellationToken::new();
        }
        let result = self.finish(&run, ending, started_at, clock).await;

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&request.user_intent, &result) {
                tracing::warn!(error = %e, "failed to journal run");
            }
        }
        self.events.publish(RunEvent::RunFinished {
            run_id: result.run_id.clone(),
            status: result.status,
            success: result.success,
        });
        tracing::info!(
            run_id = %result.run_id,
            status = ?result.status,
            iterations = result.iterations,
            steps = result.execution_history.len(),
            duration_ms = result.timing.duration_ms,
            tokens = result.usage.total(),
            "automation run finished"
        );
        result
    }

    async fn drive(&self, run: &mut RunCtx<'_>) -> Ending {
        let mut phase = AgentPhase::Planning;
        loop {
            if run.token.is_cancelled() {
                return Ending::Cancelled;
            }
            let transition = match phase {
                AgentPhase::Planning => self.plan_phase(run).await,
                AgentPhase::Executing => self.execute_phase(run).await,
                AgentPhase::Reflecting => self.reflect_phase(run).await,
                AgentPhase::Recovering => self.recover_phase(run).await,
                AgentPhase::Completed | AgentPhase::Failed | AgentPhase::Cancelled => {
                    return Ending::failed(format!("run loop entered terminal phase {phase:?}"));
                }
            };
            match transition {
                Transition::To(next) => {
                    if next != phase {
                        self.set_phase(run, phase, next).await;
                    }
                    phase = next;
                }
                Transition::Finish(ending) => return ending,
            }
        }
    }

    // ── Phases ───────────────────────────────────────────────────────────────

    async fn plan_phase(&self, run: &mut RunCtx<'_>) -> Transition {
        if !run.loop_ctl.begin_iteration() {
            return Transition::Finish(Ending::failed(ITERATION_CEILING_MESSAGE));
        }
        let existing = {
            let mut state = self.state.write().await;
            state.iteration = run.loop_ctl.iteration();
            state.is_replanning = state.plan.is_some();
            state.plan.clone()
        };

        let context = self.executor.capture_context().await;
        let clock = Instant::now();
        let drafted = match (&existing, run.replan_reason.take()) {
            (Some(plan), Some(reason)) => {
                tracing::info!(run_id = %run.run_id, iteration = run.loop_ctl.iteration(), reason = %reason, "replanning");
                let history: Vec<ExecutionStep> = plan.finished_steps().cloned().collect();
                self.planner.replan(&reason, &context, &history, &mut run.memory).await
            }
            _ => {
                self.planner
                    .plan(run.request, run.session_notes.as_deref(), &context, &mut run.memory)
                    .await
            }
        };
        run.planning_time += clock.elapsed();

        let draft = match drafted {
            Ok(draft) => draft,
            Err(e) => {
                tracing::error!(run_id = %run.run_id, error = %e, "planning failed");
                return Transition::Finish(Ending::failed(format!("planning failed: {e}")));
            }
        };
        run.usage.add(draft.usage);

        let plan = match existing {
            Some(old) => {
                let expected = if run.request.expected_outcome.is_some() {
                    None
                } else {
                    draft.expected_outcome
                };
                old.spliced(draft.steps, expected)
            }
            None => ExecutionPlan::new(&run.request.user_intent, draft.expected_outcome, draft.steps),
        };
        let event = RunEvent::PlanReady {
            run_id: run.run_id.clone(),
            revision: plan.revision,
            steps: plan
                .steps
                .iter()
                .filter(|s| !s.status.is_finished())
                .map(|s| format!("{} {}", s.tool_name, s.parameters))
                .collect(),
            expected_outcome: plan.expected_outcome.clone(),
        };
        {
            let mut state = self.state.write().await;
            state.current_step = plan.next_open_step().unwrap_or(plan.steps.len());
            state.plan = Some(plan);
            state.is_replanning = false;
        }
        self.events.publish(event);
        Transition::To(AgentPhase::Executing)
    }

    async fn execute_phase(&self, run: &mut RunCtx<'_>) -> Transition {
        let next = {
            let mut state = self.state.write().await;
            let Some(plan) = state.plan.as_mut() else {
                return Transition::Finish(Ending::failed("no plan to execute"));
            };
            match plan.next_open_step() {
                None => None,
                Some(index) => {
                    let step = &mut plan.steps[index];
                    if step.status == StepStatus::Pending {
                        if let Err(e) = step.begin() {
                            return Transition::Finish(Ending::internal(e));
                        }
                    }
                    let snapshot = step.clone();
                    state.current_step = index;
                    Some((index, snapshot))
                }
            }
        };
        let Some((index, step)) = next else {
            return Transition::To(AgentPhase::Reflecting);
        };

        self.events.publish(RunEvent::StepStarted {
            run_id: run.run_id.clone(),
            step_number: step.step_number,
            tool_name: step.tool_name.clone(),
            attempt: step.retry_count + 1,
        });
        let outcome = self.executor.execute_step(&step).await;
        run.execution_time += Duration::from_millis(outcome.execution_time_ms);

        if outcome.success {
            let finished = self
                .update_step(index, |s| s.succeed(outcome.result.clone()).map(|_| s.clone()))
                .await;
            match finished {
                Some(Ok(step)) => {
                    self.publish_step_finished(run, &step);
                    self.state.write().await.current_step = index + 1;
                    Transition::To(AgentPhase::Executing)
                }
                Some(Err(e)) => Transition::Finish(Ending::internal(e)),
                None => Transition::Finish(Ending::failed("plan changed during execution")),
            }
        } else {
            self.update_step(index, |s| s.record_attempt(outcome.result.clone())).await;
            run.trouble = Some(Trouble::StepFailed(index));
            Transition::To(AgentPhase::Recovering)
        }
    }

    async fn reflect_phase(&self, run: &mut RunCtx<'_>) -> Transition {
        let expected = {
            let state = self.state.read().await;
            state
                .plan
                .as_ref()
                .and_then(|p| p.expected_outcome.clone())
                .or_else(|| run.request.expected_outcome.clone())
        };
        let Some(expected) = expected.filter(|e| !e.trim().is_empty()) else {
            return Transition::Finish(Ending::Completed("all steps succeeded".to_string()));
        };

        let context = self.executor.capture_context().await;
        let verdict = self.executor.verify_outcome(&expected, &context).await;
        tracing::info!(run_id = %run.run_id, passed = verdict.passed, detail = %verdict.detail, "outcome verified");
        if verdict.passed {
            return Transition::Finish(Ending::Completed(verdict.detail));
        }

        if run.loop_ctl.iterations_exhausted() {
            return Transition::Finish(Ending::failed(ITERATION_CEILING_MESSAGE));
        }
        if !run.loop_ctl.record_reflection_failure() {
            return Transition::Finish(Ending::failed(format!(
                "expected outcome not reached after {} reflections: {}",
                self.agent.max_reflection_retries, verdict.detail
            )));
        }
        run.trouble = Some(Trouble::OutcomeMismatch(verdict.detail));
        Transition::To(AgentPhase::Recovering)
    }

    async fn recover_phase(&self, run: &mut RunCtx<'_>) -> Transition {
        let index = match run.trouble.take() {
            Some(Trouble::StepFailed(index)) => index,
            Some(Trouble::OutcomeMismatch(detail)) => {
                run.replan_reason = Some(format!("the expected outcome was not reached: {detail}"));
                return Transition::To(AgentPhase::Planning);
            }
            None => return Transition::Finish(Ending::failed("recovery entered without a cause")),
        };

        let step = {
            let state = self.state.read().await;
            state.plan.as_ref().and_then(|p| p.steps.get(index)).cloned()
        };
        let Some(step) = step else {
            return Transition::Finish(Ending::failed("failed step vanished from the plan"));
        };
        let error = step.result.as_ref().and_then(|r| r.error.clone());
        let message = step.error.clone().unwrap_or_else(|| "step failed".to_string());

        if error.as_ref().is_some_and(|e| e.code.is_input_error()) {
            tracing::warn!(run_id = %run.run_id, step = step.step_number, error = %message, "input error; not retrying");
            if let Err(e) = self.fail_step(run, index).await {
                return Transition::Finish(Ending::internal(e));
            }
            return Transition::Finish(Ending::Failed {
                step: Some((step.step_number, step.tool_name.clone())),
                message,
                suggestions: error.map(|e| e.suggestions).unwrap_or_default(),
            });
        }

        let recoverable = error.as_ref().is_some_and(|e| e.recoverable);
        if recoverable && step.retry_count < self.agent.max_retries {
            let retry = step.retry_count + 1;
            self.update_step(index, |s| s.retry_count = retry).await;
            let delay = self.agent.retry_policy().delay_for(retry);
            tracing::info!(
                run_id = %run.run_id,
                step = step.step_number,
                retry,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "retrying step"
            );
            tokio::select! {
                _ = run.token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
            return Transition::To(AgentPhase::Executing);
        }

        if let Err(e) = self.fail_step(run, index).await {
            return Transition::Finish(Ending::internal(e));
        }
        self.state.write().await.errors.push(format!("step {}: {message}", step.step_number));
        if run.loop_ctl.iterations_exhausted() {
            return Transition::Finish(Ending::Failed {
                step: Some((step.step_number, step.tool_name.clone())),
                message: ITERATION_CEILING_MESSAGE.to_string(),
                suggestions: error.map(|e| e.suggestions).unwrap_or_default(),
            });
        }
        run.replan_reason = Some(format!(
            "step {} ({} {}) failed: {message}",
            step.step_number, step.tool_name, step.parameters
        ));
        Transition::To(AgentPhase::Planning)
    }

    // ── State helpers ────────────────────────────────────────────────────────

    async fn set_phase(&self, run: &RunCtx<'_>, from: AgentPhase, to: AgentPhase) {
        self.state.write().await.phase = to;
        tracing::debug!(run_id = %run.run_id, ?from, ?to, "phase changed");
        self.events.publish(RunEvent::PhaseChanged {
            run_id: run.run_id.clone(),
            from,
            to,
        });
    }

    async fn update_step<R>(&self, index: usize, f: impl FnOnce(&mut ExecutionStep) -> R) -> Option<R> {
        let mut state = self.state.write().await;
        state.plan.as_mut().and_then(|p| p.steps.get_mut(index)).map(f)
    }

    /// executing → failed, keeping the last attempt, and announces it.
    async fn fail_step(&self, run: &RunCtx<'_>, index: usize) -> WebClawResult<()> {
        let failed = self.update_step(index, |s| s.fail(None).map(|_| s.clone())).await;
        if let Some(step) = failed.transpose()? {
            self.publish_step_finished(run, &step);
        }
        Ok(())
    }

    fn publish_step_finished(&self, run: &RunCtx<'_>, step: &ExecutionStep) {
        let output = step
            .result
            .as_ref()
            .filter(|r| r.success)
            .map(|r| r.data.clone().unwrap_or_else(|| Value::String(r.message.clone())));
        self.events.publish(RunEvent::StepFinished {
            run_id: run.run_id.clone(),
            step_number: step.step_number,
            status: step.status,
            tool_name: step.tool_name.clone(),
            input: step.parameters.clone(),
            output,
            error: step.error.clone(),
            timestamp: Utc::now(),
        });
    }

    /// Closes every open step, records the terminal phase and builds the
    /// result.
    async fn finish(
        &self,
        run: &RunCtx<'_>,
        ending: Ending,
        started_at: chrono::DateTime<Utc>,
        clock: Instant,
    ) -> AutomationResult {
        let (status, phase) = match &ending {
            Ending::Completed(_) => (RunStatus::Completed, AgentPhase::Completed),
            Ending::Failed { .. } => (RunStatus::Failed, AgentPhase::Failed),
            Ending::Cancelled => (RunStatus::Cancelled, AgentPhase::Cancelled),
        };
        let skip_reason = match status {
            RunStatus::Cancelled => "run cancelled",
            _ => "not reached",
        };

        let mut closed = Vec::new();
        let (history, from) = {
            let mut state = self.state.write().await;
            if let Some(plan) = state.plan.as_mut() {
                for step in plan.steps.iter_mut() {
                    let transition = match step.status {
                        StepStatus::Executing => step.fail(None),
                        StepStatus::Pending => step.skip(skip_reason),
                        _ => continue,
                    };
                    match transition {
                        Ok(()) => closed.push(step.clone()),
                        Err(e) => tracing::warn!(error = %e, "could not close step"),
                    }
                }
            }
            let from = state.phase;
            state.phase = phase;
            state.status = Some(status);
            if let Ending::Failed { message, .. } = &ending {
                state.errors.push(message.clone());
            }
            let history = state.plan.as_ref().map(|p| p.steps.clone()).unwrap_or_default();
            (history, from)
        };
        for step in &closed {
            self.publish_step_finished(run, step);
        }
        self.set_phase(run, from, phase).await;

        let succeeded_steps = history.iter().filter(|s| s.status == StepStatus::Success).count();
        let (result, error) = match ending {
            Ending::Completed(summary) => (Some(summary), None),
            Ending::Cancelled => (None, None),
            Ending::Failed {
                step,
                message,
                suggestions,
            } => {
                let (failing_step, tool_name) = match step {
                    Some((n, tool)) => (Some(n), Some(tool)),
                    None => (None, None),
                };
                (
                    None,
                    Some(RunFailure {
                        failing_step,
                        tool_name,
                        message,
                        suggestions,
                        succeeded_steps,
                    }),
                )
            }
        };

        AutomationResult {
            run_id: run.run_id.clone(),
            status,
            success: status == RunStatus::Completed,
            result,
            error,
            execution_history: history,
            iterations: run.loop_ctl.iteration(),
            timing: RunTiming {
                started_at,
                finished_at: Utc::now(),
                duration_ms: clock.elapsed().as_millis() as u64,
                planning_ms: run.planning_time.as_millis() as u64,
                execution_ms: run.execution_time.as_millis() as u64,
            },
            usage: run.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::memory::EntryContent;
    use crate::agent_engine::verify::{OutcomeVerifier, Verdict};
    use crate::browser::context::BrowserContext;
    use crate::browser::driver::BoundingBox;
    use crate::llm::types::LlmResponse;
    use crate::session::analyzer::RecordedSession;
    use crate::testing::{fast_executor_settings, test_context, FakeElement, FakePage, ScriptedProvider};
    use async_trait::async_trait;
    use serde_json::json;

    struct NeverSatisfied;

    #[async_trait]
    impl OutcomeVerifier for NeverSatisfied {
        async fn verify(&self, _expected: &str, _context: &BrowserContext) -> Verdict {
            Verdict {
                passed: false,
                detail: "still not there".into(),
            }
        }
    }

    fn agent_config() -> AgentConfig {
        AgentConfig {
            max_iterations: 5,
            max_retries: 1,
            backoff_base_ms: 1,
            backoff_max_ms: 1,
            settle_ms: 0,
            stability_max_wait_ms: 20,
            max_reflection_retries: 10,
            thinking_budget_tokens: 0,
        }
    }

    fn orchestrator(
        page: Arc<FakePage>,
        responses: Vec<LlmResponse>,
        agent: AgentConfig,
        verifier: Arc<dyn OutcomeVerifier>,
    ) -> (Orchestrator, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(responses));
        let providers = Arc::new(ProviderRegistry::single(provider.clone()));
        let registry = Arc::new(ToolRegistry::new(Arc::new(InMemoryStats::new())));
        let planner = Planner::new(providers, &registry, 0).unwrap();
        let executor = ExecutionEngine::new(registry, test_context(page), fast_executor_settings(), verifier);
        (
            Orchestrator::new(planner, executor, agent, MemoryConfig::default()),
            provider,
        )
    }

    #[tokio::test]
    async fn replans_after_element_not_found_and_completes() {
        let page = Arc::new(FakePage::new("about:blank", ""));
        page.add_element(
            FakeElement::button("#submit", BoundingBox::new(10.0, 10.0, 80.0, 30.0)).on_click_text("Thank you"),
        );
        page.reveal_after_queries("#submit", 3);

        let (orch, provider) = orchestrator(
            page.clone(),
            vec![
                ScriptedProvider::plan_call(json!({"steps": [
                    {"tool": "navigate_to_url", "parameters": {"url": "https://example.com"}},
                    {"tool": "click_element", "parameters": {"selector": "#submit", "timeout_ms": 0}}
                ]})),
                ScriptedProvider::plan_call(json!({"steps": [
                    {"tool": "wait_for_element", "parameters": {"selector": "#submit", "timeout_ms": 5000}},
                    {"tool": "click_element", "parameters": {"selector": "#submit"}}
                ]})),
            ],
            agent_config(),
            Arc::new(HeuristicVerifier),
        );
        let mut request = AutomationRequest::new("submit the form");
        request.expected_outcome = Some("Thank you".into());

        let result = orch.execute_automation(request).await;
        assert_eq!(result.status, RunStatus::Completed, "{:?}", result.error);
        assert!(result.success);
        let statuses: Vec<(&str, StepStatus)> = result
            .execution_history
            .iter()
            .map(|s| (s.tool_name.as_str(), s.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("navigate_to_url", StepStatus::Success),
                ("click_element", StepStatus::Failed),
                ("wait_for_element", StepStatus::Success),
                ("click_element", StepStatus::Success),
            ]
        );
        assert_eq!(result.execution_history[1].retry_count, 1);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.usage.total(), 240);
        assert_eq!(provider.requests().len(), 2);
        assert_eq!(page.clicks("#submit"), 1);

        let state = orch.get_state().await;
        assert_eq!(state.phase, AgentPhase::Completed);
        assert_eq!(state.plan.map(|p| p.revision), Some(1));
    }

    #[tokio::test]
    async fn iteration_ceiling_fails_with_full_history() {
        let page = Arc::new(FakePage::new("https://a.test/", "A"));
        let plan = || ScriptedProvider::plan_call(json!({"steps": [{"tool": "reload_page"}]}));
        let mut agent = agent_config();
        agent.max_iterations = 3;
        let (orch, provider) = orchestrator(page, vec![plan(), plan(), plan()], agent, Arc::new(NeverSatisfied));
        let mut request = AutomationRequest::new("reach the impossible");
        request.expected_outcome = Some("unreachable".into());

        let result = orch.execute_automation(request).await;
        assert_eq!(result.status, RunStatus::Failed);
        let error = result.error.unwrap();
        assert_eq!(error.message, ITERATION_CEILING_MESSAGE);
        assert_eq!(error.succeeded_steps, 3);
        assert_eq!(result.execution_history.len(), 3);
        assert_eq!(result.iterations, 3);
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn input_errors_fail_without_retry() {
        let page = Arc::new(FakePage::new("https://a.test/", "A"));
        let (orch, provider) = orchestrator(
            page,
            vec![ScriptedProvider::plan_call(json!({"steps": [
                {"tool": "teleport", "parameters": {"to": "mars"}},
                {"tool": "reload_page"}
            ]}))],
            agent_config(),
            Arc::new(HeuristicVerifier),
        );

        let result = orch.execute_automation(AutomationRequest::new("go")).await;
        assert_eq!(result.status, RunStatus::Failed);
        let error = result.error.unwrap();
        assert_eq!(error.failing_step, Some(1));
        assert_eq!(error.tool_name.as_deref(), Some("teleport"));
        assert_eq!(result.execution_history[0].retry_count, 0);
        assert_eq!(result.execution_history[0].status, StepStatus::Failed);
        assert_eq!(result.execution_history[1].status, StepStatus::Skipped);
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn cancel_lets_the_running_step_finish() {
        let page = Arc::new(FakePage::new("https://a.test/", "A"));
        page.add_element(FakeElement::button("#a", BoundingBox::new(0.0, 0.0, 20.0, 20.0)));
        page.add_element(FakeElement::button("#b", BoundingBox::new(30.0, 0.0, 20.0, 20.0)));
        page.set_action_delay(Duration::from_millis(20));
        let (orch, _) = orchestrator(
            page.clone(),
            vec![ScriptedProvider::plan_call(json!({"steps": [
                {"tool": "click_element", "parameters": {"selector": "#a"}},
                {"tool": "click_element", "parameters": {"selector": "#b"}}
            ]}))],
            agent_config(),
            Arc::new(HeuristicVerifier),
        );

        let mut rx = orch.events().subscribe();
        let canceller = async {
            while let Ok(event) = rx.recv().await {
                if matches!(event, RunEvent::StepStarted { .. }) {
                    orch.cancel();
                    break;
                }
            }
        };
        let (result, _) = tokio::join!(orch.execute_automation(AutomationRequest::new("click a then b")), canceller);

        assert_eq!(result.status, RunStatus::Cancelled);
        assert!(result.error.is_none());
        assert_eq!(page.clicks("#a"), 1);
        assert_eq!(page.clicks("#b"), 0);
        let first = &result.execution_history[0];
        assert_eq!(first.status, StepStatus::Success);
        assert!(first.result.is_some());
        assert_eq!(result.execution_history[1].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn cancel_before_the_run_is_honoured_once() {
        let page = Arc::new(FakePage::new("https://a.test/", "A"));
        let (orch, provider) = orchestrator(
            page,
            vec![ScriptedProvider::plan_call(json!({"steps": [{"tool": "get_page_info"}]}))],
            agent_config(),
            Arc::new(HeuristicVerifier),
        );

        orch.cancel();
        let cancelled = orch.execute_automation(AutomationRequest::new("read the page")).await;
        assert_eq!(cancelled.status, RunStatus::Cancelled);
        assert!(cancelled.execution_history.is_empty());
        assert_eq!(provider.requests().len(), 0);

        let next = orch.execute_automation(AutomationRequest::new("read the page")).await;
        assert!(next.success, "{:?}", next.error);
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn start_url_and_recorded_session_reach_the_planner() {
        let page = Arc::new(FakePage::new("about:blank", ""));
        page.set_text("Welcome back");
        let (orch, provider) = orchestrator(
            page.clone(),
            vec![ScriptedProvider::plan_call(json!({"steps": [{"tool": "get_page_info"}]}))],
            agent_config(),
            Arc::new(HeuristicVerifier),
        );
        let session: RecordedSession = serde_json::from_value(json!({
            "actions": [{"type": "click", "target": {"description": "Login link", "selectors": [
                {"selector": "#login", "reliability": 0.9}
            ]}}]
        }))
        .unwrap();
        let mut request = AutomationRequest::new("log in");
        request.start_url = Some("https://a.test/".into());
        request.expected_outcome = Some("welcome back".into());
        request.recorded_session = Some(session);

        let mut rx = orch.events().subscribe();
        let result = orch.execute_automation(request).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(page.navigations(), vec!["https://a.test/".to_string()]);
        assert_eq!(result.execution_history.len(), 2);

        let first = &provider.requests()[0].entries[0];
        assert!(matches!(&first.content, EntryContent::Text(t) if t.contains("`#login` (0.90)")));

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(serde_json::to_value(&event).unwrap()["type"].as_str().unwrap_or("").to_string());
        }
        assert_eq!(kinds.first().map(String::as_str), Some("run_started"));
        assert_eq!(kinds.last().map(String::as_str), Some("run_finished"));
        assert!(kinds.iter().any(|k| k == "plan_ready"));
    }
}
