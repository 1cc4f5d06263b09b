use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::agent_engine::state::ExecutionStep;
use crate::agent_engine::verify::{OutcomeVerifier, Verdict};
use crate::browser::context::{BrowserContext, CaptureOptions};
use crate::browser::stability::{wait_for_dom_stability, StabilityConfig};
use crate::config::{AgentConfig, BrowserConfig, MemoryConfig};
use crate::errors::WebClawResult;
use crate::tools::call::{ToolCall, ToolName};
use crate::tools::registry::{ToolContext, ToolRegistry};
use crate::tools::types::{ToolError, ToolResult};

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub settle: Duration,
    pub stability: StabilityConfig,
    pub capture: CaptureOptions,
}

impl ExecutorSettings {
    pub fn from_config(agent: &AgentConfig, browser: &BrowserConfig, memory: &MemoryConfig) -> Self {
        Self {
            settle: Duration::from_millis(agent.settle_ms),
            stability: StabilityConfig {
                max_wait_ms: agent.stability_max_wait_ms,
                ..StabilityConfig::default()
            },
            capture: CaptureOptions {
                max_text_chars: memory.visible_text_chars,
                accessibility: browser.capture_accessibility,
                screenshot: browser.capture_screenshots,
            },
        }
    }
}

/// Result of running one step once.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub success: bool,
    pub result: ToolResult,
    pub execution_time_ms: u64,
    pub context_before: BrowserContext,
    pub context_after: BrowserContext,
}

/// Runs single planned steps against the page. Never retries.
pub struct ExecutionEngine {
    registry: Arc<ToolRegistry>,
    tools: ToolContext,
    settings: ExecutorSettings,
    verifier: Arc<dyn OutcomeVerifier>,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<ToolRegistry>,
        tools: ToolContext,
        settings: ExecutorSettings,
        verifier: Arc<dyn OutcomeVerifier>,
    ) -> Self {
        Self {
            registry,
            tools,
            settings,
            verifier,
        }
    }

    pub async fn capture_context(&self) -> BrowserContext {
        BrowserContext::capture_or_unavailable(self.tools.driver.as_ref(), self.settings.capture).await
    }

    /// Rejects a step before any side effect: unknown tool, schema
    /// violations, and action preconditions the schema cannot express.
    pub fn preflight(&self, tool_name: &str, parameters: &Value) -> Result<ToolCall, ToolError> {
        let call = self.registry.prepare(tool_name, parameters)?;
        let blank = |field: &str, value: &str| {
            if value.trim().is_empty() {
                Err(ToolError::invalid_params(format!("{tool_name}: '{field}' must not be empty")))
            } else {
                Ok(())
            }
        };
        match &call {
            ToolCall::ClickElement(p) => blank("selector", &p.selector)?,
            ToolCall::TypeText(p) => {
                blank("selector", &p.selector)?;
                // Clearing a field with empty text is allowed.
                if !p.clear {
                    blank("text", &p.text)?;
                }
            }
            ToolCall::SelectOption(p) => {
                blank("selector", &p.selector)?;
                blank("option", &p.option)?;
            }
            ToolCall::NavigateToUrl(p) => blank("url", &p.url)?,
            _ => {}
        }
        Ok(call)
    }

    pub async fn execute_step(&self, step: &ExecutionStep) -> StepOutcome {
        let start = Instant::now();
        let context_before = self.capture_context().await;

        if let Err(e) = self.preflight(&step.tool_name, &step.parameters) {
            tracing::warn!(step = step.step_number, tool = %step.tool_name, error = %e, "step rejected before dispatch");
            return StepOutcome {
                success: false,
                result: ToolResult::from_error(e, None),
                execution_time_ms: start.elapsed().as_millis() as u64,
                context_after: context_before.clone(),
                context_before,
            };
        }

        tracing::info!(step = step.step_number, tool = %step.tool_name, "executing step");
        let result = self
            .registry
            .execute_tool(&step.tool_name, &step.parameters, &self.tools)
            .await;

        let read_only = step
            .tool_name
            .parse::<ToolName>()
            .map(|t| t.is_observation())
            .unwrap_or(false);
        if !read_only {
            self.settle().await;
        }

        let context_after = self.capture_context().await;
        let execution_time_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            step = step.step_number,
            tool = %step.tool_name,
            success = result.success,
            execution_time_ms,
            url = %context_after.url,
            "step finished"
        );
        StepOutcome {
            success: result.success,
            result,
            execution_time_ms,
            context_before,
            context_after,
        }
    }

    async fn settle(&self) {
        if !self.settings.settle.is_zero() {
            tokio::time::sleep(self.settings.settle).await;
        }
        match wait_for_dom_stability(self.tools.driver.as_ref(), &self.settings.stability).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!("page still changing after stability wait"),
            Err(e) => tracing::debug!(error = %e, "stability probe failed"),
        }
    }

    /// Runs `steps` in order, stopping at the first failure. `on_step_complete`
    /// sees every finished step.
    pub async fn execute_steps<F>(
        &self,
        steps: &mut [ExecutionStep],
        mut on_step_complete: F,
    ) -> WebClawResult<Vec<StepOutcome>>
    where
        F: FnMut(&ExecutionStep, &StepOutcome),
    {
        let mut outcomes = Vec::with_capacity(steps.len());
        for step in steps.iter_mut() {
            step.begin()?;
            let outcome = self.execute_step(step).await;
            if outcome.success {
                step.succeed(outcome.result.clone())?;
            } else {
                step.fail(Some(outcome.result.clone()))?;
            }
            on_step_complete(step, &outcome);
            let failed = !outcome.success;
            outcomes.push(outcome);
            if failed {
                break;
            }
        }
        Ok(outcomes)
    }

    pub async fn verify_outcome(&self, expected: &str, context: &BrowserContext) -> Verdict {
        self.verifier.verify(expected, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::state::{PlannedStep, StepStatus};
    use crate::agent_engine::verify::HeuristicVerifier;
    use crate::browser::driver::BoundingBox;
    use crate::testing::{fast_executor_settings, test_context, FakeElement, FakePage};
    use crate::tools::stats::InMemoryStats;
    use crate::tools::types::ToolErrorCode;
    use serde_json::json;

    fn engine(page: Arc<FakePage>) -> ExecutionEngine {
        ExecutionEngine::new(
            Arc::new(ToolRegistry::new(Arc::new(InMemoryStats::new()))),
            test_context(page),
            fast_executor_settings(),
            Arc::new(HeuristicVerifier),
        )
    }

    fn step(n: u32, tool: &str, params: Value) -> ExecutionStep {
        ExecutionStep::new(n, PlannedStep::new(tool, params))
    }

    #[tokio::test]
    async fn captures_context_around_the_step() {
        let page = Arc::new(FakePage::new("about:blank", ""));
        let engine = engine(page);
        let out = engine
            .execute_step(&step(1, "navigate_to_url", json!({"url": "https://a.test/"})))
            .await;
        assert!(out.success);
        assert_eq!(out.context_before.url, "about:blank");
        assert_eq!(out.context_after.url, "https://a.test/");
    }

    #[tokio::test]
    async fn blank_selector_is_rejected_without_touching_the_page() {
        let page = Arc::new(FakePage::new("https://a.test/", "A"));
        let engine = engine(page.clone());
        let out = engine
            .execute_step(&step(1, "click_element", json!({"selector": "  "})))
            .await;
        assert_eq!(out.result.error_code(), Some(ToolErrorCode::InvalidParameters));
        assert_eq!(page.query_count("  "), 0);

        let err = engine
            .preflight("type_text", &json!({"selector": "#q", "text": ""}))
            .unwrap_err();
        assert_eq!(err.code, ToolErrorCode::InvalidParameters);
        assert!(engine
            .preflight("type_text", &json!({"selector": "#q", "text": "", "clear": true}))
            .is_ok());
    }

    #[tokio::test]
    async fn execute_steps_stops_at_first_failure() {
        let page = Arc::new(FakePage::new("https://a.test/", "A"));
        page.add_element(FakeElement::button("#ok", BoundingBox::new(0.0, 0.0, 40.0, 20.0)));
        let engine = engine(page);
        let mut steps = vec![
            step(1, "click_element", json!({"selector": "#ok"})),
            step(2, "click_element", json!({"selector": "#missing", "timeout_ms": 0})),
            step(3, "click_element", json!({"selector": "#ok"})),
        ];
        let mut seen = Vec::new();
        let outcomes = engine
            .execute_steps(&mut steps, |s, _| seen.push(s.step_number))
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(steps[0].status, StepStatus::Success);
        assert_eq!(steps[1].status, StepStatus::Failed);
        assert_eq!(steps[2].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn verify_outcome_uses_the_verifier() {
        let page = Arc::new(FakePage::new("https://a.test/done", "Done"));
        page.set_text("All set");
        let engine = engine(page);
        let ctx = engine.capture_context().await;
        assert!(engine.verify_outcome("all set", &ctx).await.passed);
        assert!(!engine.verify_outcome("url:/cart", &ctx).await.passed);
    }
}
