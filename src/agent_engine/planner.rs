use std::fmt::Write as _;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent_engine::memory::{ConversationMemory, Role};
use crate::agent_engine::state::{AutomationRequest, ExecutionStep, PlannedStep};
use crate::browser::context::BrowserContext;
use crate::errors::{WebClawError, WebClawResult};
use crate::llm::registry::{LlmRole, ProviderRegistry};
use crate::llm::tools::{planner_system_prompt, submit_plan_tool, SUBMIT_PLAN_TOOL};
use crate::llm::types::{ChatRequest, LlmResponse, StopReason, TokenUsage, ToolDef};
use crate::tools::call::ToolName;
use crate::tools::registry::ToolRegistry;

/// A plan (or plan tail) as returned by the model.
#[derive(Debug, Clone)]
pub struct PlanDraft {
    pub steps: Vec<PlannedStep>,
    pub expected_outcome: Option<String>,
    pub usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct PlanPayload {
    #[serde(default)]
    steps: Vec<PlannedStep>,
    #[serde(default)]
    expected_outcome: Option<String>,
}

pub struct Planner {
    providers: Arc<ProviderRegistry>,
    system_prompt: String,
    submit_plan: ToolDef,
    thinking_budget: Option<u32>,
}

impl Planner {
    pub fn new(providers: Arc<ProviderRegistry>, tools: &ToolRegistry, thinking_budget_tokens: u32) -> WebClawResult<Self> {
        Ok(Self {
            providers,
            system_prompt: planner_system_prompt(tools),
            submit_plan: submit_plan_tool()?,
            thinking_budget: (thinking_budget_tokens > 0).then_some(thinking_budget_tokens),
        })
    }

    /// First plan of a run. Prepends a navigation to `start_url` when the
    /// model did not start with one. A caller-given expected outcome wins
    /// over the model's.
    pub async fn plan(
        &self,
        request: &AutomationRequest,
        session_notes: Option<&str>,
        context: &BrowserContext,
        memory: &mut ConversationMemory,
    ) -> WebClawResult<PlanDraft> {
        push_user_turn(memory, initial_prompt(request, session_notes, context))?;
        let mut draft = self.request(memory).await?;
        ensure_start_navigation(&mut draft.steps, request.start_url.as_deref());
        if request.expected_outcome.is_some() {
            draft.expected_outcome = request.expected_outcome.clone();
        }
        Ok(draft)
    }

    /// Replacement tail after a failure or an unmet outcome.
    pub async fn replan(
        &self,
        failure: &str,
        context: &BrowserContext,
        history: &[ExecutionStep],
        memory: &mut ConversationMemory,
    ) -> WebClawResult<PlanDraft> {
        push_user_turn(memory, replan_prompt(failure, context, history))?;
        self.request(memory).await
    }

    async fn request(&self, memory: &mut ConversationMemory) -> WebClawResult<PlanDraft> {
        let (provider, cfg) = self.providers.call_config_for_role(LlmRole::Planning)?;

        let mut system = self.system_prompt.clone();
        if let Some(digest) = memory.pruned_digest() {
            let _ = write!(system, "\n\n# Earlier conversation (condensed)\n{digest}");
        }
        let request = ChatRequest {
            system,
            entries: memory.entries().to_vec(),
            tools: vec![self.submit_plan.clone()],
            thinking_budget: self.thinking_budget,
        };

        tracing::info!(
            provider = provider.name(),
            model = %cfg.model,
            entries = request.entries.len(),
            "requesting plan"
        );
        let response = provider.chat(request, &cfg).await?;
        record_response(memory, &response)?;

        if response.stop_reason == StopReason::MaxTokens {
            return Err(WebClawError::Planning(
                "plan response was cut off at max_tokens".into(),
            ));
        }
        let payload = parse_plan_response(&response)?;
        if payload.steps.is_empty() {
            return Err(WebClawError::Planning("model returned a plan with no steps".into()));
        }
        tracing::info!(steps = payload.steps.len(), usage = response.usage.total(), "plan received");
        Ok(PlanDraft {
            steps: payload.steps,
            expected_outcome: payload.expected_outcome.filter(|s| !s.trim().is_empty()),
            usage: response.usage,
        })
    }
}

/// User turn that also acknowledges any tool uses of the previous
/// assistant entry.
fn push_user_turn(memory: &mut ConversationMemory, text: String) -> WebClawResult<()> {
    let pending: Vec<String> = memory
        .last()
        .filter(|e| e.role == Role::Assistant)
        .map(|e| e.tool_use_ids().map(str::to_string).collect())
        .unwrap_or_default();
    if pending.is_empty() {
        memory.push_user_text(text)
    } else {
        let results = pending
            .into_iter()
            .map(|id| (id, "plan received".to_string(), false))
            .collect();
        memory.push_tool_results(results, Some(text))
    }
}

fn record_response(memory: &mut ConversationMemory, response: &LlmResponse) -> WebClawResult<()> {
    if response.tool_calls.is_empty() {
        let text = if response.content.is_empty() {
            "(no content)".to_string()
        } else {
            response.content.clone()
        };
        return memory.push_assistant_text(text);
    }
    let uses = response
        .tool_calls
        .iter()
        .map(|tc| {
            let input = serde_json::from_str(&tc.function.arguments)
                .unwrap_or_else(|_| Value::String(tc.function.arguments.clone()));
            (tc.id.clone(), tc.function.name.clone(), input)
        })
        .collect();
    memory.push_tool_use(&response.content, uses)
}

/// Reads the plan from a `submit_plan` call, or from JSON in the text.
fn parse_plan_response(response: &LlmResponse) -> WebClawResult<PlanPayload> {
    if let Some(call) = response.tool_calls.iter().find(|tc| tc.function.name == SUBMIT_PLAN_TOOL) {
        return serde_json::from_str(&call.function.arguments)
            .map_err(|e| WebClawError::Planning(format!("submit_plan arguments are not a valid plan: {e}")));
    }
    let json = extract_json(&response.content)
        .ok_or_else(|| WebClawError::Planning("response contains neither a submit_plan call nor a JSON plan".into()))?;
    serde_json::from_str(json).map_err(|e| WebClawError::Planning(format!("JSON plan is malformed: {e}")))
}

fn extract_json(text: &str) -> Option<&str> {
    let text = text.trim();
    if let Some(start) = text.find("```") {
        let body = &text[start + 3..];
        let body = body.strip_prefix("json").unwrap_or(body);
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub fn ensure_start_navigation(steps: &mut Vec<PlannedStep>, start_url: Option<&str>) {
    let Some(url) = start_url.filter(|u| !u.trim().is_empty()) else {
        return;
    };
    let starts_with_navigation = steps
        .first()
        .and_then(|s| s.tool.parse::<ToolName>().ok())
        .is_some_and(|t| t.is_navigation());
    if !starts_with_navigation {
        steps.insert(
            0,
            PlannedStep {
                reasoning: "Open the start page".to_string(),
                tool: ToolName::NavigateToUrl.as_str().to_string(),
                parameters: json!({ "url": url }),
            },
        );
    }
}

fn initial_prompt(request: &AutomationRequest, session_notes: Option<&str>, context: &BrowserContext) -> String {
    let mut out = format!("Task: {}\n", request.user_intent.trim());
    if let Some(url) = &request.start_url {
        let _ = writeln!(out, "Start URL: {url}");
    }
    if let Some(expected) = &request.expected_outcome {
        let _ = writeln!(out, "Expected outcome: {expected}");
    }
    if !request.constraints.is_empty() {
        out.push_str("Constraints:\n");
        for c in &request.constraints {
            let _ = writeln!(out, "- {c}");
        }
    }
    if let Some(notes) = session_notes {
        let _ = write!(out, "\n{notes}\n");
    }
    let _ = write!(out, "\n# Current page\n{}", context.summary());
    out
}

fn replan_prompt(failure: &str, context: &BrowserContext, history: &[ExecutionStep]) -> String {
    let mut out = format!("The plan did not work: {failure}\n\n# Steps so far\n");
    if history.is_empty() {
        out.push_str("(none)\n");
    }
    for step in history {
        let _ = writeln!(out, "{}", step.one_line());
    }
    let _ = write!(
        out,
        "\n# Current page\n{}\n\nSubmit only the remaining steps, starting from the current page.",
        context.summary()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use crate::tools::stats::InMemoryStats;

    fn planner(responses: Vec<LlmResponse>) -> (Planner, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(responses));
        let providers = Arc::new(ProviderRegistry::single(provider.clone()));
        let tools = ToolRegistry::new(Arc::new(InMemoryStats::new()));
        (Planner::new(providers, &tools, 0).unwrap(), provider)
    }

    fn page() -> BrowserContext {
        BrowserContext {
            url: "about:blank".into(),
            ..BrowserContext::unavailable("")
        }
    }

    #[tokio::test]
    async fn submit_plan_call_is_parsed_and_start_url_prepended() {
        let (planner, provider) = planner(vec![ScriptedProvider::plan_call(json!({
            "steps": [{"reasoning": "press it", "tool": "click_element", "parameters": {"selector": "#go"}}],
            "expected_outcome": "Welcome"
        }))]);
        let mut memory = ConversationMemory::new(20);
        let mut request = AutomationRequest::new("log in");
        request.start_url = Some("https://a.test/login".into());

        let draft = planner.plan(&request, None, &page(), &mut memory).await.unwrap();
        assert_eq!(draft.steps.len(), 2);
        assert_eq!(draft.steps[0].tool, "navigate_to_url");
        assert_eq!(draft.steps[0].parameters["url"], "https://a.test/login");
        assert_eq!(draft.expected_outcome.as_deref(), Some("Welcome"));
        assert_eq!(memory.len(), 2);

        let sent = provider.requests();
        assert_eq!(sent[0].tools[0].function.name, SUBMIT_PLAN_TOOL);
        assert!(sent[0].system.contains("click_element"));
    }

    #[tokio::test]
    async fn json_text_plan_is_accepted() {
        let (planner, _) = planner(vec![LlmResponse::text(
            "Here you go:\n```json\n{\"steps\": [{\"tool\": \"go_back\"}]}\n```",
        )]);
        let mut memory = ConversationMemory::new(20);
        let draft = planner
            .plan(&AutomationRequest::new("go back"), None, &page(), &mut memory)
            .await
            .unwrap();
        assert_eq!(draft.steps[0].tool, "go_back");
    }

    #[tokio::test]
    async fn max_tokens_is_a_planning_failure() {
        let mut truncated = LlmResponse::text("{\"steps\": [");
        truncated.stop_reason = StopReason::MaxTokens;
        let (planner, _) = planner(vec![truncated]);
        let mut memory = ConversationMemory::new(20);
        let err = planner
            .plan(&AutomationRequest::new("x"), None, &page(), &mut memory)
            .await
            .unwrap_err();
        assert!(matches!(err, WebClawError::Planning(_)));
    }

    #[tokio::test]
    async fn replan_answers_the_previous_tool_use() {
        let (planner, provider) = planner(vec![
            ScriptedProvider::plan_call(json!({"steps": [{"tool": "go_back"}]})),
            ScriptedProvider::plan_call(json!({"steps": [{"tool": "reload_page"}]})),
        ]);
        let mut memory = ConversationMemory::new(20);
        planner
            .plan(&AutomationRequest::new("x"), None, &page(), &mut memory)
            .await
            .unwrap();
        let tail = planner
            .replan("step 1 failed", &page(), &[], &mut memory)
            .await
            .unwrap();
        assert_eq!(tail.steps[0].tool, "reload_page");
        assert_eq!(memory.len(), 4);
        let second = &provider.requests()[1];
        assert_eq!(second.entries.len(), 3);
        assert!(second.entries[2].summary().contains("plan did not work"));
    }

    #[test]
    fn navigation_first_plans_are_left_alone() {
        let mut steps = vec![PlannedStep::new("navigate_to_url", json!({"url": "b.test"}))];
        ensure_start_navigation(&mut steps, Some("a.test"));
        assert_eq!(steps.len(), 1);
    }
}
