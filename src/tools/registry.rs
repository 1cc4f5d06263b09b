use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::browser::driver::PageDriver;
use crate::config::ToolsConfig;
use crate::llm::types::{FunctionDef, ToolDef};
use crate::tools::call::{ToolCall, ToolName};
use crate::tools::retry::RetryPolicy;
use crate::tools::schema::{ToolCategory, ToolDefinition};
use crate::tools::stats::StatsCollector;
use crate::tools::types::{ToolError, ToolErrorCode, ToolMetadata, ToolOutput, ToolResult};
use crate::tools::{interaction, navigation, observation};

/// Everything a tool handler may touch: the one page it acts on and the
/// tool settings.
#[derive(Clone)]
pub struct ToolContext {
    pub driver: Arc<dyn PageDriver>,
    pub settings: ToolsConfig,
}

impl ToolContext {
    pub fn new(driver: Arc<dyn PageDriver>, settings: ToolsConfig) -> Self {
        Self { driver, settings }
    }
}

pub struct ToolRegistry {
    definitions: HashMap<ToolName, ToolDefinition>,
    stats: Arc<dyn StatsCollector>,
}

impl ToolRegistry {
    pub fn new(stats: Arc<dyn StatsCollector>) -> Self {
        let mut registry = Self {
            definitions: HashMap::new(),
            stats,
        };
        for def in navigation::definitions()
            .into_iter()
            .chain(interaction::definitions())
            .chain(observation::definitions())
        {
            registry.register(def);
        }
        tracing::debug!(count = registry.definitions.len(), "tool registry initialised");
        registry
    }

    fn register(&mut self, def: ToolDefinition) {
        if self.definitions.insert(def.name, def).is_some() {
            tracing::warn!("tool registered twice; keeping the later definition");
        }
    }

    /// Definitions in catalog order.
    pub fn definitions(&self) -> Vec<&ToolDefinition> {
        ToolName::ALL
            .iter()
            .filter_map(|name| self.definitions.get(name))
            .collect()
    }

    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        name.parse::<ToolName>()
            .ok()
            .and_then(|n| self.definitions.get(&n))
    }

    pub fn stats(&self) -> &Arc<dyn StatsCollector> {
        &self.stats
    }

    /// Tool schemas in the shape the LLM boundary expects.
    pub fn tool_defs(&self) -> Vec<ToolDef> {
        self.definitions()
            .into_iter()
            .map(|def| ToolDef {
                def_type: "function".to_string(),
                function: FunctionDef {
                    name: def.name.as_str().to_string(),
                    description: def.description.to_string(),
                    parameters: def.to_json_schema(),
                },
            })
            .collect()
    }

    /// Resolves and validates a call without executing it.
    pub fn prepare(&self, name: &str, params: &Value) -> Result<ToolCall, ToolError> {
        let tool: ToolName = name.parse()?;
        let def = self.definitions.get(&tool).ok_or_else(|| {
            ToolError::new(ToolErrorCode::InvalidTool, format!("tool '{name}' is not registered"))
        })?;
        let filled = def.validate(params)?;
        ToolCall::parse(tool, filled)
    }

    fn retry_policy(&self, tool: ToolName, settings: &ToolsConfig) -> RetryPolicy {
        match self.definitions.get(&tool).map(|d| d.category) {
            Some(ToolCategory::Interaction) | Some(ToolCategory::Navigation) => {
                settings.interaction_retry_policy()
            }
            _ => RetryPolicy::none(),
        }
    }

    /// Validates, dispatches with the tool's retry policy, and records stats.
    /// Never fails: every problem is reported inside the `ToolResult`.
    pub async fn execute_tool(&self, name: &str, params: &Value, ctx: &ToolContext) -> ToolResult {
        let start = Instant::now();
        let call = match self.prepare(name, params) {
            Ok(call) => call,
            Err(e) => {
                if let Ok(tool) = name.parse::<ToolName>() {
                    self.stats.record(tool, 0, Some(e.code));
                }
                tracing::warn!(tool = %name, error = %e, "tool call rejected");
                return ToolResult::from_error(e, None);
            }
        };
        self.execute_call(&call, ctx, start).await
    }

    async fn execute_call(&self, call: &ToolCall, ctx: &ToolContext, start: Instant) -> ToolResult {
        let tool = call.name();
        let policy = self.retry_policy(tool, &ctx.settings);
        let outcome = policy.run(|_| Self::dispatch(call, ctx)).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let metadata = ToolMetadata {
            execution_time_ms: elapsed_ms,
            retries: outcome.retries,
            verification_passed: None,
        };

        match outcome.result {
            Ok(output) => {
                self.stats.record(tool, elapsed_ms, None);
                tracing::info!(tool = %tool, elapsed_ms, retries = outcome.retries, "tool succeeded");
                ToolResult::from_output(output, metadata)
            }
            Err(e) => {
                self.stats.record(tool, elapsed_ms, Some(e.code));
                tracing::warn!(tool = %tool, elapsed_ms, retries = outcome.retries, error = %e, "tool failed");
                ToolResult::from_error(e, Some(metadata))
            }
        }
    }

    async fn dispatch(call: &ToolCall, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        match call {
            ToolCall::NavigateToUrl(p) => navigation::navigate_to_url(ctx, p).await,
            ToolCall::GoBack => navigation::history_step(ctx, -1).await,
            ToolCall::GoForward => navigation::history_step(ctx, 1).await,
            ToolCall::ReloadPage => navigation::reload_page(ctx).await,
            ToolCall::ClickElement(p) => interaction::click_element(ctx, p).await,
            ToolCall::TypeText(p) => interaction::type_text(ctx, p).await,
            ToolCall::SelectOption(p) => interaction::select_option(ctx, p).await,
            ToolCall::PressKey(p) => interaction::press_key(ctx, p).await,
            ToolCall::ScrollPage(p) => interaction::scroll_page(ctx, p).await,
            ToolCall::ExecuteScript(p) => interaction::execute_script(ctx, p).await,
            ToolCall::GetPageInfo => observation::get_page_info(ctx).await,
            ToolCall::GetElementText(p) => observation::get_element_text(ctx, p).await,
            ToolCall::GetElementAttribute(p) => observation::get_element_attribute(ctx, p).await,
            ToolCall::FindElements(p) => observation::find_elements(ctx, p).await,
            ToolCall::CheckTextPresent(p) => observation::check_text_present(ctx, p).await,
            ToolCall::TakeScreenshot(p) => observation::take_screenshot(ctx, p).await,
            ToolCall::WaitForElement(p) => observation::wait_for_element(ctx, p).await,
            ToolCall::Wait(p) => observation::wait(ctx, p).await,
        }
    }
}
