//! In-memory fakes shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use parking_lot::Mutex;
use serde_json::Value;

use crate::agent_engine::executor::ExecutorSettings;
use crate::browser::context::CaptureOptions;
use crate::browser::driver::{
    BoundingBox, ElementSnapshot, KeyEventKind, KeyInput, MouseEventKind, PageDriver, PageInfo, ProtocolError,
    MODIFIER_CTRL, MODIFIER_META,
};
use crate::browser::selector::Selector;
use crate::browser::stability::StabilityConfig;
use crate::config::ToolsConfig;
use crate::errors::{WebClawError, WebClawResult};
use crate::llm::provider::LlmProvider;
use crate::llm::tools::SUBMIT_PLAN_TOOL;
use crate::llm::types::{CallConfig, ChatRequest, LlmResponse, StopReason, TokenUsage, ToolCall};
use crate::tools::registry::ToolContext;

// ── Page model ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FakeElement {
    selector: String,
    tag: String,
    bbox: BoundingBox,
    visible: bool,
    enabled: bool,
    text: String,
    value: Option<String>,
    options: Vec<String>,
    attributes: HashMap<String, String>,
    on_click_text: Option<String>,
}

impl FakeElement {
    fn base(selector: &str, tag: &str, bbox: BoundingBox) -> Self {
        Self {
            selector: selector.to_string(),
            tag: tag.to_string(),
            bbox,
            visible: true,
            enabled: true,
            text: String::new(),
            value: None,
            options: Vec::new(),
            attributes: HashMap::new(),
            on_click_text: None,
        }
    }

    pub fn button(selector: &str, bbox: BoundingBox) -> Self {
        Self::base(selector, "button", bbox)
    }

    pub fn input(selector: &str, bbox: BoundingBox, value: &str) -> Self {
        Self {
            value: Some(value.to_string()),
            ..Self::base(selector, "input", bbox)
        }
    }

    pub fn select(selector: &str, bbox: BoundingBox, options: &[&str]) -> Self {
        Self {
            value: options.first().map(|o| o.to_string()),
            options: options.iter().map(|o| o.to_string()).collect(),
            ..Self::base(selector, "select", bbox)
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    /// Replaces the page's visible text when clicked.
    pub fn on_click_text(mut self, text: &str) -> Self {
        self.on_click_text = Some(text.to_string());
        self
    }

    fn snapshot(&self) -> ElementSnapshot {
        ElementSnapshot {
            selector: self.selector.clone(),
            tag: self.tag.clone(),
            bbox: self.bbox,
            visible: self.visible,
            enabled: self.enabled,
            text: self.text.clone(),
            value: self.value.clone(),
            aria_label: self.attributes.get("aria-label").cloned(),
            role: self.attributes.get("role").cloned(),
        }
    }
}

#[derive(Default)]
struct FakeState {
    url: String,
    title: String,
    text: String,
    elements: Vec<FakeElement>,
    query_counts: HashMap<String, u32>,
    reveal_after: HashMap<String, u32>,
    history: Vec<String>,
    history_index: usize,
    navigations: Vec<String>,
    focused: Option<usize>,
    select_all: bool,
    clicks: HashMap<String, u32>,
    script_error: Option<String>,
    action_delay: Duration,
    failing_keys: Vec<String>,
}

impl FakeState {
    fn revealed(&self, selector: &str) -> bool {
        match self.reveal_after.get(selector) {
            Some(n) => self.query_counts.get(selector).copied().unwrap_or(0) >= *n,
            None => true,
        }
    }

    fn find(&self, selector: &str) -> Option<usize> {
        if !self.revealed(selector) {
            return None;
        }
        self.elements.iter().position(|e| e.selector == selector)
    }

    fn query(&mut self, selector: &str) -> Option<ElementSnapshot> {
        *self.query_counts.entry(selector.to_string()).or_insert(0) += 1;
        self.find(selector).map(|i| self.elements[i].snapshot())
    }
}

/// `PageDriver` over an in-memory element list. Elements are addressed by
/// their exact selector string.
pub struct FakePage {
    state: Mutex<FakeState>,
}

impl FakePage {
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            state: Mutex::new(FakeState {
                url: url.to_string(),
                title: title.to_string(),
                history: vec![url.to_string()],
                ..Default::default()
            }),
        }
    }

    pub fn set_text(&self, text: &str) {
        self.state.lock().text = text.to_string();
    }

    pub fn add_element(&self, element: FakeElement) {
        self.state.lock().elements.push(element);
    }

    /// The element stays invisible to queries until the `n`th query for it.
    pub fn reveal_after_queries(&self, selector: &str, n: u32) {
        self.state.lock().reveal_after.insert(selector.to_string(), n);
    }

    pub fn query_count(&self, selector: &str) -> u32 {
        self.state.lock().query_counts.get(selector).copied().unwrap_or(0)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().navigations.clone()
    }

    pub fn current_url(&self) -> String {
        self.state.lock().url.clone()
    }

    pub fn value_of(&self, selector: &str) -> Option<String> {
        let state = self.state.lock();
        state
            .elements
            .iter()
            .find(|e| e.selector == selector)
            .and_then(|e| e.value.clone())
    }

    pub fn clicks(&self, selector: &str) -> u32 {
        self.state.lock().clicks.get(selector).copied().unwrap_or(0)
    }

    pub fn fail_scripts_with(&self, message: &str) {
        self.state.lock().script_error = Some(message.to_string());
    }

    /// The next keyDown for `key` times out without reaching the page.
    pub fn fail_key_once(&self, key: &str) {
        self.state.lock().failing_keys.push(key.to_string());
    }

    /// Every mouse and key event takes this long.
    pub fn set_action_delay(&self, delay: Duration) {
        self.state.lock().action_delay = delay;
    }

    async fn pace(&self) {
        let delay = self.state.lock().action_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn navigate(&self, url: &str) -> Result<(), ProtocolError> {
        let mut s = self.state.lock();
        s.navigations.push(url.to_string());
        let keep = s.history_index + 1;
        s.history.truncate(keep);
        s.history.push(url.to_string());
        s.history_index = s.history.len() - 1;
        s.url = url.to_string();
        Ok(())
    }

    async fn wait_for_load(&self, _timeout: Duration) -> Result<bool, ProtocolError> {
        Ok(true)
    }

    async fn history_go(&self, delta: i32) -> Result<(), ProtocolError> {
        let mut s = self.state.lock();
        let target = s.history_index as i64 + delta as i64;
        if target < 0 || target >= s.history.len() as i64 {
            return Err(ProtocolError::Navigation(format!("no history entry at offset {delta}")));
        }
        s.history_index = target as usize;
        s.url = s.history[s.history_index].clone();
        Ok(())
    }

    async fn reload(&self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn page_info(&self) -> Result<PageInfo, ProtocolError> {
        let s = self.state.lock();
        Ok(PageInfo {
            url: s.url.clone(),
            title: s.title.clone(),
            ready_state: "complete".to_string(),
            node_count: s.elements.len() as u64 + 1,
            text_length: s.text.chars().count() as u64,
        })
    }

    async fn visible_text(&self, max_chars: usize) -> Result<String, ProtocolError> {
        Ok(self.state.lock().text.chars().take(max_chars).collect())
    }

    async fn query(&self, selector: &Selector) -> Result<Option<ElementSnapshot>, ProtocolError> {
        Ok(self.state.lock().query(selector.raw()))
    }

    async fn query_all(&self, selector: &Selector, limit: usize) -> Result<Vec<ElementSnapshot>, ProtocolError> {
        Ok(self.state.lock().query(selector.raw()).into_iter().take(limit).collect())
    }

    async fn interactive_elements(&self, limit: usize) -> Result<Vec<ElementSnapshot>, ProtocolError> {
        let s = self.state.lock();
        Ok(s.elements
            .iter()
            .filter(|e| e.visible && s.revealed(&e.selector))
            .take(limit)
            .map(FakeElement::snapshot)
            .collect())
    }

    async fn attribute(&self, selector: &Selector, name: &str) -> Result<Option<String>, ProtocolError> {
        let s = self.state.lock();
        Ok(s.find(selector.raw()).and_then(|i| {
            let el = &s.elements[i];
            match name {
                "value" => el.value.clone(),
                _ => el.attributes.get(name).cloned(),
            }
        }))
    }

    async fn select_option(&self, selector: &Selector, option: &str) -> Result<Option<String>, ProtocolError> {
        let mut s = self.state.lock();
        let Some(i) = s.find(selector.raw()) else {
            return Ok(None);
        };
        let el = &mut s.elements[i];
        if el.options.iter().any(|o| o == option) {
            el.value = Some(option.to_string());
            Ok(Some(option.to_string()))
        } else {
            Ok(None)
        }
    }

    async fn dispatch_mouse(&self, kind: MouseEventKind, x: f64, y: f64) -> Result<(), ProtocolError> {
        self.pace().await;
        if kind != MouseEventKind::Pressed {
            return Ok(());
        }
        let mut s = self.state.lock();
        let hit = s.elements.iter().position(|e| e.visible && e.bbox.contains(x, y));
        s.focused = hit;
        s.select_all = false;
        if let Some(i) = hit {
            let selector = s.elements[i].selector.clone();
            *s.clicks.entry(selector).or_insert(0) += 1;
            if let Some(text) = s.elements[i].on_click_text.clone() {
                s.text = text;
            }
        }
        Ok(())
    }

    async fn dispatch_key(&self, kind: KeyEventKind, key: &KeyInput) -> Result<(), ProtocolError> {
        self.pace().await;
        if kind != KeyEventKind::Down {
            return Ok(());
        }
        let mut s = self.state.lock();
        if let Some(pos) = s.failing_keys.iter().position(|k| *k == key.key) {
            s.failing_keys.remove(pos);
            return Err(ProtocolError::Timeout {
                method: "Input.dispatchKeyEvent".to_string(),
                timeout_ms: 50,
            });
        }
        let Some(i) = s.focused else {
            return Ok(());
        };
        if key.modifiers & (MODIFIER_CTRL | MODIFIER_META) != 0 {
            if key.key.eq_ignore_ascii_case("a") {
                s.select_all = true;
            }
            return Ok(());
        }
        let select_all = std::mem::take(&mut s.select_all);
        let Some(value) = s.elements[i].value.as_mut() else {
            return Ok(());
        };
        match key.key.as_str() {
            "Backspace" => {
                if select_all {
                    value.clear();
                } else {
                    value.pop();
                }
            }
            "Enter" | "Tab" | "Escape" => {}
            _ => {
                if let Some(text) = &key.text {
                    if select_all {
                        value.clear();
                    }
                    value.push_str(text);
                }
            }
        }
        Ok(())
    }

    async fn scroll_by(&self, _dx: f64, _dy: f64) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn evaluate(&self, _expression: &str) -> Result<Value, ProtocolError> {
        match &self.state.lock().script_error {
            Some(message) => Err(ProtocolError::ScriptException(message.clone())),
            None => Ok(Value::Null),
        }
    }

    async fn screenshot(&self, _full_page: bool) -> Result<String, ProtocolError> {
        Ok(base64::engine::general_purpose::STANDARD.encode(b"\x89PNG fake"))
    }

    async fn accessibility_tree(&self) -> Result<Option<Value>, ProtocolError> {
        Ok(None)
    }
}

/// Tool context with short timeouts and no tool-level retries.
pub fn test_context(page: Arc<FakePage>) -> ToolContext {
    ToolContext::new(
        page,
        ToolsConfig {
            element_timeout_ms: 50,
            poll_interval_ms: 1,
            key_delay_ms: 0,
            click_settle_ms: 0,
            navigation_timeout_ms: 50,
            navigation_settle_ms: 1,
            interaction_retries: 0,
            retry_base_delay_ms: 1,
            max_wait_ms: 50,
            ..ToolsConfig::default()
        },
    )
}

pub fn fast_executor_settings() -> ExecutorSettings {
    ExecutorSettings {
        settle: Duration::ZERO,
        stability: StabilityConfig {
            max_wait_ms: 20,
            check_interval_ms: 1,
            min_stable_checks: 1,
        },
        capture: CaptureOptions::default(),
    }
}

// ── LLM ──────────────────────────────────────────────────────────────────────

/// `LlmProvider` that replays queued responses and records every request.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<LlmResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    /// A `submit_plan` tool call carrying `plan`.
    pub fn plan_call(plan: Value) -> LlmResponse {
        LlmResponse {
            content: String::new(),
            reasoning: String::new(),
            tool_calls: vec![ToolCall::function(
                format!("call_{}", uuid::Uuid::new_v4().simple()),
                SUBMIT_PLAN_TOOL,
                &plan,
            )],
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 20,
            },
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest, _cfg: &CallConfig) -> WebClawResult<LlmResponse> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| WebClawError::LlmProvider("scripted responses exhausted".into()))
    }
}
