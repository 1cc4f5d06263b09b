//! `PageDriver` over a live CDP session.
//!
//! DOM work happens in small page-side scripts evaluated through
//! `Runtime.evaluate`; input goes through the `Input` domain so pages see
//! trusted events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

use crate::browser::cdp::CdpClient;
use crate::browser::context::truncate_chars;
use crate::browser::driver::{
    ElementSnapshot, KeyEventKind, KeyInput, MouseEventKind, PageDriver, PageInfo, ProtocolError,
};
use crate::browser::selector::{Selector, SelectorStrategy};

const AX_NODE_LIMIT: usize = 300;

pub struct CdpPage {
    client: Arc<CdpClient>,
    /// Armed before each navigation so the load event cannot be missed.
    load_events: Mutex<Option<mpsc::Receiver<Value>>>,
}

impl CdpPage {
    pub async fn connect(endpoint: &str, command_timeout: Duration) -> Result<Self, ProtocolError> {
        let client = CdpClient::connect_endpoint(endpoint, command_timeout).await?;
        Self::attach(Arc::new(client)).await
    }

    pub async fn attach(client: Arc<CdpClient>) -> Result<Self, ProtocolError> {
        client.enable_domain("Page").await?;
        client.enable_domain("Runtime").await?;
        Ok(Self {
            client,
            load_events: Mutex::new(None),
        })
    }

    async fn arm_load_signal(&self) {
        let rx = self.client.subscribe_event("Page.loadEventFired").await;
        *self.load_events.lock().await = Some(rx);
        self.client.prune_listeners().await;
    }

    async fn eval_elements(&self, script: String) -> Result<Vec<ElementSnapshot>, ProtocolError> {
        let value = self.client.evaluate_js(&script).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(format!("element list: {e}")))
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    async fn navigate(&self, url: &str) -> Result<(), ProtocolError> {
        self.arm_load_signal().await;
        let result = self.client.send_command("Page.navigate", json!({ "url": url })).await?;
        match result.get("errorText").and_then(Value::as_str) {
            Some(err) if !err.is_empty() => Err(ProtocolError::Navigation(format!("{url}: {err}"))),
            _ => Ok(()),
        }
    }

    async fn wait_for_load(&self, timeout: Duration) -> Result<bool, ProtocolError> {
        let armed = self.load_events.lock().await.take();
        if let Some(mut rx) = armed {
            return Ok(matches!(tokio::time::timeout(timeout, rx.recv()).await, Ok(Some(_))));
        }

        // Nothing armed: fall back to polling readyState.
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let state = self.client.evaluate_js("document.readyState").await?;
            if state.as_str() == Some("complete") {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn history_go(&self, delta: i32) -> Result<(), ProtocolError> {
        let history = self.client.send_command("Page.getNavigationHistory", json!({})).await?;
        let current = history
            .get("currentIndex")
            .and_then(Value::as_i64)
            .ok_or_else(|| ProtocolError::Malformed("navigation history without currentIndex".into()))?;
        let entries = history
            .get("entries")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let target = current + delta as i64;
        let entry_id = usize::try_from(target)
            .ok()
            .and_then(|idx| entries.get(idx))
            .and_then(|e| e.get("id"))
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                ProtocolError::Navigation(format!("no history entry at offset {delta}"))
            })?;

        self.arm_load_signal().await;
        self.client
            .send_command("Page.navigateToHistoryEntry", json!({ "entryId": entry_id }))
            .await?;
        Ok(())
    }

    async fn reload(&self) -> Result<(), ProtocolError> {
        self.arm_load_signal().await;
        self.client.send_command("Page.reload", json!({})).await?;
        Ok(())
    }

    async fn page_info(&self) -> Result<PageInfo, ProtocolError> {
        let value = self.client.evaluate_js(PAGE_INFO_JS).await?;
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(format!("page info: {e}")))
    }

    async fn visible_text(&self, max_chars: usize) -> Result<String, ProtocolError> {
        let value = self
            .client
            .evaluate_js("document.body ? document.body.innerText : ''")
            .await?;
        let text = value.as_str().unwrap_or_default();
        Ok(truncate_chars(text, max_chars))
    }

    async fn query(&self, selector: &Selector) -> Result<Option<ElementSnapshot>, ProtocolError> {
        Ok(self.query_all(selector, 1).await?.into_iter().next())
    }

    async fn query_all(
        &self,
        selector: &Selector,
        limit: usize,
    ) -> Result<Vec<ElementSnapshot>, ProtocolError> {
        let script = format!(
            "(() => {{ {FINDER_JS} {DESCRIBE_JS} \
             return __find({strategy}, {value}).slice(0, {limit}).map(el => __describe(el, {raw})); }})()",
            strategy = js_str(selector.strategy().as_str()),
            value = js_str(selector.value()),
            raw = js_str(selector.raw()),
        );
        self.eval_elements(script).await
    }

    async fn interactive_elements(&self, limit: usize) -> Result<Vec<ElementSnapshot>, ProtocolError> {
        let script = format!(
            "(() => {{ {DESCRIBE_JS} {UNIQUE_SELECTOR_JS} \
             const q = 'a[href], button, input, select, textarea, [role=button], [role=link], \
             [role=checkbox], [role=tab], [role=menuitem], [contenteditable=true], [onclick]'; \
             return Array.from(document.querySelectorAll(q)) \
               .map(el => __describe(el, __uniqueSelector(el))) \
               .filter(d => d.visible) \
               .slice(0, {limit}); }})()"
        );
        self.eval_elements(script).await
    }

    async fn attribute(&self, selector: &Selector, name: &str) -> Result<Option<String>, ProtocolError> {
        let script = format!(
            "(() => {{ {FINDER_JS} const el = __find({strategy}, {value})[0]; \
             return el ? el.getAttribute({name}) : null; }})()",
            strategy = js_str(selector.strategy().as_str()),
            value = js_str(selector.value()),
            name = js_str(name),
        );
        let value = self.client.evaluate_js(&script).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn select_option(&self, selector: &Selector, option: &str) -> Result<Option<String>, ProtocolError> {
        let script = format!(
            "(() => {{ {FINDER_JS} const el = __find({strategy}, {value})[0]; \
             if (!el || !el.options) return null; \
             const wanted = {option}; \
             const opt = Array.from(el.options).find(o => o.value === wanted) \
               || Array.from(el.options).find(o => o.label.trim() === wanted || o.text.trim() === wanted); \
             if (!opt) return null; \
             el.value = opt.value; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return opt.value; }})()",
            strategy = js_str(selector.strategy().as_str()),
            value = js_str(selector.value()),
            option = js_str(option),
        );
        let value = self.client.evaluate_js(&script).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn dispatch_mouse(&self, kind: MouseEventKind, x: f64, y: f64) -> Result<(), ProtocolError> {
        let button = if kind == MouseEventKind::Moved { "none" } else { "left" };
        self.client
            .send_command(
                "Input.dispatchMouseEvent",
                json!({
                    "type": kind.cdp_name(),
                    "x": x,
                    "y": y,
                    "button": button,
                    "clickCount": if kind == MouseEventKind::Moved { 0 } else { 1 },
                }),
            )
            .await?;
        Ok(())
    }

    async fn dispatch_key(&self, kind: KeyEventKind, key: &KeyInput) -> Result<(), ProtocolError> {
        // keyDown without text would insert nothing anyway; rawKeyDown keeps
        // named keys from producing a stray character.
        let event_type = match (kind, key.text.is_some()) {
            (KeyEventKind::Down, false) => "rawKeyDown",
            _ => kind.cdp_name(),
        };
        let mut params = json!({
            "type": event_type,
            "key": key.key,
            "code": key.code,
            "windowsVirtualKeyCode": key.key_code,
            "nativeVirtualKeyCode": key.key_code,
            "modifiers": key.modifiers,
        });
        if let (KeyEventKind::Down, Some(text)) = (kind, &key.text) {
            params["text"] = json!(text);
        }
        self.client.send_command("Input.dispatchKeyEvent", params).await?;
        Ok(())
    }

    async fn scroll_by(&self, dx: f64, dy: f64) -> Result<(), ProtocolError> {
        self.client
            .evaluate_js(&format!("window.scrollBy({dx}, {dy}); true"))
            .await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, ProtocolError> {
        self.client.evaluate_js(expression).await
    }

    async fn screenshot(&self, full_page: bool) -> Result<String, ProtocolError> {
        let result = self
            .client
            .send_command(
                "Page.captureScreenshot",
                json!({ "format": "png", "captureBeyondViewport": full_page }),
            )
            .await?;
        result
            .get("data")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProtocolError::Malformed("screenshot without data".into()))
    }

    async fn accessibility_tree(&self) -> Result<Option<Value>, ProtocolError> {
        let result = match self.client.send_command("Accessibility.getFullAXTree", json!({})).await {
            Ok(v) => v,
            // Older targets lack the domain; the tree is optional context.
            Err(ProtocolError::Remote { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let nodes = result
            .get("nodes")
            .and_then(Value::as_array)
            .map(|nodes| compact_ax_nodes(nodes))
            .unwrap_or_default();
        Ok(Some(Value::Array(nodes)))
    }
}

/// Keeps non-ignored nodes that carry a role and a name.
fn compact_ax_nodes(nodes: &[Value]) -> Vec<Value> {
    nodes
        .iter()
        .filter(|n| !n.get("ignored").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|n| {
            let role = n.pointer("/role/value").and_then(Value::as_str)?;
            let name = n.pointer("/name/value").and_then(Value::as_str).unwrap_or_default();
            if name.trim().is_empty() || matches!(role, "generic" | "none" | "InlineTextBox") {
                return None;
            }
            Some(json!({ "role": role, "name": name }))
        })
        .take(AX_NODE_LIMIT)
        .collect()
}

fn js_str(s: &str) -> String {
    // A JSON string literal is a valid JS string literal.
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Strategy names must match `SelectorStrategy::as_str`.
const FINDER_JS: &str = r#"
const __find = (strategy, value) => {
  const all = (q) => { try { return Array.from(document.querySelectorAll(q)); } catch (e) { return []; } };
  const norm = (s) => (s || '').replace(/\s+/g, ' ').trim();
  switch (strategy) {
    case 'css': return all(value);
    case 'id': { const el = document.getElementById(value); return el ? [el] : []; }
    case 'testid': return all('[data-testid="' + CSS.escape(value) + '"]');
    case 'aria': return all('[aria-label]').filter(el => norm(el.getAttribute('aria-label')) === norm(value));
    case 'role': {
      const idx = value.indexOf(':');
      const role = idx >= 0 ? value.slice(0, idx) : value;
      const name = idx >= 0 ? norm(value.slice(idx + 1)) : '';
      const implicit = { button: 'button', link: 'a[href]', textbox: 'input:not([type]), input[type=text], textarea', checkbox: 'input[type=checkbox]', combobox: 'select' };
      const q = '[role="' + CSS.escape(role) + '"]' + (implicit[role] ? ', ' + implicit[role] : '');
      return all(q).filter(el => !name || norm(el.getAttribute('aria-label')) === name || norm(el.innerText) === name);
    }
    case 'text': {
      const wanted = norm(value).toLowerCase();
      const hits = all('body *').filter(el => norm(el.innerText).toLowerCase().includes(wanted));
      return hits.filter(el => !Array.from(el.children).some(c => hits.includes(c)));
    }
    default: return [];
  }
};
"#;

const DESCRIBE_JS: &str = r#"
const __describe = (el, selector) => {
  const r = el.getBoundingClientRect();
  const style = window.getComputedStyle(el);
  const visible = r.width > 0 && r.height > 0 && style.visibility !== 'hidden' && style.display !== 'none' && style.opacity !== '0';
  return {
    selector: selector,
    tag: el.tagName.toLowerCase(),
    bbox: { x: r.x, y: r.y, width: r.width, height: r.height },
    visible: visible,
    enabled: !el.disabled && el.getAttribute('aria-disabled') !== 'true',
    text: (el.innerText || el.textContent || '').trim().slice(0, 200),
    value: ('value' in el && typeof el.value === 'string') ? el.value : null,
    aria_label: el.getAttribute('aria-label'),
    role: el.getAttribute('role'),
  };
};
"#;

const UNIQUE_SELECTOR_JS: &str = r#"
const __uniqueSelector = (el) => {
  if (el.id) return '#' + CSS.escape(el.id);
  const tid = el.getAttribute('data-testid');
  if (tid) return '[data-testid="' + CSS.escape(tid) + '"]';
  const parts = [];
  let node = el;
  while (node && node.nodeType === 1 && node !== document.body) {
    if (node.id) { parts.unshift('#' + CSS.escape(node.id)); break; }
    const tag = node.tagName.toLowerCase();
    const same = node.parentElement ? Array.from(node.parentElement.children).filter(c => c.tagName === node.tagName) : [];
    parts.unshift(same.length > 1 ? tag + ':nth-of-type(' + (same.indexOf(node) + 1) + ')' : tag);
    node = node.parentElement;
  }
  return parts.join(' > ');
};
"#;

const PAGE_INFO_JS: &str = r#"(() => ({
  url: location.href,
  title: document.title,
  ready_state: document.readyState,
  node_count: document.getElementsByTagName('*').length,
  text_length: document.body ? document.body.innerText.length : 0,
}))()"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_strings_are_escaped() {
        assert_eq!(js_str(r#"a"b"#), r#""a\"b""#);
        assert_eq!(js_str("line\nbreak"), r#""line\nbreak""#);
    }

    #[test]
    fn finder_covers_every_strategy() {
        for strategy in [
            SelectorStrategy::Css,
            SelectorStrategy::Id,
            SelectorStrategy::TestId,
            SelectorStrategy::AriaLabel,
            SelectorStrategy::Role,
            SelectorStrategy::Text,
        ] {
            assert!(FINDER_JS.contains(&format!("case '{}'", strategy.as_str())));
        }
    }

    #[test]
    fn ax_nodes_are_compacted() {
        let nodes = vec![
            json!({"ignored": true, "role": {"value": "button"}, "name": {"value": "Hidden"}}),
            json!({"role": {"value": "button"}, "name": {"value": "Sign in"}}),
            json!({"role": {"value": "generic"}, "name": {"value": "wrapper"}}),
            json!({"role": {"value": "link"}}),
        ];
        let out = compact_ax_nodes(&nodes);
        assert_eq!(out, vec![json!({"role": "button", "name": "Sign in"})]);
    }
}
