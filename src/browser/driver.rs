use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::browser::selector::Selector;

/// Failures at the remote-debugging boundary.
///
/// Script exceptions raised inside the page are kept apart from transport
/// failures so callers can tell "the page threw" from "the browser is gone".
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("CDP command '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("CDP transport error: {0}")]
    Transport(String),

    #[error("CDP error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Script exception: {0}")]
    ScriptException(String),

    #[error("Navigation error: {0}")]
    Navigation(String),

    #[error("Unexpected CDP response: {0}")]
    Malformed(String),
}

/// Element bounding box in CSS pixels, viewport-relative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }
}

/// Point-in-time description of one matched element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub selector: String,
    pub tag: String,
    pub bbox: BoundingBox,
    pub visible: bool,
    pub enabled: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
    pub ready_state: String,
    pub node_count: u64,
    pub text_length: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEventKind {
    Moved,
    Pressed,
    Released,
}

impl MouseEventKind {
    pub fn cdp_name(&self) -> &'static str {
        match self {
            Self::Moved => "mouseMoved",
            Self::Pressed => "mousePressed",
            Self::Released => "mouseReleased",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    Down,
    Up,
}

impl KeyEventKind {
    pub fn cdp_name(&self) -> &'static str {
        match self {
            Self::Down => "keyDown",
            Self::Up => "keyUp",
        }
    }
}

pub const MODIFIER_ALT: u32 = 1;
pub const MODIFIER_CTRL: u32 = 2;
pub const MODIFIER_META: u32 = 4;
pub const MODIFIER_SHIFT: u32 = 8;

/// One key as CDP's `Input.dispatchKeyEvent` wants it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInput {
    pub key: String,
    pub code: String,
    pub text: Option<String>,
    pub key_code: u32,
    pub modifiers: u32,
}

impl KeyInput {
    /// A printable character.
    pub fn char(c: char) -> Self {
        let code = if c.is_ascii_alphabetic() {
            format!("Key{}", c.to_ascii_uppercase())
        } else if c.is_ascii_digit() {
            format!("Digit{c}")
        } else if c == ' ' {
            "Space".to_string()
        } else {
            String::new()
        };
        let key_code = if c.is_ascii_alphanumeric() {
            c.to_ascii_uppercase() as u32
        } else if c == ' ' {
            32
        } else {
            0
        };
        Self {
            key: c.to_string(),
            code,
            text: Some(c.to_string()),
            key_code,
            modifiers: 0,
        }
    }

    /// A named, non-printing key such as `Enter` or `Backspace`.
    /// Returns `None` for names this crate does not know how to dispatch.
    pub fn named(name: &str) -> Option<Self> {
        let (key, code, key_code, text): (&str, &str, u32, Option<&str>) = match name {
            "Enter" => ("Enter", "Enter", 13, Some("\r")),
            "Tab" => ("Tab", "Tab", 9, None),
            "Backspace" => ("Backspace", "Backspace", 8, None),
            "Delete" => ("Delete", "Delete", 46, None),
            "Escape" => ("Escape", "Escape", 27, None),
            "ArrowUp" => ("ArrowUp", "ArrowUp", 38, None),
            "ArrowDown" => ("ArrowDown", "ArrowDown", 40, None),
            "ArrowLeft" => ("ArrowLeft", "ArrowLeft", 37, None),
            "ArrowRight" => ("ArrowRight", "ArrowRight", 39, None),
            "Home" => ("Home", "Home", 36, None),
            "End" => ("End", "End", 35, None),
            "PageUp" => ("PageUp", "PageUp", 33, None),
            "PageDown" => ("PageDown", "PageDown", 34, None),
            _ => return None,
        };
        Some(Self {
            key: key.to_string(),
            code: code.to_string(),
            text: text.map(str::to_string),
            key_code,
            modifiers: 0,
        })
    }

    pub fn with_modifiers(mut self, modifiers: u32) -> Self {
        self.modifiers = modifiers;
        if modifiers & (MODIFIER_CTRL | MODIFIER_META | MODIFIER_ALT) != 0 {
            self.text = None;
        }
        self
    }
}

/// Command surface of one browser tab.
///
/// Every method is a bounded remote call: implementations must apply their
/// own per-command timeout and never wait indefinitely.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), ProtocolError>;

    /// Waits for the page load event. `Ok(false)` means the timeout elapsed
    /// without a load signal, which callers treat as "settled enough".
    async fn wait_for_load(&self, timeout: Duration) -> Result<bool, ProtocolError>;

    async fn history_go(&self, delta: i32) -> Result<(), ProtocolError>;

    async fn reload(&self) -> Result<(), ProtocolError>;

    async fn page_info(&self) -> Result<PageInfo, ProtocolError>;

    async fn visible_text(&self, max_chars: usize) -> Result<String, ProtocolError>;

    async fn query(&self, selector: &Selector) -> Result<Option<ElementSnapshot>, ProtocolError>;

    async fn query_all(
        &self,
        selector: &Selector,
        limit: usize,
    ) -> Result<Vec<ElementSnapshot>, ProtocolError>;

    /// Visible links, buttons, inputs and other interactive elements, each
    /// with a unique CSS selector usable by later steps.
    async fn interactive_elements(&self, limit: usize) -> Result<Vec<ElementSnapshot>, ProtocolError>;

    async fn attribute(&self, selector: &Selector, name: &str) -> Result<Option<String>, ProtocolError>;

    /// Selects an `<option>` by value or visible label. Returns the selected
    /// value, or `None` when no option matched.
    async fn select_option(&self, selector: &Selector, option: &str) -> Result<Option<String>, ProtocolError>;

    async fn dispatch_mouse(&self, kind: MouseEventKind, x: f64, y: f64) -> Result<(), ProtocolError>;

    async fn dispatch_key(&self, kind: KeyEventKind, key: &KeyInput) -> Result<(), ProtocolError>;

    async fn scroll_by(&self, dx: f64, dy: f64) -> Result<(), ProtocolError>;

    async fn evaluate(&self, expression: &str) -> Result<Value, ProtocolError>;

    /// Base64-encoded PNG.
    async fn screenshot(&self, full_page: bool) -> Result<String, ProtocolError>;

    async fn accessibility_tree(&self) -> Result<Option<Value>, ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_center_and_contains() {
        let b = BoundingBox::new(10.0, 20.0, 100.0, 40.0);
        assert_eq!(b.center(), (60.0, 40.0));
        assert!(b.contains(60.0, 40.0));
        assert!(!b.contains(5.0, 40.0));
        assert!(BoundingBox::new(0.0, 0.0, 0.0, 10.0).is_empty());
    }

    #[test]
    fn key_input_for_chars_and_names() {
        let a = KeyInput::char('a');
        assert_eq!(a.code, "KeyA");
        assert_eq!(a.text.as_deref(), Some("a"));
        let enter = KeyInput::named("Enter").unwrap();
        assert_eq!(enter.key_code, 13);
        assert!(KeyInput::named("Hyper").is_none());
        let select_all = KeyInput::char('a').with_modifiers(MODIFIER_CTRL);
        assert!(select_all.text.is_none());
    }
}
