//! Closed set of tools and their typed parameters.
//!
//! Parameters arrive as JSON already checked and default-filled against the
//! tool's schema; `ToolCall::parse` turns them into one of these structs so
//! handlers never touch raw JSON.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::types::{ToolError, ToolErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    NavigateToUrl,
    GoBack,
    GoForward,
    ReloadPage,
    ClickElement,
    TypeText,
    SelectOption,
    PressKey,
    ScrollPage,
    GetPageInfo,
    GetElementText,
    GetElementAttribute,
    FindElements,
    CheckTextPresent,
    TakeScreenshot,
    WaitForElement,
    Wait,
    ExecuteScript,
}

impl ToolName {
    pub const ALL: [ToolName; 18] = [
        Self::NavigateToUrl,
        Self::GoBack,
        Self::GoForward,
        Self::ReloadPage,
        Self::ClickElement,
        Self::TypeText,
        Self::SelectOption,
        Self::PressKey,
        Self::ScrollPage,
        Self::GetPageInfo,
        Self::GetElementText,
        Self::GetElementAttribute,
        Self::FindElements,
        Self::CheckTextPresent,
        Self::TakeScreenshot,
        Self::WaitForElement,
        Self::Wait,
        Self::ExecuteScript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NavigateToUrl => "navigate_to_url",
            Self::GoBack => "go_back",
            Self::GoForward => "go_forward",
            Self::ReloadPage => "reload_page",
            Self::ClickElement => "click_element",
            Self::TypeText => "type_text",
            Self::SelectOption => "select_option",
            Self::PressKey => "press_key",
            Self::ScrollPage => "scroll_page",
            Self::GetPageInfo => "get_page_info",
            Self::GetElementText => "get_element_text",
            Self::GetElementAttribute => "get_element_attribute",
            Self::FindElements => "find_elements",
            Self::CheckTextPresent => "check_text_present",
            Self::TakeScreenshot => "take_screenshot",
            Self::WaitForElement => "wait_for_element",
            Self::Wait => "wait",
            Self::ExecuteScript => "execute_script",
        }
    }

    pub fn is_navigation(&self) -> bool {
        matches!(self, Self::NavigateToUrl | Self::GoBack | Self::GoForward | Self::ReloadPage)
    }

    /// Read-only tools: never retried, safe to call twice.
    pub fn is_observation(&self) -> bool {
        matches!(
            self,
            Self::GetPageInfo
                | Self::GetElementText
                | Self::GetElementAttribute
                | Self::FindElements
                | Self::CheckTextPresent
                | Self::TakeScreenshot
        )
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                ToolError::new(ToolErrorCode::InvalidTool, format!("unknown tool '{s}'"))
                    .with_suggestion("pick one of the tools listed in the tool schema")
            })
    }
}

// ── Parameter structs ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NavigateParams {
    pub url: String,
    #[serde(default = "default_true")]
    pub wait_for_load: bool,
    #[serde(default)]
    pub expected_url_contains: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClickParams {
    pub selector: String,
    #[serde(default)]
    pub alternate_selectors: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub verify: bool,
    #[serde(default)]
    pub offset_x: f64,
    #[serde(default)]
    pub offset_y: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TypeParams {
    pub selector: String,
    pub text: String,
    #[serde(default)]
    pub alternate_selectors: Vec<String>,
    #[serde(default)]
    pub clear: bool,
    #[serde(default)]
    pub submit: bool,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SelectParams {
    pub selector: String,
    pub option: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PressKeyParams {
    pub key: String,
    #[serde(default)]
    pub modifiers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
    Top,
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScrollParams {
    pub direction: ScrollDirection,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SelectorParams {
    pub selector: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttributeParams {
    pub selector: String,
    pub attribute: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FindElementsParams {
    pub description: String,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextPresentParams {
    pub text: String,
    #[serde(default)]
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScreenshotParams {
    #[serde(default)]
    pub full_page: bool,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    Visible,
    Attached,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WaitForElementParams {
    pub selector: String,
    pub timeout_ms: u64,
    pub state: WaitState,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WaitParams {
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptParams {
    pub script: String,
}

fn default_true() -> bool {
    true
}

/// One fully-typed tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    NavigateToUrl(NavigateParams),
    GoBack,
    GoForward,
    ReloadPage,
    ClickElement(ClickParams),
    TypeText(TypeParams),
    SelectOption(SelectParams),
    PressKey(PressKeyParams),
    ScrollPage(ScrollParams),
    GetPageInfo,
    GetElementText(SelectorParams),
    GetElementAttribute(AttributeParams),
    FindElements(FindElementsParams),
    CheckTextPresent(TextPresentParams),
    TakeScreenshot(ScreenshotParams),
    WaitForElement(WaitForElementParams),
    Wait(WaitParams),
    ExecuteScript(ScriptParams),
}

impl ToolCall {
    pub fn parse(name: ToolName, params: Map<String, Value>) -> Result<Self, ToolError> {
        let v = Value::Object(params);
        Ok(match name {
            ToolName::NavigateToUrl => Self::NavigateToUrl(typed(name, v)?),
            ToolName::GoBack => Self::GoBack,
            ToolName::GoForward => Self::GoForward,
            ToolName::ReloadPage => Self::ReloadPage,
            ToolName::ClickElement => Self::ClickElement(typed(name, v)?),
            ToolName::TypeText => Self::TypeText(typed(name, v)?),
            ToolName::SelectOption => Self::SelectOption(typed(name, v)?),
            ToolName::PressKey => Self::PressKey(typed(name, v)?),
            ToolName::ScrollPage => Self::ScrollPage(typed(name, v)?),
            ToolName::GetPageInfo => Self::GetPageInfo,
            ToolName::GetElementText => Self::GetElementText(typed(name, v)?),
            ToolName::GetElementAttribute => Self::GetElementAttribute(typed(name, v)?),
            ToolName::FindElements => Self::FindElements(typed(name, v)?),
            ToolName::CheckTextPresent => Self::CheckTextPresent(typed(name, v)?),
            ToolName::TakeScreenshot => Self::TakeScreenshot(typed(name, v)?),
            ToolName::WaitForElement => Self::WaitForElement(typed(name, v)?),
            ToolName::Wait => Self::Wait(typed(name, v)?),
            ToolName::ExecuteScript => Self::ExecuteScript(typed(name, v)?),
        })
    }

    pub fn name(&self) -> ToolName {
        match self {
            Self::NavigateToUrl(_) => ToolName::NavigateToUrl,
            Self::GoBack => ToolName::GoBack,
            Self::GoForward => ToolName::GoForward,
            Self::ReloadPage => ToolName::ReloadPage,
            Self::ClickElement(_) => ToolName::ClickElement,
            Self::TypeText(_) => ToolName::TypeText,
            Self::SelectOption(_) => ToolName::SelectOption,
            Self::PressKey(_) => ToolName::PressKey,
            Self::ScrollPage(_) => ToolName::ScrollPage,
            Self::GetPageInfo => ToolName::GetPageInfo,
            Self::GetElementText(_) => ToolName::GetElementText,
            Self::GetElementAttribute(_) => ToolName::GetElementAttribute,
            Self::FindElements(_) => ToolName::FindElements,
            Self::CheckTextPresent(_) => ToolName::CheckTextPresent,
            Self::TakeScreenshot(_) => ToolName::TakeScreenshot,
            Self::WaitForElement(_) => ToolName::WaitForElement,
            Self::Wait(_) => ToolName::Wait,
            Self::ExecuteScript(_) => ToolName::ExecuteScript,
        }
    }
}

fn typed<T: serde::de::DeserializeOwned>(name: ToolName, v: Value) -> Result<T, ToolError> {
    serde_json::from_value(v).map_err(|e| ToolError::invalid_params(format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for name in ToolName::ALL {
            assert_eq!(name.as_str().parse::<ToolName>().unwrap(), name);
        }
        let err = "teleport".parse::<ToolName>().unwrap_err();
        assert_eq!(err.code, ToolErrorCode::InvalidTool);
    }

    #[test]
    fn parses_click_with_defaults() {
        let call = ToolCall::parse(ToolName::ClickElement, obj(json!({"selector": "#go"}))).unwrap();
        match call {
            ToolCall::ClickElement(p) => {
                assert_eq!(p.selector, "#go");
                assert!(p.verify);
                assert!(p.alternate_selectors.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mistyped_field_is_invalid_parameters() {
        let err = ToolCall::parse(ToolName::Wait, obj(json!({"duration_ms": "soon"}))).unwrap_err();
        assert_eq!(err.code, ToolErrorCode::InvalidParameters);
    }
}
