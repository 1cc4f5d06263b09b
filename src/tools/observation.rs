//! Read-only tools plus the two waiting tools. None of these is retried: a
//! stale read is a fresh answer, not a failure.

use std::time::Duration;

use base64::Engine;
use serde_json::json;

use crate::browser::driver::ElementSnapshot;
use crate::browser::selector::Selector;
use crate::tools::call::{
    AttributeParams, FindElementsParams, ScreenshotParams, SelectorParams, TextPresentParams, ToolName,
    WaitForElementParams, WaitParams, WaitState,
};
use crate::tools::locator::poll_selector;
use crate::tools::registry::ToolContext;
use crate::tools::schema::{ParamSpec, ParamType, ToolCategory, ToolDefinition};
use crate::tools::types::{ToolError, ToolErrorCode, ToolOutput};

const TEXT_SCAN_CHARS: usize = 200_000;
const CANDIDATE_LIMIT: usize = 300;

pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            ToolName::GetPageInfo,
            ToolCategory::Observation,
            "Current URL, title and load state.",
        ),
        ToolDefinition::new(ToolName::GetElementText, ToolCategory::Observation, "Visible text of an element.")
            .param(ParamSpec::required("selector", ParamType::String, "Element selector")),
        ToolDefinition::new(
            ToolName::GetElementAttribute,
            ToolCategory::Observation,
            "Read one attribute of an element.",
        )
        .param(ParamSpec::required("selector", ParamType::String, "Element selector"))
        .param(ParamSpec::required("attribute", ParamType::String, "Attribute name, e.g. href or value"))
        .example(json!({"selector": "a.download", "attribute": "href"})),
        ToolDefinition::new(
            ToolName::FindElements,
            ToolCategory::Observation,
            "Find interactive elements matching a plain-language description; returns selectors usable by other tools.",
        )
        .param(ParamSpec::required("description", ParamType::String, "What the element looks like or says"))
        .param(ParamSpec::optional("limit", ParamType::Integer, "Maximum matches").with_default(json!(10)))
        .example(json!({"description": "login button"})),
        ToolDefinition::new(
            ToolName::CheckTextPresent,
            ToolCategory::Observation,
            "Check whether text appears anywhere on the page.",
        )
        .param(ParamSpec::required("text", ParamType::String, "Text to look for"))
        .param(
            ParamSpec::optional("case_sensitive", ParamType::Boolean, "Match case exactly")
                .with_default(json!(false)),
        ),
        ToolDefinition::new(ToolName::TakeScreenshot, ToolCategory::Observation, "Capture a PNG screenshot.")
            .param(
                ParamSpec::optional("full_page", ParamType::Boolean, "Capture beyond the viewport")
                    .with_default(json!(false)),
            )
            .param(ParamSpec::optional("path", ParamType::String, "Save the PNG to this file")),
        ToolDefinition::new(
            ToolName::WaitForElement,
            ToolCategory::State,
            "Wait until an element exists (attached) or is visible.",
        )
        .param(ParamSpec::required("selector", ParamType::String, "Element selector"))
        .param(
            ParamSpec::optional("timeout_ms", ParamType::Integer, "Maximum wait")
                .with_default(json!(5000)),
        )
        .param(
            ParamSpec::optional("state", ParamType::String, "Condition to wait for")
                .one_of(&["visible", "attached"])
                .with_default(json!("visible")),
        )
        .example(json!({"selector": "#submit", "timeout_ms": 5000})),
        ToolDefinition::new(ToolName::Wait, ToolCategory::State, "Pause for a fixed time.")
            .param(ParamSpec::required("duration_ms", ParamType::Integer, "Milliseconds to wait")),
    ]
}

pub async fn get_page_info(ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
    let info = ctx.driver.page_info().await?;
    Ok(ToolOutput::message(format!("{} ({})", info.title, info.url)).with_data(json!({
        "url": info.url,
        "title": info.title,
        "ready_state": info.ready_state,
        "node_count": info.node_count,
    })))
}

async fn query_now(ctx: &ToolContext, selector: &str) -> Result<(Selector, ElementSnapshot), ToolError> {
    let sel = Selector::parse(selector);
    if sel.is_empty() {
        return Err(ToolError::invalid_params("selector must not be empty"));
    }
    match ctx.driver.query(&sel).await? {
        Some(el) => Ok((sel, el)),
        None => Err(ToolError::element_not_found(selector)),
    }
}

pub async fn get_element_text(ctx: &ToolContext, p: &SelectorParams) -> Result<ToolOutput, ToolError> {
    let (sel, el) = query_now(ctx, &p.selector).await?;
    Ok(ToolOutput::message(el.text.clone()).with_data(json!({
        "selector": sel.raw(),
        "text": el.text,
        "value": el.value,
    })))
}

pub async fn get_element_attribute(ctx: &ToolContext, p: &AttributeParams) -> Result<ToolOutput, ToolError> {
    let (sel, _) = query_now(ctx, &p.selector).await?;
    let value = ctx.driver.attribute(&sel, &p.attribute).await?;
    let message = match &value {
        Some(v) => format!("{}={v}", p.attribute),
        None => format!("{} has no '{}' attribute", sel, p.attribute),
    };
    Ok(ToolOutput::message(message).with_data(json!({
        "selector": sel.raw(),
        "attribute": p.attribute,
        "value": value,
    })))
}

fn tokens(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Share of description tokens found in the element's text, label, role,
/// tag or selector. Text and label hits weigh double.
fn match_score(description: &[String], el: &ElementSnapshot) -> f64 {
    if description.is_empty() {
        return 0.0;
    }
    let strong: Vec<String> = tokens(&format!("{} {}", el.text, el.aria_label.as_deref().unwrap_or_default()));
    let weak: Vec<String> = tokens(&format!(
        "{} {} {}",
        el.tag,
        el.role.as_deref().unwrap_or_default(),
        el.selector
    ));
    let mut score = 0.0;
    for t in description {
        if strong.iter().any(|s| s == t) {
            score += 2.0;
        } else if strong.iter().any(|s| s.contains(t.as_str())) || weak.iter().any(|w| w == t) {
            score += 1.0;
        }
    }
    score / (2.0 * description.len() as f64)
}

pub async fn find_elements(ctx: &ToolContext, p: &FindElementsParams) -> Result<ToolOutput, ToolError> {
    let wanted = tokens(&p.description);
    let candidates = ctx.driver.interactive_elements(CANDIDATE_LIMIT).await?;

    let mut scored: Vec<(f64, ElementSnapshot)> = candidates
        .into_iter()
        .map(|el| (match_score(&wanted, &el), el))
        .filter(|(score, _)| *score > 0.0)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(p.limit.max(1) as usize);

    let matches: Vec<_> = scored
        .iter()
        .map(|(score, el)| {
            json!({
                "selector": el.selector,
                "tag": el.tag,
                "text": el.text,
                "aria_label": el.aria_label,
                "score": (score * 100.0).round() / 100.0,
            })
        })
        .collect();

    let message = if matches.is_empty() {
        format!("No elements matched '{}'", p.description)
    } else {
        format!("Found {} element(s) matching '{}'", matches.len(), p.description)
    };
    Ok(ToolOutput::message(message).with_data(json!({ "matches": matches })))
}

pub async fn check_text_present(ctx: &ToolContext, p: &TextPresentParams) -> Result<ToolOutput, ToolError> {
    let text = ctx.driver.visible_text(TEXT_SCAN_CHARS).await?;
    let present = if p.case_sensitive {
        text.contains(&p.text)
    } else {
        text.to_lowercase().contains(&p.text.to_lowercase())
    };
    let message = if present {
        format!("'{}' is present", p.text)
    } else {
        format!("'{}' is not present", p.text)
    };
    Ok(ToolOutput::message(message).with_data(json!({ "text": p.text, "present": present })))
}

pub async fn take_screenshot(ctx: &ToolContext, p: &ScreenshotParams) -> Result<ToolOutput, ToolError> {
    let data = ctx.driver.screenshot(p.full_page).await?;
    match &p.path {
        Some(path) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data.as_bytes())
                .map_err(|e| ToolError::new(ToolErrorCode::ExecutionError, format!("screenshot decode: {e}")))?;
            if let Some(parent) = std::path::Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ToolError::new(ToolErrorCode::ExecutionError, e.to_string()))?;
            }
            tokio::fs::write(path, &bytes)
                .await
                .map_err(|e| ToolError::new(ToolErrorCode::ExecutionError, format!("write {path}: {e}")))?;
            Ok(ToolOutput::message(format!("Saved screenshot to {path}"))
                .with_data(json!({ "path": path, "bytes": bytes.len() })))
        }
        None => Ok(ToolOutput::message("Captured screenshot").with_data(json!({ "image_base64": data }))),
    }
}

pub async fn wait_for_element(ctx: &ToolContext, p: &WaitForElementParams) -> Result<ToolOutput, ToolError> {
    let sel = Selector::parse(&p.selector);
    if sel.is_empty() {
        return Err(ToolError::invalid_params("selector must not be empty"));
    }
    let budget = Duration::from_millis(p.timeout_ms.min(ctx.settings.max_wait_ms));
    let require_visible = p.state == WaitState::Visible;
    match poll_selector(ctx.driver.as_ref(), &sel, budget, ctx.settings.poll_interval(), require_visible).await? {
        Some(el) => Ok(ToolOutput::message(format!("{sel} is ready")).with_data(json!({
            "selector": sel.raw(),
            "visible": el.visible,
            "bbox": el.bbox,
        }))),
        None => Err(ToolError::new(
            ToolErrorCode::ElementNotFound,
            format!("'{}' did not appear within {}ms", p.selector, budget.as_millis()),
        )
        .with_suggestion("check the selector with find_elements")),
    }
}

pub async fn wait(ctx: &ToolContext, p: &WaitParams) -> Result<ToolOutput, ToolError> {
    let ms = p.duration_ms.min(ctx.settings.max_wait_ms);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(ToolOutput::message(format!("Waited {ms}ms")).with_data(json!({ "waited_ms": ms })))
}
