use std::time::Duration;

use serde_json::json;

use crate::browser::driver::ProtocolError;
use crate::tools::call::{NavigateParams, ToolName};
use crate::tools::registry::ToolContext;
use crate::tools::schema::{ParamSpec, ParamType, ToolCategory, ToolDefinition};
use crate::tools::types::{ToolError, ToolErrorCode, ToolOutput};
use crate::tools::url::normalize_url;

pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            ToolName::NavigateToUrl,
            ToolCategory::Navigation,
            "Open a URL in the current tab. Bare domains get https://, free text becomes a web search.",
        )
        .param(ParamSpec::required("url", ParamType::String, "URL, bare domain, or search text"))
        .param(
            ParamSpec::optional("wait_for_load", ParamType::Boolean, "Wait for the page load event")
                .with_default(json!(true)),
        )
        .param(ParamSpec::optional(
            "expected_url_contains",
            ParamType::String,
            "Fail unless the final URL contains this fragment",
        ))
        .param(ParamSpec::optional("timeout_ms", ParamType::Integer, "Load timeout in milliseconds"))
        .example(json!({"url": "example.com"}))
        .example(json!({"url": "https://github.com/login", "expected_url_contains": "/login"})),
        ToolDefinition::new(ToolName::GoBack, ToolCategory::Navigation, "Go back one entry in history."),
        ToolDefinition::new(ToolName::GoForward, ToolCategory::Navigation, "Go forward one entry in history."),
        ToolDefinition::new(ToolName::ReloadPage, ToolCategory::Navigation, "Reload the current page."),
    ]
}

fn nav_error(e: ProtocolError) -> ToolError {
    match e {
        ProtocolError::Timeout { .. } => ToolError::new(ToolErrorCode::NavigationTimeout, e.to_string())
            .with_suggestion("retry, or raise timeout_ms for slow pages"),
        ProtocolError::Navigation(msg) => ToolError::new(ToolErrorCode::NavigationFailed, msg)
            .with_suggestion("check that the URL is reachable"),
        other => other.into(),
    }
}

/// Waits for the load signal, falling back to a fixed settle window.
/// Returns whether a load event was seen.
async fn settle_after_navigation(ctx: &ToolContext, wait_for_load: bool, timeout_ms: u64) -> Result<bool, ToolError> {
    let settle = Duration::from_millis(ctx.settings.navigation_settle_ms);
    if !wait_for_load {
        tokio::time::sleep(settle).await;
        return Ok(false);
    }
    let loaded = ctx
        .driver
        .wait_for_load(Duration::from_millis(timeout_ms))
        .await
        .map_err(nav_error)?;
    if !loaded {
        tokio::time::sleep(settle).await;
        let info = ctx.driver.page_info().await.map_err(nav_error)?;
        if info.ready_state == "loading" {
            return Err(ToolError::new(
                ToolErrorCode::NavigationTimeout,
                format!("page still loading after {timeout_ms}ms"),
            )
            .with_suggestion("retry, or raise timeout_ms for slow pages"));
        }
    }
    Ok(loaded)
}

pub async fn navigate_to_url(ctx: &ToolContext, p: &NavigateParams) -> Result<ToolOutput, ToolError> {
    let url = normalize_url(&p.url, &ctx.settings.search_url_template)?;
    tracing::info!(requested = %p.url, url = %url, "navigating");

    ctx.driver.navigate(&url).await.map_err(nav_error)?;
    let timeout_ms = p.timeout_ms.unwrap_or(ctx.settings.navigation_timeout_ms);
    let loaded = settle_after_navigation(ctx, p.wait_for_load, timeout_ms).await?;

    let info = ctx.driver.page_info().await?;
    let mut output = ToolOutput::message(format!("Navigated to {}", info.url)).with_data(json!({
        "requested": url,
        "url": info.url,
        "title": info.title,
        "loaded": loaded,
    }));

    if let Some(expected) = p.expected_url_contains.as_deref().filter(|s| !s.is_empty()) {
        if !info.url.contains(expected) {
            return Err(ToolError::new(
                ToolErrorCode::VerificationFailed,
                format!("landed on {} which does not contain '{expected}'", info.url),
            )
            .with_suggestion("the site may have redirected; inspect the page with get_page_info"));
        }
        output = output.verified(true);
    }
    Ok(output)
}

pub async fn history_step(ctx: &ToolContext, delta: i32) -> Result<ToolOutput, ToolError> {
    let before = ctx.driver.page_info().await?;
    ctx.driver.history_go(delta).await.map_err(nav_error)?;
    settle_after_navigation(ctx, true, ctx.settings.navigation_timeout_ms).await?;
    let info = ctx.driver.page_info().await?;
    let direction = if delta < 0 { "back" } else { "forward" };
    Ok(ToolOutput::message(format!("Went {direction} to {}", info.url)).with_data(json!({
        "from": before.url,
        "url": info.url,
        "title": info.title,
    })))
}

pub async fn reload_page(ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
    ctx.driver.reload().await.map_err(nav_error)?;
    settle_after_navigation(ctx, true, ctx.settings.navigation_timeout_ms).await?;
    let info = ctx.driver.page_info().await?;
    Ok(ToolOutput::message(format!("Reloaded {}", info.url)).with_data(json!({
        "url": info.url,
        "title": info.title,
    })))
}
