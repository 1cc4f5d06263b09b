use std::time::Duration;

use serde_json::json;

use crate::browser::driver::{
    ElementSnapshot, KeyEventKind, KeyInput, MouseEventKind, PageDriver, ProtocolError, MODIFIER_ALT,
    MODIFIER_CTRL, MODIFIER_META, MODIFIER_SHIFT,
};
use crate::browser::selector::Selector;
use crate::tools::call::{
    ClickParams, PressKeyParams, ScriptParams, ScrollDirection, ScrollParams, SelectParams, ToolName,
    TypeParams,
};
use crate::tools::locator::{locate, LocateOptions};
use crate::tools::registry::ToolContext;
use crate::tools::schema::{ParamSpec, ParamType, ToolCategory, ToolDefinition};
use crate::tools::types::{ToolError, ToolErrorCode, ToolOutput};

pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            ToolName::ClickElement,
            ToolCategory::Interaction,
            "Click an element. Selectors are CSS unless prefixed with id=, testid=, aria=, role= or text=.",
        )
        .param(ParamSpec::required("selector", ParamType::String, "Element selector"))
        .param(ParamSpec::optional(
            "alternate_selectors",
            ParamType::Array,
            "Fallback selectors tried after the primary one",
        ))
        .param(ParamSpec::optional("timeout_ms", ParamType::Integer, "How long to look for the element"))
        .param(
            ParamSpec::optional("verify", ParamType::Boolean, "Require the element to be visible and enabled")
                .with_default(json!(true)),
        )
        .param(ParamSpec::optional("offset_x", ParamType::Number, "Horizontal offset from the element center"))
        .param(ParamSpec::optional("offset_y", ParamType::Number, "Vertical offset from the element center"))
        .example(json!({"selector": "#submit"}))
        .example(json!({"selector": "text=Sign in", "alternate_selectors": ["button[type=submit]"]})),
        ToolDefinition::new(
            ToolName::TypeText,
            ToolCategory::Interaction,
            "Focus a field and type text key by key.",
        )
        .param(ParamSpec::required("selector", ParamType::String, "Input selector"))
        .param(ParamSpec::required("text", ParamType::String, "Text to type"))
        .param(ParamSpec::optional("alternate_selectors", ParamType::Array, "Fallback selectors"))
        .param(
            ParamSpec::optional("clear", ParamType::Boolean, "Clear the existing value first")
                .with_default(json!(false)),
        )
        .param(
            ParamSpec::optional("submit", ParamType::Boolean, "Press Enter after typing")
                .with_default(json!(false)),
        )
        .param(ParamSpec::optional("delay_ms", ParamType::Integer, "Delay between keystrokes"))
        .example(json!({"selector": "input[name=q]", "text": "rust async", "submit": true})),
        ToolDefinition::new(
            ToolName::SelectOption,
            ToolCategory::Interaction,
            "Choose an option of a <select> by value or visible label.",
        )
        .param(ParamSpec::required("selector", ParamType::String, "Select element selector"))
        .param(ParamSpec::required("option", ParamType::String, "Option value or label"))
        .example(json!({"selector": "#country", "option": "Canada"})),
        ToolDefinition::new(ToolName::PressKey, ToolCategory::Interaction, "Press a key, optionally with modifiers.")
            .param(ParamSpec::required("key", ParamType::String, "Key name such as Enter, Escape, Tab or a single character"))
            .param(ParamSpec::optional(
                "modifiers",
                ParamType::Array,
                "Any of ctrl, alt, shift, meta",
            ))
            .example(json!({"key": "Escape"})),
        ToolDefinition::new(ToolName::ScrollPage, ToolCategory::Interaction, "Scroll the page.")
            .param(
                ParamSpec::optional("direction", ParamType::String, "Scroll direction")
                    .one_of(&["up", "down", "left", "right", "top", "bottom"])
                    .with_default(json!("down")),
            )
            .param(
                ParamSpec::optional("amount", ParamType::Number, "Pixels to scroll")
                    .with_default(json!(600)),
            )
            .example(json!({"direction": "down", "amount": 800})),
        ToolDefinition::new(
            ToolName::ExecuteScript,
            ToolCategory::Advanced,
            "Evaluate a JavaScript expression in the page and return its JSON value.",
        )
        .param(ParamSpec::required("script", ParamType::String, "JavaScript expression"))
        .example(json!({"script": "document.querySelectorAll('tr').length"})),
    ]
}

async fn press_at(driver: &dyn PageDriver, x: f64, y: f64) -> Result<(), ToolError> {
    driver.dispatch_mouse(MouseEventKind::Moved, x, y).await?;
    driver.dispatch_mouse(MouseEventKind::Pressed, x, y).await?;
    driver.dispatch_mouse(MouseEventKind::Released, x, y).await?;
    Ok(())
}

fn check_clickable(selector: &str, el: &ElementSnapshot) -> Result<(), ToolError> {
    if !el.visible || el.bbox.is_empty() {
        return Err(ToolError::new(
            ToolErrorCode::ElementNotClickable,
            format!("'{selector}' is not visible"),
        )
        .with_suggestion("scroll the element into view or wait for it to appear"));
    }
    if !el.enabled {
        return Err(ToolError::new(
            ToolErrorCode::ElementNotClickable,
            format!("'{selector}' is disabled"),
        )
        .with_suggestion("complete the fields that enable it first"));
    }
    Ok(())
}

async fn key_press(driver: &dyn PageDriver, key: &KeyInput) -> Result<(), ProtocolError> {
    driver.dispatch_key(KeyEventKind::Down, key).await?;
    driver.dispatch_key(KeyEventKind::Up, key).await
}

pub async fn click_element(ctx: &ToolContext, p: &ClickParams) -> Result<ToolOutput, ToolError> {
    let timeout = p
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| ctx.settings.element_timeout());
    let located = locate(
        ctx.driver.as_ref(),
        &p.selector,
        &p.alternate_selectors,
        LocateOptions {
            timeout,
            poll_interval: ctx.settings.poll_interval(),
            require_visible: p.verify,
        },
    )
    .await?;

    let el = &located.element;
    if p.verify {
        check_clickable(located.selector.raw(), el)?;
    }

    let (cx, cy) = el.bbox.center();
    let (x, y) = (cx + p.offset_x, cy + p.offset_y);
    press_at(ctx.driver.as_ref(), x, y).await?;
    tokio::time::sleep(Duration::from_millis(ctx.settings.click_settle_ms)).await;

    tracing::debug!(selector = %located.selector, x, y, "clicked");
    Ok(ToolOutput::message(format!("Clicked {}", located.selector))
        .with_data(json!({
            "selector": located.selector.raw(),
            "bbox": el.bbox,
            "x": x,
            "y": y,
        }))
        .verified(p.verify))
}

fn key_for(c: char) -> Option<KeyInput> {
    match c {
        '\n' => KeyInput::named("Enter"),
        '\t' => KeyInput::named("Tab"),
        c => Some(KeyInput::char(c)),
    }
}

async fn select_all_and_delete(driver: &dyn PageDriver) -> Result<(), ProtocolError> {
    key_press(driver, &KeyInput::char('a').with_modifiers(MODIFIER_CTRL)).await?;
    if let Some(backspace) = KeyInput::named("Backspace") {
        key_press(driver, &backspace).await?;
    }
    Ok(())
}

/// Clears (optionally), types, verifies and submits. Returns the
/// verification verdict when one was taken.
async fn enter_text(ctx: &ToolContext, selector: &Selector, p: &TypeParams) -> Result<Option<bool>, ToolError> {
    let driver = ctx.driver.as_ref();
    let type_failed = |e: ProtocolError| ToolError::new(ToolErrorCode::TypeFailed, e.to_string());

    if p.clear {
        select_all_and_delete(driver).await.map_err(type_failed)?;
    }

    let delay = Duration::from_millis(p.delay_ms.unwrap_or(ctx.settings.key_delay_ms));
    for c in p.text.chars() {
        if let Some(key) = key_for(c) {
            key_press(driver, &key).await.map_err(type_failed)?;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    // Checked before submitting: Enter may navigate away from the field.
    let mut verified = None;
    if p.clear {
        let current = driver.query(selector).await?.and_then(|el| el.value);
        if let Some(value) = current {
            if value != p.text {
                return Err(ToolError::new(
                    ToolErrorCode::VerificationFailed,
                    format!("field holds '{value}' after typing, expected '{}'", p.text),
                )
                .with_suggestion("the field may reformat input; check it with get_element_attribute"));
            }
            verified = Some(true);
        }
    }

    if p.submit {
        if let Some(enter) = KeyInput::named("Enter") {
            key_press(driver, &enter)
                .await
                .map_err(|e| ToolError::new(ToolErrorCode::SubmitFailed, e.to_string()))?;
        }
    }
    Ok(verified)
}

/// Puts the pre-typing value back after a failed attempt. When that is not
/// possible the field may hold partial input and `err` stops being retryable.
async fn restore_field(driver: &dyn PageDriver, at: (f64, f64), baseline: Option<&str>, err: ToolError) -> ToolError {
    let Some(baseline) = baseline else {
        return keep_partial_input(err);
    };
    let restored = async {
        press_at(driver, at.0, at.1).await?;
        select_all_and_delete(driver).await?;
        for c in baseline.chars() {
            if let Some(key) = key_for(c) {
                key_press(driver, &key).await?;
            }
        }
        Ok::<(), ToolError>(())
    }
    .await;
    match restored {
        Ok(()) => {
            tracing::debug!(chars = baseline.chars().count(), "field restored after failed typing");
            err
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not restore field after failed typing");
            keep_partial_input(err)
        }
    }
}

fn keep_partial_input(mut err: ToolError) -> ToolError {
    err.recoverable = false;
    err.with_suggestion("the field may hold partial input; read it with get_element_attribute before typing again")
}

pub async fn type_text(ctx: &ToolContext, p: &TypeParams) -> Result<ToolOutput, ToolError> {
    let driver = ctx.driver.as_ref();
    let located = locate(
        driver,
        &p.selector,
        &p.alternate_selectors,
        LocateOptions {
            timeout: ctx.settings.element_timeout(),
            poll_interval: ctx.settings.poll_interval(),
            require_visible: true,
        },
    )
    .await?;
    check_clickable(located.selector.raw(), &located.element)?;

    let (x, y) = located.element.bbox.center();
    press_at(driver, x, y).await?;

    // A failed attempt puts this value back so a retry starts from the same field.
    let baseline = located.element.value.clone();
    let verified = match enter_text(ctx, &located.selector, p).await {
        Ok(verified) => verified,
        Err(e) => return Err(restore_field(driver, (x, y), baseline.as_deref(), e).await),
    };

    let mut output = ToolOutput::message(format!(
        "Typed {} characters into {}",
        p.text.chars().count(),
        located.selector
    ))
    .with_data(json!({
        "selector": located.selector.raw(),
        "cleared": p.clear,
        "submitted": p.submit,
    }));
    if let Some(v) = verified {
        output = output.verified(v);
    }
    Ok(output)
}

pub async fn select_option(ctx: &ToolContext, p: &SelectParams) -> Result<ToolOutput, ToolError> {
    let located = locate(
        ctx.driver.as_ref(),
        &p.selector,
        &[],
        LocateOptions {
            timeout: ctx.settings.element_timeout(),
            poll_interval: ctx.settings.poll_interval(),
            require_visible: false,
        },
    )
    .await?;

    match ctx.driver.select_option(&located.selector, &p.option).await? {
        Some(value) => Ok(ToolOutput::message(format!("Selected '{}' in {}", p.option, located.selector))
            .with_data(json!({ "selector": located.selector.raw(), "value": value }))
            .verified(true)),
        None => Err(ToolError::new(
            ToolErrorCode::OptionNotFound,
            format!("no option '{}' in {}", p.option, located.selector),
        )
        .with_suggestion("read the available options with get_element_text")),
    }
}

fn parse_modifiers(names: &[String]) -> Result<u32, ToolError> {
    names.iter().try_fold(0u32, |acc, name| {
        let bit = match name.to_ascii_lowercase().as_str() {
            "ctrl" | "control" => MODIFIER_CTRL,
            "alt" | "option" => MODIFIER_ALT,
            "shift" => MODIFIER_SHIFT,
            "meta" | "cmd" | "command" => MODIFIER_META,
            other => return Err(ToolError::invalid_params(format!("press_key: unknown modifier '{other}'"))),
        };
        Ok(acc | bit)
    })
}

pub async fn press_key(ctx: &ToolContext, p: &PressKeyParams) -> Result<ToolOutput, ToolError> {
    let modifiers = parse_modifiers(&p.modifiers)?;
    let mut chars = p.key.chars();
    let key = match (chars.next(), chars.next()) {
        (Some(c), None) => Some(KeyInput::char(c)),
        _ => KeyInput::named(&p.key),
    }
    .ok_or_else(|| ToolError::invalid_params(format!("press_key: unsupported key '{}'", p.key)))?
    .with_modifiers(modifiers);

    key_press(ctx.driver.as_ref(), &key).await?;
    Ok(ToolOutput::message(format!("Pressed {}", p.key)).with_data(json!({
        "key": key.key,
        "modifiers": modifiers,
    })))
}

pub async fn scroll_page(ctx: &ToolContext, p: &ScrollParams) -> Result<ToolOutput, ToolError> {
    let driver = ctx.driver.as_ref();
    let amount = p.amount.abs();
    match p.direction {
        ScrollDirection::Up => driver.scroll_by(0.0, -amount).await?,
        ScrollDirection::Down => driver.scroll_by(0.0, amount).await?,
        ScrollDirection::Left => driver.scroll_by(-amount, 0.0).await?,
        ScrollDirection::Right => driver.scroll_by(amount, 0.0).await?,
        ScrollDirection::Top => {
            driver.evaluate("window.scrollTo(0, 0); true").await?;
        }
        ScrollDirection::Bottom => {
            driver
                .evaluate("window.scrollTo(0, document.documentElement.scrollHeight); true")
                .await?;
        }
    }
    let position = driver
        .evaluate("({ x: window.scrollX, y: window.scrollY })")
        .await
        .unwrap_or_default();
    Ok(ToolOutput::message(format!("Scrolled {:?}", p.direction).to_lowercase())
        .with_data(json!({ "position": position })))
}

pub async fn execute_script(ctx: &ToolContext, p: &ScriptParams) -> Result<ToolOutput, ToolError> {
    if p.script.trim().is_empty() {
        return Err(ToolError::invalid_params("execute_script: script is empty"));
    }
    let value = ctx.driver.evaluate(&p.script).await?;
    Ok(ToolOutput::message("Script evaluated").with_data(json!({ "result": value })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::driver::BoundingBox;
    use crate::testing::{test_context, FakeElement, FakePage};
    use std::sync::Arc;

    fn page_with_input(value: &str) -> Arc<FakePage> {
        let page = Arc::new(FakePage::new("https://a.test/form", "Form"));
        page.add_element(FakeElement::input("#name", BoundingBox::new(10.0, 10.0, 200.0, 30.0), value));
        page
    }

    fn type_params(text: &str, clear: bool) -> TypeParams {
        TypeParams {
            selector: "#name".into(),
            text: text.into(),
            alternate_selectors: vec![],
            clear,
            submit: false,
            delay_ms: Some(0),
        }
    }

    #[tokio::test]
    async fn clear_then_type_replaces_value() {
        let page = page_with_input("old");
        let ctx = test_context(page.clone());
        let out = type_text(&ctx, &type_params("new", true)).await.unwrap();
        assert_eq!(page.value_of("#name").as_deref(), Some("new"));
        assert_eq!(out.verification_passed, Some(true));
    }

    #[tokio::test]
    async fn typing_without_clear_appends() {
        let page = page_with_input("old");
        let ctx = test_context(page.clone());
        type_text(&ctx, &type_params("new", false)).await.unwrap();
        assert_eq!(page.value_of("#name").as_deref(), Some("oldnew"));
    }

    #[tokio::test]
    async fn failed_submit_leaves_the_field_as_it_was() {
        let page = page_with_input("old");
        page.fail_key_once("Enter");
        let ctx = test_context(page.clone());
        let p = TypeParams {
            submit: true,
            ..type_params("new", false)
        };
        let err = type_text(&ctx, &p).await.unwrap_err();
        assert_eq!(err.code, ToolErrorCode::SubmitFailed);
        assert!(err.recoverable);
        assert_eq!(page.value_of("#name").as_deref(), Some("old"));

        type_text(&ctx, &p).await.unwrap();
        assert_eq!(page.value_of("#name").as_deref(), Some("oldnew"));
    }

    #[tokio::test]
    async fn unrestorable_field_is_not_retryable() {
        let page = page_with_input("old");
        page.fail_key_once("Enter");
        page.fail_key_once("a");
        let ctx = test_context(page.clone());
        let p = TypeParams {
            submit: true,
            ..type_params("new", false)
        };
        let err = type_text(&ctx, &p).await.unwrap_err();
        assert_eq!(err.code, ToolErrorCode::SubmitFailed);
        assert!(!err.recoverable);
        assert!(err.suggestions.iter().any(|s| s.contains("partial input")));
    }

    #[tokio::test]
    async fn click_reports_center_and_rejects_disabled() {
        let page = Arc::new(FakePage::new("https://a.test/", "A"));
        page.add_element(FakeElement::button("#ok", BoundingBox::new(0.0, 0.0, 100.0, 20.0)));
        page.add_element(FakeElement::button("#off", BoundingBox::new(0.0, 40.0, 100.0, 20.0)).disabled());
        let ctx = test_context(page.clone());

        let p = |s: &str| ClickParams {
            selector: s.into(),
            alternate_selectors: vec![],
            timeout_ms: Some(0),
            verify: true,
            offset_x: 0.0,
            offset_y: 0.0,
        };
        let out = click_element(&ctx, &p("#ok")).await.unwrap();
        assert_eq!(out.data.unwrap()["x"], 50.0);
        assert_eq!(page.clicks("#ok"), 1);

        let err = click_element(&ctx, &p("#off")).await.unwrap_err();
        assert_eq!(err.code, ToolErrorCode::ElementNotClickable);
        assert_eq!(page.clicks("#off"), 0);
    }

    #[tokio::test]
    async fn select_unknown_option_fails() {
        let page = Arc::new(FakePage::new("https://a.test/", "A"));
        page.add_element(
            FakeElement::select("#country", BoundingBox::new(0.0, 0.0, 100.0, 20.0), &["ca", "us"]),
        );
        let ctx = test_context(page.clone());
        let ok = select_option(&ctx, &SelectParams { selector: "#country".into(), option: "us".into() })
            .await
            .unwrap();
        assert_eq!(ok.data.unwrap()["value"], "us");
        let err = select_option(&ctx, &SelectParams { selector: "#country".into(), option: "fr".into() })
            .await
            .unwrap_err();
        assert_eq!(err.code, ToolErrorCode::OptionNotFound);
    }

    #[test]
    fn modifiers_parse() {
        assert_eq!(
            parse_modifiers(&["Ctrl".into(), "shift".into()]).unwrap(),
            MODIFIER_CTRL | MODIFIER_SHIFT
        );
        assert!(parse_modifiers(&["hyper".into()]).is_err());
    }

    #[tokio::test]
    async fn script_exception_is_script_error() {
        let page = Arc::new(FakePage::new("https://a.test/", "A"));
        page.fail_scripts_with("ReferenceError: foo is not defined");
        let ctx = test_context(page);
        let err = execute_script(&ctx, &ScriptParams { script: "foo()".into() }).await.unwrap_err();
        assert_eq!(err.code, ToolErrorCode::ScriptError);
        assert!(!err.recoverable);
    }
}
