use std::time::Duration;

use crate::browser::driver::{ElementSnapshot, PageDriver};
use crate::browser::selector::Selector;
use crate::tools::types::ToolError;

#[derive(Debug, Clone, Copy)]
pub struct LocateOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub require_visible: bool,
}

#[derive(Debug, Clone)]
pub struct Located {
    pub selector: Selector,
    pub element: ElementSnapshot,
}

/// Polls one selector until it matches or `budget` elapses. A zero budget
/// still performs exactly one query.
pub async fn poll_selector(
    driver: &dyn PageDriver,
    selector: &Selector,
    budget: Duration,
    poll_interval: Duration,
    require_visible: bool,
) -> Result<Option<ElementSnapshot>, ToolError> {
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        if let Some(el) = driver.query(selector).await? {
            if !require_visible || el.visible {
                return Ok(Some(el));
            }
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}

/// Finds an element by its primary selector, then by each alternate.
///
/// With alternates present the primary gets half the timeout and the
/// alternates split the rest evenly.
pub async fn locate(
    driver: &dyn PageDriver,
    primary: &str,
    alternates: &[String],
    opts: LocateOptions,
) -> Result<Located, ToolError> {
    let primary_sel = Selector::parse(primary);
    if primary_sel.is_empty() {
        return Err(ToolError::invalid_params("selector must not be empty"));
    }
    let alternates: Vec<Selector> = alternates
        .iter()
        .map(|s| Selector::parse(s))
        .filter(|s| !s.is_empty() && *s != primary_sel)
        .collect();

    let (primary_budget, alt_budget) = if alternates.is_empty() {
        (opts.timeout, Duration::ZERO)
    } else {
        let half = opts.timeout / 2;
        (half, (opts.timeout - half) / alternates.len() as u32)
    };

    if let Some(element) =
        poll_selector(driver, &primary_sel, primary_budget, opts.poll_interval, opts.require_visible).await?
    {
        return Ok(Located {
            selector: primary_sel,
            element,
        });
    }

    for alt in alternates {
        if let Some(element) =
            poll_selector(driver, &alt, alt_budget, opts.poll_interval, opts.require_visible).await?
        {
            tracing::debug!(primary = %primary_sel, alternate = %alt, "located element via alternate selector");
            return Ok(Located { selector: alt, element });
        }
    }

    Err(ToolError::element_not_found(primary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::driver::BoundingBox;
    use crate::testing::{FakeElement, FakePage};
    use crate::tools::types::ToolErrorCode;

    fn opts(timeout_ms: u64) -> LocateOptions {
        LocateOptions {
            timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(5),
            require_visible: true,
        }
    }

    #[tokio::test]
    async fn zero_timeout_queries_once() {
        let page = FakePage::new("https://a.test/", "A");
        let err = locate(&page, "#missing", &[], opts(0)).await.unwrap_err();
        assert_eq!(err.code, ToolErrorCode::ElementNotFound);
        assert_eq!(page.query_count("#missing"), 1);
    }

    #[tokio::test]
    async fn falls_back_to_alternate() {
        let page = FakePage::new("https://a.test/", "A");
        page.add_element(FakeElement::button("[data-testid=go]", BoundingBox::new(0.0, 0.0, 10.0, 10.0)));
        let found = locate(&page, "#go", &["[data-testid=go]".to_string()], opts(20))
            .await
            .unwrap();
        assert_eq!(found.selector.raw(), "[data-testid=go]");
    }

    #[tokio::test]
    async fn waits_for_late_element() {
        let page = FakePage::new("https://a.test/", "A");
        page.add_element(FakeElement::button("#late", BoundingBox::new(0.0, 0.0, 10.0, 10.0)));
        page.reveal_after_queries("#late", 3);
        let found = locate(&page, "#late", &[], opts(1000)).await.unwrap();
        assert_eq!(found.element.tag, "button");
        assert_eq!(page.query_count("#late"), 3);
    }
}
