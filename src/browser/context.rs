use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::browser::driver::PageDriver;

/// What the agent knows about the page at one instant. Recomputed around
/// every step; never cached across steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserContext {
    pub url: String,
    pub title: String,
    pub visible_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessibility_tree: Option<Value>,
    /// Base64 PNG.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions {
    pub max_text_chars: usize,
    pub accessibility: bool,
    pub screenshot: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            max_text_chars: 4000,
            accessibility: false,
            screenshot: false,
        }
    }
}

impl BrowserContext {
    /// Captures the current page. Optional parts that fail are left out;
    /// only a failed page-info read is an error.
    pub async fn capture(
        driver: &dyn PageDriver,
        opts: CaptureOptions,
    ) -> Result<Self, crate::browser::driver::ProtocolError> {
        let info = driver.page_info().await?;
        let visible_text = driver
            .visible_text(opts.max_text_chars)
            .await
            .unwrap_or_else(|e| {
                tracing::debug!(error = %e, "visible text unavailable");
                String::new()
            });

        let accessibility_tree = if opts.accessibility {
            driver.accessibility_tree().await.ok().flatten()
        } else {
            None
        };
        let screenshot = if opts.screenshot {
            driver.screenshot(false).await.ok()
        } else {
            None
        };

        Ok(Self {
            url: info.url,
            title: info.title,
            visible_text: prune_text(&visible_text, opts.max_text_chars),
            accessibility_tree,
            screenshot,
            captured_at: Utc::now(),
        })
    }

    /// Like `capture`, but a failure yields a placeholder instead of an error.
    pub async fn capture_or_unavailable(driver: &dyn PageDriver, opts: CaptureOptions) -> Self {
        match Self::capture(driver, opts).await {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!(error = %e, "browser context capture failed");
                Self::unavailable(&e.to_string())
            }
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            url: String::new(),
            title: String::new(),
            visible_text: format!("[page state unavailable: {reason}]"),
            accessibility_tree: None,
            screenshot: None,
            captured_at: Utc::now(),
        }
    }

    /// Prompt-sized rendering; screenshots are never inlined.
    pub fn summary(&self) -> String {
        let mut out = format!("URL: {}\nTitle: {}\n", self.url, self.title);
        if let Some(tree) = &self.accessibility_tree {
            out.push_str("Accessibility tree:\n");
            out.push_str(&tree.to_string());
            out.push('\n');
        }
        out.push_str("Visible text:\n");
        out.push_str(&self.visible_text);
        out
    }
}

/// Collapses blank-line runs and trailing whitespace, then caps the length.
pub fn prune_text(text: &str, max_chars: usize) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() && lines.last().map_or(true, |l| l.trim().is_empty()) {
            continue;
        }
        lines.push(line);
    }
    truncate_chars(lines.join("\n").trim(), max_chars)
}

/// Truncates on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;

    #[test]
    fn prune_collapses_blank_runs() {
        let text = "Title\n\n\n\nBody line   \n\n";
        assert_eq!(prune_text(text, 100), "Title\n\nBody line");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[tokio::test]
    async fn capture_reads_page() {
        let page = FakePage::new("https://example.com/", "Example");
        page.set_text("Hello world");
        let ctx = BrowserContext::capture(&page, CaptureOptions::default()).await.unwrap();
        assert_eq!(ctx.url, "https://example.com/");
        assert_eq!(ctx.title, "Example");
        assert_eq!(ctx.visible_text, "Hello world");
        assert!(ctx.screenshot.is_none());
        assert!(ctx.summary().contains("Title: Example"));
    }
}
