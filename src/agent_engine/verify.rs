use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::browser::context::BrowserContext;

const URL_PREFIX: &str = "url:";
const MIN_KEYWORD_CHARS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub detail: String,
}

impl Verdict {
    fn pass(detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Decides whether the page shows the expected outcome.
#[async_trait]
pub trait OutcomeVerifier: Send + Sync {
    async fn verify(&self, expected: &str, context: &BrowserContext) -> Verdict;
}

/// Deterministic text matching against URL, title and visible text.
///
/// `url:<pattern>` checks the URL only, as a substring and then as a regex.
/// Anything else passes when the whole phrase appears (case-insensitive) or,
/// failing that, when every word of four or more characters appears.
#[derive(Debug, Clone, Default)]
pub struct HeuristicVerifier;

impl HeuristicVerifier {
    pub fn check(&self, expected: &str, context: &BrowserContext) -> Verdict {
        let expected = expected.trim();
        if expected.is_empty() {
            return Verdict::pass("no expected outcome given");
        }

        if let Some(pattern) = expected.strip_prefix(URL_PREFIX) {
            let pattern = pattern.trim();
            if context.url.contains(pattern) {
                return Verdict::pass(format!("URL {} contains '{pattern}'", context.url));
            }
            return match Regex::new(pattern) {
                Ok(re) if re.is_match(&context.url) => {
                    Verdict::pass(format!("URL {} matches /{pattern}/", context.url))
                }
                _ => Verdict::fail(format!("URL {} does not match '{pattern}'", context.url)),
            };
        }

        let haystack = format!("{}\n{}\n{}", context.url, context.title, context.visible_text).to_lowercase();
        let needle = expected.to_lowercase();
        if haystack.contains(&needle) {
            return Verdict::pass(format!("page shows '{expected}'"));
        }

        let keywords: Vec<&str> = needle
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() >= MIN_KEYWORD_CHARS)
            .collect();
        let missing: Vec<&str> = keywords.iter().copied().filter(|k| !haystack.contains(k)).collect();
        if !keywords.is_empty() && missing.is_empty() {
            return Verdict::pass(format!("page mentions all of: {}", keywords.join(", ")));
        }

        if missing.is_empty() {
            Verdict::fail(format!("page does not show '{expected}'"))
        } else {
            Verdict::fail(format!("page does not show '{expected}' (missing: {})", missing.join(", ")))
        }
    }
}

#[async_trait]
impl OutcomeVerifier for HeuristicVerifier {
    async fn verify(&self, expected: &str, context: &BrowserContext) -> Verdict {
        self.check(expected, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str, title: &str, text: &str) -> BrowserContext {
        BrowserContext {
            url: url.into(),
            title: title.into(),
            visible_text: text.into(),
            ..BrowserContext::unavailable("")
        }
    }

    #[test]
    fn phrase_and_keywords() {
        let v = HeuristicVerifier;
        let ctx = page("https://shop.test/done", "Checkout", "Thank you! Your order is confirmed.");
        assert!(v.check("order is CONFIRMED", &ctx).passed);
        assert!(v.check("confirmed order", &ctx).passed);
        let miss = v.check("payment declined", &ctx);
        assert!(!miss.passed);
        assert!(miss.detail.contains("payment"));
    }

    #[test]
    fn url_prefix_checks_url_only() {
        let v = HeuristicVerifier;
        let ctx = page("https://shop.test/orders/42", "Order", "");
        assert!(v.check("url:/orders/", &ctx).passed);
        assert!(v.check(r"url:/orders/\d+$", &ctx).passed);
        assert!(!v.check("url:/cart", &ctx).passed);
    }

    #[test]
    fn short_words_alone_never_pass() {
        let v = HeuristicVerifier;
        let ctx = page("https://a.test/", "A", "nothing here");
        assert!(!v.check("ok", &ctx).passed);
        assert!(v.check("", &ctx).passed);
    }
}
