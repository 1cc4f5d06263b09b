use std::fmt;

use serde::{Deserialize, Serialize};

/// How a selector string is resolved against the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorStrategy {
    Css,
    Id,
    TestId,
    AriaLabel,
    Role,
    Text,
}

impl SelectorStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Css => "css",
            Self::Id => "id",
            Self::TestId => "testid",
            Self::AriaLabel => "aria",
            Self::Role => "role",
            Self::Text => "text",
        }
    }
}

/// A parsed element selector.
///
/// Plain strings are CSS. A `strategy=` prefix picks another lookup:
/// `id=login`, `testid=submit-btn`, `aria=Search`, `role=button:Sign in`,
/// `text=Continue`. `data-testid=` is accepted as an alias for `testid=`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    raw: String,
    strategy: SelectorStrategy,
    value: String,
}

impl Selector {
    pub fn parse(input: &str) -> Self {
        let raw = input.trim().to_string();
        let prefixes: [(&str, SelectorStrategy); 7] = [
            ("css=", SelectorStrategy::Css),
            ("id=", SelectorStrategy::Id),
            ("testid=", SelectorStrategy::TestId),
            ("data-testid=", SelectorStrategy::TestId),
            ("aria=", SelectorStrategy::AriaLabel),
            ("role=", SelectorStrategy::Role),
            ("text=", SelectorStrategy::Text),
        ];
        for (prefix, strategy) in prefixes {
            if let Some(rest) = raw.strip_prefix(prefix) {
                let value = rest.trim().to_string();
                return Self { raw, strategy, value };
            }
        }
        Self {
            value: raw.clone(),
            raw,
            strategy: SelectorStrategy::Css,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn strategy(&self) -> SelectorStrategy {
        self.strategy
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for Selector {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}
