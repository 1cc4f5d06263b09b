//! Turns a recorded user session into planning input: a numbered narrative
//! of what the user did, plus the most reliable selectors seen for each
//! target.

use std::collections::HashSet;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::browser::context::truncate_chars;

const MASK: &str = "********";
const VALUE_PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordedActionType {
    Navigate,
    Click,
    Type,
    Select,
    Submit,
    KeyPress,
    Scroll,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorCandidate {
    pub selector: String,
    /// 0.0 (brittle) to 1.0 (stable).
    pub reliability: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TargetDescription {
    pub description: String,
    #[serde(default, alias = "selectors")]
    pub candidates: Vec<SelectorCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedAction {
    #[serde(rename = "type")]
    pub action_type: RecordedActionType,
    #[serde(default)]
    pub target: Option<TargetDescription>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Set by the recorder for password fields and the like.
    #[serde(default)]
    pub sensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordedSession {
    #[serde(default)]
    pub name: Option<String>,
    pub actions: Vec<RecordedAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorHint {
    pub target: String,
    /// Most reliable first.
    pub selectors: Vec<SelectorCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAnalysis {
    pub narrative: String,
    pub hints: Vec<SelectorHint>,
    pub action_count: usize,
}

impl SessionAnalysis {
    /// Narrative and hints in one prompt-ready block.
    pub fn to_prompt(&self) -> String {
        let mut out = String::from("The user previously performed these actions:\n");
        out.push_str(&self.narrative);
        if !self.hints.is_empty() {
            out.push_str("\nKnown selectors (most reliable first):\n");
            for hint in &self.hints {
                let list: Vec<String> = hint
                    .selectors
                    .iter()
                    .map(|c| format!("`{}` ({:.2})", c.selector, c.reliability))
                    .collect();
                let _ = writeln!(out, "- {}: {}", hint.target, list.join(", "));
            }
        }
        out
    }
}

pub struct SessionAnalyzer {
    min_reliability: f64,
    sensitive_target: Regex,
    card_number: Regex,
}

impl Default for SessionAnalyzer {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl SessionAnalyzer {
    pub fn new(min_reliability: f64) -> Self {
        Self {
            min_reliability,
            sensitive_target: Regex::new(r"(?i)pass(word|wd|code)?|secret|token|api[_-]?key|otp|pin\b|cvv|cvc|ssn|card")
                .expect("static regex"),
            card_number: Regex::new(r"^\d[\d -]{11,22}\d$").expect("static regex"),
        }
    }

    pub fn analyze(&self, session: &RecordedSession) -> SessionAnalysis {
        let mut narrative = String::new();
        let mut last_url: Option<&str> = None;

        for (i, action) in session.actions.iter().enumerate() {
            let mut line = self.describe(action);
            if action.action_type != RecordedActionType::Navigate {
                if let Some(url) = action.url.as_deref() {
                    if last_url != Some(url) {
                        let _ = write!(line, " (on {url})");
                    }
                }
            }
            if let Some(url) = action.url.as_deref() {
                last_url = Some(url);
            }
            let _ = writeln!(narrative, "{}. {}", i + 1, line);
        }

        let hints = self.hints(session);
        tracing::debug!(
            actions = session.actions.len(),
            hints = hints.len(),
            "recorded session analysed"
        );
        SessionAnalysis {
            narrative,
            hints,
            action_count: session.actions.len(),
        }
    }

    fn describe(&self, action: &RecordedAction) -> String {
        let target = action
            .target
            .as_ref()
            .map(|t| format!("\"{}\"", t.description))
            .unwrap_or_else(|| "the page".to_string());
        let value = action.value.as_deref().map(|v| self.display_value(action, v));

        match action.action_type {
            RecordedActionType::Navigate => {
                format!("Navigate to {}", action.url.as_deref().or(value.as_deref()).unwrap_or("a page"))
            }
            RecordedActionType::Click => format!("Click {target}"),
            RecordedActionType::Type => format!("Type \"{}\" into {target}", value.unwrap_or_default()),
            RecordedActionType::Select => format!("Select \"{}\" in {target}", value.unwrap_or_default()),
            RecordedActionType::Submit => format!("Submit {target}"),
            RecordedActionType::KeyPress => format!("Press {}", value.unwrap_or_else(|| "a key".into())),
            RecordedActionType::Scroll => match value {
                Some(v) => format!("Scroll {v}"),
                None => "Scroll the page".to_string(),
            },
            RecordedActionType::Other => format!("Interact with {target}"),
        }
    }

    fn is_sensitive(&self, action: &RecordedAction, value: &str) -> bool {
        if action.sensitive || self.card_number.is_match(value.trim()) {
            return true;
        }
        action.target.as_ref().is_some_and(|t| {
            self.sensitive_target.is_match(&t.description)
                || t.candidates.iter().any(|c| self.sensitive_target.is_match(&c.selector))
        })
    }

    fn display_value(&self, action: &RecordedAction, value: &str) -> String {
        if self.is_sensitive(action, value) {
            MASK.to_string()
        } else {
            truncate_chars(value, VALUE_PREVIEW_CHARS)
        }
    }

    fn hints(&self, session: &RecordedSession) -> Vec<SelectorHint> {
        let mut seen = HashSet::new();
        let mut hints = Vec::new();
        for target in session.actions.iter().filter_map(|a| a.target.as_ref()) {
            if !seen.insert(target.description.clone()) {
                continue;
            }
            let mut selectors: Vec<SelectorCandidate> = target
                .candidates
                .iter()
                .filter(|c| c.reliability >= self.min_reliability && !c.selector.trim().is_empty())
                .cloned()
                .collect();
            selectors.sort_by(|a, b| b.reliability.total_cmp(&a.reliability));
            let mut unique = HashSet::new();
            selectors.retain(|c| unique.insert(c.selector.clone()));
            if !selectors.is_empty() {
                hints.push(SelectorHint {
                    target: target.description.clone(),
                    selectors,
                });
            }
        }
        hints
    }
}
