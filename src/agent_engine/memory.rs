//! Bounded conversation log fed to the LLM.
//!
//! Entries strictly alternate user/assistant, starting with user. Tool
//! results travel in user entries that reference the tool-use ids of the
//! assistant entry right before them. When the log grows past its ceiling
//! the first entry and the most recent ones are kept; everything in between
//! is folded into the `pruned_digest` context value.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::browser::context::truncate_chars;
use crate::errors::{WebClawError, WebClawResult};

pub const PRUNED_DIGEST_KEY: &str = "pruned_digest";
const DIGEST_LINE_CHARS: usize = 160;
const DIGEST_MAX_CHARS: usize = 4_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub content: EntryContent,
    pub timestamp: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn new(role: Role, content: EntryContent) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, EntryContent::Text(text.into()))
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, EntryContent::Text(text.into()))
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.content {
            EntryContent::Blocks(b) => b,
            EntryContent::Text(_) => &[],
        }
    }

    pub fn tool_use_ids(&self) -> impl Iterator<Item = &str> {
        self.blocks().iter().filter_map(|b| match b {
            ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
            _ => None,
        })
    }

    /// One-line rendering for digests and logs.
    pub fn summary(&self) -> String {
        let body = match &self.content {
            EntryContent::Text(t) => t.clone(),
            EntryContent::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => text.clone(),
                    ContentBlock::ToolUse { name, input, .. } => format!("[tool {name} {input}]"),
                    ContentBlock::ToolResult { content, is_error, .. } => {
                        if *is_error {
                            format!("[error {content}]")
                        } else {
                            format!("[result {content}]")
                        }
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        };
        let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
        format!("{}: {}", self.role.as_str(), truncate_chars(&flat, DIGEST_LINE_CHARS))
    }
}

const MIN_ENTRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct ConversationMemory {
    entries: Vec<ConversationEntry>,
    max_entries: usize,
    context: HashMap<String, Value>,
    pruned_total: usize,
}

impl ConversationMemory {
    /// `max_entries` below 3 is raised to 3. A smaller log cannot keep the
    /// first entry and the newest one while still alternating.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries: max_entries.max(MIN_ENTRIES),
            context: HashMap::new(),
            pruned_total: 0,
        }
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn pruned_total(&self) -> usize {
        self.pruned_total
    }

    pub fn last(&self) -> Option<&ConversationEntry> {
        self.entries.last()
    }

    pub fn push(&mut self, entry: ConversationEntry) -> WebClawResult<()> {
        let expected = match self.entries.last() {
            None => Role::User,
            Some(last) if last.role == Role::User => Role::Assistant,
            Some(_) => Role::User,
        };
        if entry.role != expected {
            return Err(WebClawError::Memory(format!(
                "expected a {} entry, got {}",
                expected.as_str(),
                entry.role.as_str()
            )));
        }

        for block in entry.blocks() {
            if let ContentBlock::ToolResult { tool_use_id, .. } = block {
                let known = self
                    .entries
                    .last()
                    .is_some_and(|prev| prev.tool_use_ids().any(|id| id == tool_use_id));
                if !known {
                    return Err(WebClawError::Memory(format!(
                        "tool result references unknown tool use '{tool_use_id}'"
                    )));
                }
            }
        }

        self.entries.push(entry);
        self.prune();
        Ok(())
    }

    pub fn push_user_text(&mut self, text: impl Into<String>) -> WebClawResult<()> {
        self.push(ConversationEntry::user_text(text))
    }

    pub fn push_assistant_text(&mut self, text: impl Into<String>) -> WebClawResult<()> {
        self.push(ConversationEntry::assistant_text(text))
    }

    /// Assistant turn carrying optional text plus tool uses.
    pub fn push_tool_use(&mut self, text: &str, uses: Vec<(String, String, Value)>) -> WebClawResult<()> {
        let mut blocks = Vec::with_capacity(uses.len() + 1);
        if !text.is_empty() {
            blocks.push(ContentBlock::Text { text: text.to_string() });
        }
        blocks.extend(
            uses.into_iter()
                .map(|(id, name, input)| ContentBlock::ToolUse { id, name, input }),
        );
        self.push(ConversationEntry::new(Role::Assistant, EntryContent::Blocks(blocks)))
    }

    /// User turn carrying results for the preceding tool uses, optionally
    /// followed by text.
    pub fn push_tool_results(
        &mut self,
        results: Vec<(String, String, bool)>,
        trailing_text: Option<String>,
    ) -> WebClawResult<()> {
        let mut blocks: Vec<ContentBlock> = results
            .into_iter()
            .map(|(tool_use_id, content, is_error)| ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            })
            .collect();
        if let Some(text) = trailing_text {
            blocks.push(ContentBlock::Text { text });
        }
        self.push(ConversationEntry::new(Role::User, EntryContent::Blocks(blocks)))
    }

    fn prune(&mut self) {
        if self.entries.len() <= self.max_entries {
            return;
        }
        let keep_tail = self.max_entries - 1;
        let mut start = self.entries.len() - keep_tail;
        // The kept tail must open with an assistant entry to follow the
        // first (user) entry.
        if self.entries[start].role == self.entries[0].role {
            start += 1;
        }

        let dropped: Vec<ConversationEntry> = self.entries.drain(1..start).collect();
        self.pruned_total += dropped.len();
        self.fold_into_digest(&dropped);
        tracing::debug!(
            dropped = dropped.len(),
            remaining = self.entries.len(),
            "conversation memory pruned"
        );
    }

    fn fold_into_digest(&mut self, dropped: &[ConversationEntry]) {
        let mut digest = self
            .context
            .get(PRUNED_DIGEST_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        for entry in dropped {
            if !digest.is_empty() {
                digest.push('\n');
            }
            digest.push_str(&entry.summary());
        }
        let total = digest.chars().count();
        if total > DIGEST_MAX_CHARS {
            digest = digest.chars().skip(total - DIGEST_MAX_CHARS).collect();
        }
        self.context.insert(PRUNED_DIGEST_KEY.to_string(), Value::String(digest));
    }

    pub fn pruned_digest(&self) -> Option<&str> {
        self.context.get(PRUNED_DIGEST_KEY).and_then(Value::as_str)
    }

    pub fn context_get(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    pub fn context_set(&mut self, key: impl Into<String>, value: Value) {
        self.context.insert(key.into(), value);
    }

    pub fn context(&self) -> &HashMap<String, Value> {
        &self.context
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.context.clear();
        self.pruned_total = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alternating(mem: &mut ConversationMemory, n: usize) {
        for i in 0..n {
            let r = if mem.last().map_or(true, |e| e.role == Role::Assistant) {
                mem.push_user_text(format!("u{i}"))
            } else {
                mem.push_assistant_text(format!("a{i}"))
            };
            r.unwrap();
        }
    }

    fn assert_alternates(mem: &ConversationMemory) {
        assert_eq!(mem.entries()[0].role, Role::User);
        for pair in mem.entries().windows(2) {
            assert_ne!(pair[0].role, pair[1].role);
        }
    }

    #[test]
    fn rejects_consecutive_roles() {
        let mut mem = ConversationMemory::new(10);
        assert!(mem.push_assistant_text("hi").is_err());
        mem.push_user_text("task").unwrap();
        assert!(mem.push_user_text("again").is_err());
    }

    #[test]
    fn pruning_law_holds_for_many_sizes() {
        for cap in 2..9 {
            for n in 0..30 {
                let mut mem = ConversationMemory::new(cap);
                alternating(&mut mem, n);
                assert!(mem.len() <= cap, "cap={cap} n={n} len={}", mem.len());
                if n > 0 {
                    assert_eq!(mem.entries()[0].content, EntryContent::Text("u0".into()));
                    assert_alternates(&mem);
                }
            }
        }
    }

    #[test]
    fn newest_entry_survives_every_cap() {
        for cap in 0..9 {
            for n in 1..30 {
                let mut mem = ConversationMemory::new(cap);
                alternating(&mut mem, n);
                let newest = mem.last().unwrap();
                assert!(
                    matches!(&newest.content, EntryContent::Text(t) if t[1..] == (n - 1).to_string()),
                    "cap={cap} n={n} newest={:?}",
                    newest.content
                );
            }
        }

        let mut mem = ConversationMemory::new(2);
        mem.push_user_text("task").unwrap();
        mem.push_assistant_text("plan").unwrap();
        mem.push_user_text("replan: step 2 failed").unwrap();
        let texts: Vec<_> = mem
            .entries()
            .iter()
            .map(|e| match &e.content {
                EntryContent::Text(t) => t.as_str(),
                EntryContent::Blocks(_) => "",
            })
            .collect();
        assert_eq!(texts, vec!["task", "plan", "replan: step 2 failed"]);
    }

    #[test]
    fn pruned_entries_land_in_digest_not_context_loss() {
        let mut mem = ConversationMemory::new(4);
        mem.context_set("browser_state", json!({"url": "https://a.test"}));
        alternating(&mut mem, 10);
        let digest = mem.pruned_digest().unwrap();
        assert!(digest.contains("assistant: a1"));
        assert_eq!(mem.context_get("browser_state").unwrap()["url"], "https://a.test");
        assert!(mem.pruned_total() > 0);
    }

    #[test]
    fn tool_results_must_reference_previous_tool_use() {
        let mut mem = ConversationMemory::new(10);
        mem.push_user_text("task").unwrap();
        mem.push_tool_use("", vec![("call_1".into(), "submit_plan".into(), json!({}))])
            .unwrap();
        assert!(mem
            .push_tool_results(vec![("call_9".into(), "ok".into(), false)], None)
            .is_err());
        mem.push_tool_results(vec![("call_1".into(), "ok".into(), false)], Some("next".into()))
            .unwrap();
        assert_eq!(mem.len(), 3);
    }
}
