use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{WebClawError, WebClawResult};
use crate::tools::retry::RetryPolicy;
use crate::tools::url::DEFAULT_SEARCH_TEMPLATE;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub journal: JournalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub active_provider: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to env var WEBCLAW_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Produces the initial plan and replacement tails.
    pub planning: Option<RoleEntry>,
    /// Judges whether the expected outcome was reached when the heuristic
    /// verifier is swapped for an LLM-backed one.
    pub reflection: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f64 {
    0.1
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// `ws://` debugger URL of a page, or the browser's `http://host:port`.
    #[serde(default = "default_cdp_endpoint")]
    pub cdp_endpoint: String,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default)]
    pub capture_screenshots: bool,
    #[serde(default = "default_true")]
    pub capture_accessibility: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            cdp_endpoint: default_cdp_endpoint(),
            command_timeout_ms: default_command_timeout_ms(),
            capture_screenshots: false,
            capture_accessibility: true,
        }
    }
}

fn default_cdp_endpoint() -> String {
    "http://127.0.0.1:9222".to_string()
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Full plan executions allowed before the run fails.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Step-level retries in the Recovering state.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Pause after every step before the page is re-observed.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_stability_max_wait_ms")]
    pub stability_max_wait_ms: u64,
    #[serde(default = "default_max_reflection_retries")]
    pub max_reflection_retries: u32,
    /// Extended reasoning budget for planning calls; 0 disables it.
    #[serde(default)]
    pub thinking_budget_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            settle_ms: default_settle_ms(),
            stability_max_wait_ms: default_stability_max_wait_ms(),
            max_reflection_retries: default_max_reflection_retries(),
            thinking_budget_tokens: 0,
        }
    }
}

impl AgentConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            factor: 2.0,
        }
    }
}

fn default_max_iterations() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    8_000
}

fn default_settle_ms() -> u64 {
    300
}

fn default_stability_max_wait_ms() -> u64 {
    2_000
}

fn default_max_reflection_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_element_timeout_ms")]
    pub element_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_key_delay_ms")]
    pub key_delay_ms: u64,
    #[serde(default = "default_click_settle_ms")]
    pub click_settle_ms: u64,
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    /// Fallback wait when no load event arrives.
    #[serde(default = "default_navigation_settle_ms")]
    pub navigation_settle_ms: u64,
    /// Retries beyond the first attempt for interaction and navigation tools.
    #[serde(default = "default_interaction_retries")]
    pub interaction_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Upper bound for the `wait` tool.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// `{query}` is replaced by the URL-encoded free text.
    #[serde(default = "default_search_url_template")]
    pub search_url_template: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            element_timeout_ms: default_element_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            key_delay_ms: default_key_delay_ms(),
            click_settle_ms: default_click_settle_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            navigation_settle_ms: default_navigation_settle_ms(),
            interaction_retries: default_interaction_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_wait_ms: default_max_wait_ms(),
            search_url_template: default_search_url_template(),
        }
    }
}

impl ToolsConfig {
    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn interaction_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.interaction_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            ..RetryPolicy::default()
        }
    }
}

fn default_element_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_key_delay_ms() -> u64 {
    30
}

fn default_click_settle_ms() -> u64 {
    150
}

fn default_navigation_timeout_ms() -> u64 {
    15_000
}

fn default_navigation_settle_ms() -> u64 {
    1_000
}

fn default_interaction_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_max_wait_ms() -> u64 {
    30_000
}

fn default_search_url_template() -> String {
    DEFAULT_SEARCH_TEMPLATE.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Characters of visible page text included in prompts.
    #[serde(default = "default_visible_text_chars")]
    pub visible_text_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            visible_text_chars: default_visible_text_chars(),
        }
    }
}

fn default_max_entries() -> usize {
    40
}

fn default_visible_text_chars() -> usize {
    4_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Defaults to `<data dir>/webclaw`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn resolve_config_path() -> WebClawResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(WebClawError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> WebClawResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> WebClawResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

/// Loads `config.toml` if one can be found; otherwise every section falls
/// back to its defaults.
pub fn load_config_or_default() -> AppConfig {
    match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "using default configuration");
            AppConfig::default()
        }
    }
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> WebClawResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.agent.max_iterations, 5);
        assert_eq!(cfg.tools.interaction_retries, 2);
        assert_eq!(cfg.memory.max_entries, 40);
        assert!(cfg.journal.enabled);
        assert!(cfg.tools.search_url_template.contains("{query}"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [agent]
            max_iterations = 3

            [llm]
            active_provider = "local"

            [llm.providers.local]
            display_name = "Local"
            api_base = "http://localhost:8000/v1"
            model = "qwen"

            [llm.roles.planning]
            provider = "local"
            model = "qwen-planner"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.agent.max_iterations, 3);
        assert_eq!(cfg.agent.max_retries, 2);
        assert_eq!(cfg.llm.providers["local"].temperature, 0.1);
        assert_eq!(cfg.llm.roles.planning.as_ref().unwrap().max_tokens, 4096);
    }

    #[test]
    fn save_then_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.browser.cdp_endpoint = "ws://127.0.0.1:9222/devtools/page/ABC".into();
        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.browser.cdp_endpoint, cfg.browser.cdp_endpoint);
    }
}
