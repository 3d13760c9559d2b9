use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::pool;
use crate::resolver::github::DEFAULT_API_URL;

pub const CONFIG_FILE: &str = ".patch-probe.toml";
pub const DEFAULT_LLM_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration loaded from `.patch-probe.toml`.
///
/// Every field is optional; a missing file yields the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub github: GitHubConfig,
    pub execution: ExecutionConfig,
    pub budget: BudgetConfig,
    pub runtime: RuntimeConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// GitHub API token. If None, falls back to GITHUB_TOKEN env var.
    pub token: Option<String>,
    pub api_url: Option<String>,
}

impl GitHubConfig {
    pub fn api_url(&self) -> String {
        self.api_url.clone().unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }
}

/// Where and how generated requests are sent.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub base_url: Option<String>,
    /// Bearer token merged into every request. Falls back to PATCH_PROBE_TOKEN.
    pub token: Option<String>,
    pub default_headers: BTreeMap<String, String>,
    pub timeout_secs: u64,
    /// Send a request to removed endpoints and expect it to be gone.
    pub probe_removed: bool,
    pub body_snapshot_chars: usize,
    pub expect_json: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            default_headers: BTreeMap::new(),
            timeout_secs: 20,
            probe_removed: false,
            body_snapshot_chars: 2000,
            expect_json: false,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Size ceilings for everything that ends up in the prompt or report.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub context_chars: usize,
    pub prompt_chars: usize,
    pub excerpt_max_lines: usize,
    pub lines_before: usize,
    pub lines_after: usize,
    pub call_site_cap: usize,
    pub search_results_cap: usize,
    pub diff_excerpt_chars: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            context_chars: 10_000,
            prompt_chars: 15_000,
            excerpt_max_lines: 50,
            lines_before: 5,
            lines_after: 20,
            call_site_cap: 20,
            search_results_cap: 200,
            diff_excerpt_chars: 4_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub workers: Option<usize>,
    pub op_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: None,
            op_timeout_secs: 20,
        }
    }
}

impl RuntimeConfig {
    pub fn workers(&self) -> usize {
        self.workers.filter(|w| *w > 0).unwrap_or_else(pool::default_workers)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }
}

/// OpenAI-compatible chat-completions settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub url: Option<String>,
    pub key: Option<String>,
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: None,
            key: None,
            model: None,
            max_tokens: 4096,
            temperature: 0.3,
            attempts: 2,
        }
    }
}

impl LlmConfig {
    pub fn url(&self) -> String {
        self.url.clone().unwrap_or_else(|| DEFAULT_LLM_URL.to_string())
    }

    pub fn model(&self) -> String {
        self.model.clone().unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string())
    }
}

impl Config {
    /// Load `explicit` if given, otherwise `.patch-probe.toml` in the current
    /// directory when it exists. An explicit path that is missing is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => {
                let path = Path::new(CONFIG_FILE);
                if path.exists() {
                    Self::load_from(path)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Config file value first, then GITHUB_TOKEN.
    pub fn github_token(&self) -> Option<String> {
        self.github
            .token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .filter(|t| !t.is_empty())
    }

    pub fn execution_token(&self) -> Option<String> {
        self.execution
            .token
            .clone()
            .or_else(|| std::env::var("PATCH_PROBE_TOKEN").ok())
            .filter(|t| !t.is_empty())
    }

    pub fn llm_key(&self) -> Option<String> {
        self.llm
            .key
            .clone()
            .or_else(|| std::env::var("PATCH_PROBE_LLM_KEY").ok())
            .filter(|k| !k.is_empty())
    }
}
