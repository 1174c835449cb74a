//! Configuration system for Sleuth.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/sleuth/config.toml` and/or `.sleuth/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for Sleuth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SleuthConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl SleuthConfig {
    /// Collect validation warnings from every section.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.llm.validate();
        warnings.extend(self.search.validate());
        warnings.extend(self.research.validate());
        warnings
    }
}

/// Language model configuration.
///
/// Two model variants are used: a reasoning model for planning, writing and
/// reviewing, and a fast model for bulk fact extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name. Only OpenAI-compatible endpoints are supported.
    pub provider: String,
    /// Model used by the planner, writer and reviewer.
    pub reasoning_model: String,
    /// Model used by the fact extractor.
    pub fast_model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate in a response.
    pub max_tokens: Option<usize>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries for transient failures (rate limits, timeouts, connection errors).
    pub max_retries: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            reasoning_model: "gpt-4o".to_string(),
            fast_model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            temperature: 0.0,
            max_tokens: None,
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "llm.temperature ({}) is outside the typical range 0.0–2.0",
                self.temperature
            ));
        }
        if self.timeout_secs == 0 {
            warnings.push("llm.timeout_secs is 0; every request will time out".to_string());
        }
        warnings
    }
}

/// Which search backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    /// Tavily search API; falls back to mock mode when no key is available.
    #[default]
    Tavily,
    /// DuckDuckGo instant answers (no key required).
    Duckduckgo,
    /// Deterministic offline results.
    Mock,
}

impl std::fmt::Display for SearchBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchBackend::Tavily => write!(f, "tavily"),
            SearchBackend::Duckduckgo => write!(f, "duckduckgo"),
            SearchBackend::Mock => write!(f, "mock"),
        }
    }
}

/// Search provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub backend: SearchBackend,
    /// Environment variable name containing the search API key.
    pub api_key_env: String,
    /// Maximum results requested per query.
    pub max_results: usize,
    /// Results scoring below this are discarded.
    pub min_relevance_score: f64,
    /// Per-query timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: SearchBackend::Tavily,
            api_key_env: "TAVILY_API_KEY".to_string(),
            max_results: 5,
            min_relevance_score: 0.6,
            timeout_secs: 30,
        }
    }
}

impl SearchConfig {
    /// Validate this search config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !(0.0..=1.0).contains(&self.min_relevance_score) {
            warnings.push(format!(
                "search.min_relevance_score ({}) is outside 0.0–1.0",
                self.min_relevance_score
            ));
        }
        if self.max_results == 0 {
            warnings.push("search.max_results is 0; searches will return nothing".to_string());
        }
        warnings
    }
}

/// Bounds for the research loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Upper bound on planning → search → extraction rounds.
    pub max_iterations: usize,
    /// Upper bound on reviewer rejections before forced approval.
    pub max_critique_loops: usize,
    /// Maximum queries the planner may propose per round.
    pub max_queries_per_round: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            max_critique_loops: 3,
            max_queries_per_round: 3,
        }
    }
}

impl ResearchConfig {
    /// Validate the research bounds and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.max_iterations == 0 {
            warnings.push(
                "research.max_iterations is 0; reports will be written without searching"
                    .to_string(),
            );
        }
        if self.max_critique_loops == 0 {
            warnings.push(
                "research.max_critique_loops is 0; every report is force-approved".to_string(),
            );
        }
        if self.max_queries_per_round == 0 {
            warnings.push("research.max_queries_per_round is 0; no searches will run".to_string());
        }
        warnings
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Comma-separated list of allowed CORS origins.
    pub cors_origins: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: "http://localhost:3000,http://localhost:5173".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Parse CORS origins into a list.
    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect()
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `SLEUTH_`)
/// 3. Workspace-local config (`.sleuth/config.toml`)
/// 4. User config (`~/.config/sleuth/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&SleuthConfig>,
) -> Result<SleuthConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(SleuthConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "sleuth", "sleuth") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".sleuth").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // SLEUTH_RESEARCH__MAX_ITERATIONS, SLEUTH_LLM__REASONING_MODEL, etc.
    figment = figment.merge(Env::prefixed("SLEUTH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}
