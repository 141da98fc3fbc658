use crate::heuristics::AVERAGE_RATE_PER_KWH;
use serde::Deserialize;
use std::{fs, path::Path};
use tracing::warn;

/// Runtime configuration. Every section has serde defaults, so a missing or
/// partial file degrades to pattern-only parsing at the stock rate.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub rates: RateSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    /// Deterministic pattern extraction only — no tier-1 call.
    #[default]
    Patterns,
    /// Local Ollama server, OpenAI-compatible API.
    Ollama,
    /// Remote OpenAI-compatible API; key comes from `LLM_API_KEY`.
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSection {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default)]
    pub backend: LlmBackend,
    #[serde(default = "default_ollama")]
    pub ollama: EndpointSection,
    #[serde(default = "default_remote")]
    pub remote: EndpointSection,
    /// Per-request timeout for the tier-1 call. On expiry the parser falls
    /// back to pattern extraction like any other tier-1 failure.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        LlmSection {
            backend: LlmBackend::default(),
            ollama: default_ollama(),
            remote: default_remote(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_ollama() -> EndpointSection {
    EndpointSection {
        base_url: "http://localhost:11434/v1".to_string(),
        model: "qwen3:8b".to_string(),
    }
}

fn default_remote() -> EndpointSection {
    EndpointSection {
        base_url: "https://api.openai.com/v1".to_string(),
        model: "gpt-4o-mini".to_string(),
    }
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateSection {
    /// Pesos per kWh used for the amount-based consumption estimate.
    #[serde(default = "default_rate_per_kwh")]
    pub average_rate_per_kwh: f64,
}

impl Default for RateSection {
    fn default() -> Self {
        RateSection {
            average_rate_per_kwh: default_rate_per_kwh(),
        }
    }
}

fn default_rate_per_kwh() -> f64 {
    AVERAGE_RATE_PER_KWH
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load a config file if it exists; fall back to defaults otherwise.
    /// A file that exists but fails to parse is logged and ignored rather
    /// than aborting — the pattern tier needs no configuration at all.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Config::default();
        }
        match Config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Bad config file — using defaults");
                Config::default()
            }
        }
    }
}
