use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub backend: BackendConfig,
    pub neo4j: Option<Neo4jConfig>,
    /// Extra strategy definitions loaded on top of the built-in ones.
    pub strategies_dir: Option<PathBuf>,
    pub bind_addr: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,      // Cache aggressively, short timeouts
    Accurate,  // Always fresh, long timeouts
    Balanced,  // Default: cache when available
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub max_concurrent_llm_calls: usize,
    pub max_concurrent_requests: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub provider: LlmProvider,
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Corrective prompts sent when the model returns invalid JSON.
    pub repair_attempts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl FromStr for OperationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(OperationMode::Fast),
            "accurate" => Ok(OperationMode::Accurate),
            "balanced" => Ok(OperationMode::Balanced),
            other => Err(format!("unknown mode '{other}' (expected fast, balanced or accurate)")),
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(LlmProvider::Ollama),
            "openai" => Ok(LlmProvider::OpenAi),
            other => Err(format!("unknown LLM provider '{other}' (expected ollama or openai)")),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            api_key: None,
            timeout_secs: 120,
            repair_attempts: 1,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::balanced_mode()
    }
}

impl AppConfig {
    pub fn balanced_mode() -> Self {
        Self {
            mode: OperationMode::Balanced,
            concurrency: ConcurrencyConfig {
                max_concurrent_llm_calls: 3,
                max_concurrent_requests: 16,
                request_timeout_secs: 60,
            },
            retry: RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 1000,
                max_backoff_ms: 10000,
            },
            cache: CacheConfig {
                enabled: true,
                max_entries: 10000,
            },
            backend: BackendConfig::default(),
            neo4j: None,
            strategies_dir: None,
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }

    pub fn fast_mode() -> Self {
        Self {
            mode: OperationMode::Fast,
            concurrency: ConcurrencyConfig {
                max_concurrent_llm_calls: 10,
                max_concurrent_requests: 64,
                request_timeout_secs: 30,
            },
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 500,
                max_backoff_ms: 5000,
            },
            cache: CacheConfig {
                enabled: true,
                max_entries: 50000,
            },
            ..Self::balanced_mode()
        }
    }

    pub fn accurate_mode() -> Self {
        Self {
            mode: OperationMode::Accurate,
            concurrency: ConcurrencyConfig {
                max_concurrent_llm_calls: 2,
                max_concurrent_requests: 8,
                request_timeout_secs: 120,
            },
            retry: RetryConfig {
                max_retries: 5,
                initial_backoff_ms: 2000,
                max_backoff_ms: 20000,
            },
            cache: CacheConfig {
                enabled: false,
                max_entries: 0,
            },
            ..Self::balanced_mode()
        }
    }

    pub fn for_mode(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Fast => Self::fast_mode(),
            OperationMode::Accurate => Self::accurate_mode(),
            OperationMode::Balanced => Self::balanced_mode(),
        }
    }

    /// Deadline for one whole extraction, across all chunks and passes.
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.concurrency.request_timeout_secs)
    }

    /// Preset chosen by `EXTRACT_MODE`, overlaid with the other variables.
    /// A `.env` file is read first when present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match get("EXTRACT_MODE") {
            Some(raw) => raw.parse::<OperationMode>().map_err(anyhow::Error::msg)?,
            None => OperationMode::Balanced,
        };
        let mut config = Self::for_mode(mode);

        if let Some(raw) = get("LLM_PROVIDER") {
            config.backend.provider = raw.parse::<LlmProvider>().map_err(anyhow::Error::msg)?;
            if config.backend.provider == LlmProvider::OpenAi {
                config.backend.base_url = "https://api.openai.com/v1".to_string();
                config.backend.model = "gpt-4o-mini".to_string();
            }
        }
        if let Some(url) = get("LLM_BASE_URL") {
            config.backend.base_url = url;
        }
        if let Some(model) = get("LLM_MODEL") {
            config.backend.model = model;
        }
        config.backend.api_key = get("LLM_API_KEY").filter(|k| !k.is_empty());
        if let Some(raw) = get("LLM_TIMEOUT_SECS") {
            config.backend.timeout_secs = raw.parse().context("LLM_TIMEOUT_SECS must be a number of seconds")?;
            // The extraction deadline wraps every backend call of a request.
            config.concurrency.request_timeout_secs =
                config.concurrency.request_timeout_secs.max(config.backend.timeout_secs);
        }
        if let Some(raw) = get("REQUEST_TIMEOUT_SECS") {
            config.concurrency.request_timeout_secs =
                raw.parse().context("REQUEST_TIMEOUT_SECS must be a number of seconds")?;
        }
        if config.backend.provider == LlmProvider::OpenAi && config.backend.api_key.is_none() {
            bail!("LLM_API_KEY must be set when LLM_PROVIDER=openai");
        }

        config.strategies_dir = get("STRATEGIES_DIR").map(PathBuf::from);
        if let Some(addr) = get("BIND_ADDR") {
            config.bind_addr = addr;
        }

        if let Some(uri) = get("NEO4J_URI") {
            config.neo4j = Some(Neo4jConfig {
                uri,
                user: get("NEO4J_USER").unwrap_or_else(|| "neo4j".to_string()),
                password: get("NEO4J_PASSWORD").context("NEO4J_PASSWORD must be set when NEO4J_URI is")?,
            });
        }

        Ok(config)
    }
}
