use anyhow::{Context, Result};
use extract::{
    ExtractError, ExtractionBackend, ExtractionRequest, Extractor, GraphResult, LlmBackend, OllamaClient,
    OpenAiClient, StrategyStore,
};
use index::Neo4jLoader;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::cache::GraphCache;
use crate::config::{AppConfig, BackendConfig, LlmProvider};
use crate::error::ApiError;
use crate::metrics::{Metrics, TimedOperation};
use crate::retry::RetryPolicy;

pub type SharedBackend = Arc<dyn ExtractionBackend>;

pub struct AppState {
    pub extractor: Extractor<SharedBackend>,
    pub loader: Option<Neo4jLoader>,
    pub cache: GraphCache,
    pub cache_enabled: bool,
    pub metrics: Arc<Metrics>,
    pub retry: RetryPolicy,
    llm_permits: Semaphore,
}

/// Outcome of one extraction through the cache.
pub struct Extraction {
    pub graph: Arc<GraphResult>,
    pub cached: bool,
}

impl AppState {
    pub fn new(config: &AppConfig, store: Arc<StrategyStore>, backend: SharedBackend, loader: Option<Neo4jLoader>) -> Self {
        let extractor = Extractor::new(store, backend).with_timeout(config.extraction_timeout());

        Self {
            extractor,
            loader,
            cache: GraphCache::new(config.cache.max_entries),
            cache_enabled: config.cache.enabled,
            metrics: Metrics::new(),
            retry: RetryPolicy::from_config(&config.retry),
            llm_permits: Semaphore::new(config.concurrency.max_concurrent_llm_calls.max(1)),
        }
    }

    /// Build everything from configuration: strategies, LLM backend and the optional Neo4j loader.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let store = match &config.strategies_dir {
            Some(dir) => StrategyStore::from_dir(dir)
                .with_context(|| format!("Failed to load strategies from {}", dir.display()))?,
            None => StrategyStore::builtin().context("Failed to load built-in strategies")?,
        };
        info!(strategies = ?store.list(), "Strategy store ready");

        let backend = build_backend(&config.backend)?;

        let loader = match &config.neo4j {
            Some(neo4j) => Some(Neo4jLoader::connect(&neo4j.uri, &neo4j.user, &neo4j.password).await?),
            None => {
                info!("NEO4J_URI not set, graph loading disabled");
                None
            }
        };

        Ok(Self::new(config, Arc::new(store), backend, loader))
    }

    /// Resolve, extract and normalize, answering from the cache when possible.
    /// Backend calls are bounded by the LLM semaphore and retried when transient.
    pub async fn extract(&self, request: &ExtractionRequest) -> Result<Extraction, ApiError> {
        let (strategy, prompt) = self.extractor.prepare(request)?;
        let key = GraphCache::key(&strategy.fingerprint(), &prompt.instruction, &prompt.text);

        if self.cache_enabled {
            if let Some(graph) = self.cache.get(&key) {
                debug!(strategy = %strategy.name(), "Cache hit");
                self.metrics.record_cache_hit();
                return Ok(Extraction { graph, cached: true });
            }
        }

        let _permit = self
            .llm_permits
            .acquire()
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        let timer = TimedOperation::start();
        let graph = self
            .retry
            .retry_if(
                "extract",
                || self.extractor.run(&strategy, &prompt),
                ExtractError::is_retryable,
            )
            .await?;
        self.metrics.record_extract(timer.elapsed(), &graph);

        let graph = Arc::new(graph);
        if self.cache_enabled {
            self.cache.insert(key, Arc::clone(&graph));
        }
        Ok(Extraction { graph, cached: false })
    }
}

pub fn build_backend(config: &BackendConfig) -> Result<SharedBackend> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let backend: SharedBackend = match config.provider {
        LlmProvider::Ollama => {
            let client = OllamaClient::new(config.base_url.clone(), config.model.clone(), timeout)
                .context("Failed to build Ollama client")?;
            Arc::new(LlmBackend::new(client).with_repair_attempts(config.repair_attempts))
        }
        LlmProvider::OpenAi => {
            let client = OpenAiClient::new(
                config.base_url.clone(),
                config.model.clone(),
                config.api_key.clone(),
                timeout,
            )
            .context("Failed to build OpenAI client")?;
            Arc::new(LlmBackend::new(client).with_repair_attempts(config.repair_attempts))
        }
    };
    info!(provider = ?config.provider, model = %config.model, url = %config.base_url, "LLM backend ready");
    Ok(backend)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use extract::testing::MockBackend;
    use extract::strategy::StrategyDefinition;
    use extract::{Endpoint, ExtractionSpan};

    pub(crate) fn alice_spans() -> Vec<ExtractionSpan> {
        vec![
            ExtractionSpan::entity("person", "Alice"),
            ExtractionSpan::entity("company", "TechCorp"),
            ExtractionSpan::relation(
                "works_for",
                "works for",
                Endpoint::typed("Alice", "person"),
                Endpoint::typed("TechCorp", "company"),
            ),
        ]
    }

    pub(crate) fn test_state(backend: Arc<MockBackend>, config: AppConfig) -> AppState {
        let store = Arc::new(StrategyStore::builtin().unwrap());
        AppState::new(&config, store, backend, None)
    }

    fn fast_retry_config() -> AppConfig {
        let mut config = AppConfig::balanced_mode();
        config.retry.initial_backoff_ms = 1;
        config.retry.max_backoff_ms = 2;
        config
    }

    #[tokio::test]
    async fn test_second_request_served_from_cache() {
        let backend = Arc::new(MockBackend::new().with_spans(alice_spans()));
        let state = test_state(Arc::clone(&backend), fast_retry_config());
        let request = ExtractionRequest::new("Alice works for TechCorp.").with_strategy("business");

        let first = state.extract(&request).await.unwrap();
        let second = state.extract(&request).await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.graph, second.graph);
        assert_eq!(backend.call_count(), 1);
        assert_eq!(state.metrics.snapshot().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_cache_disabled_always_calls_backend() {
        let backend = Arc::new(MockBackend::new().with_spans(alice_spans()));
        let mut config = fast_retry_config();
        config.cache.enabled = false;
        let state = test_state(Arc::clone(&backend), config);
        let request = ExtractionRequest::new("Alice works for TechCorp.").with_strategy("business");

        state.extract(&request).await.unwrap();
        state.extract(&request).await.unwrap();
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_backend_failure_is_retried() {
        let backend = Arc::new(MockBackend::new().failing("connection refused"));
        let state = test_state(Arc::clone(&backend), fast_retry_config());

        let err = state
            .extract(&ExtractionRequest::new("Alice").with_strategy("default"))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ApiError::Extract(ExtractError::Backend(_))));
        // One attempt plus three retries.
        assert_eq!(backend.call_count(), 4);
    }

    #[tokio::test]
    async fn test_unknown_strategy_skips_backend() {
        let backend = Arc::new(MockBackend::new());
        let state = test_state(Arc::clone(&backend), fast_retry_config());

        let err = state
            .extract(&ExtractionRequest::new("Alice").with_strategy("astrology"))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ApiError::Extract(ExtractError::StrategyNotFound { .. })));
        assert_eq!(backend.call_count(), 0);
    }

    fn acme_strategy(example: &str) -> extract::Strategy {
        let source = format!(
            r#"
            name = "acme"
            entities = ["person", "company"]
            relations = ["works_for"]

            [[examples]]
            text = "{example}"
            "#
        );
        StrategyDefinition::from_toml(&source).unwrap().validate().unwrap()
    }

    #[tokio::test]
    async fn test_reregistered_strategy_misses_cache() {
        let backend = Arc::new(MockBackend::new().with_spans(alice_spans()));
        let state = test_state(Arc::clone(&backend), fast_retry_config());
        let request = ExtractionRequest::new("Alice works for TechCorp.").with_strategy("acme");

        state.extractor.store().register(acme_strategy("Bob works for Initech."));
        assert!(!state.extract(&request).await.unwrap().cached);
        assert!(state.extract(&request).await.unwrap().cached);

        // Same name and vocabulary, different few-shot example.
        state.extractor.store().register(acme_strategy("Carol works for Globex."));
        assert!(!state.extract(&request).await.unwrap().cached);
        assert_eq!(backend.call_count(), 2);
    }

    #[test]
    fn test_extractor_deadline_follows_llm_timeout() {
        let config = AppConfig::from_lookup(|key| (key == "LLM_TIMEOUT_SECS").then(|| "300".to_string())).unwrap();
        let state = test_state(Arc::new(MockBackend::new()), config);
        assert_eq!(state.extractor.timeout(), Duration::from_secs(300));
    }
}
