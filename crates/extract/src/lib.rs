pub mod align;
pub mod chunk;
pub mod error;
pub mod examples;
pub mod llm;
pub mod normalizer;
pub mod prompt;
pub mod schema;
pub mod strategy;
pub mod testing;

#[cfg(test)]
mod tests;

pub use error::{BackendError, ExtractError, Result};
pub use llm::{ExtractionBackend, LanguageModel, LlmBackend, OllamaClient, OpenAiClient};
pub use normalizer::GraphNormalizer;
pub use prompt::{ExtractionParams, PromptBuilder, PromptSpec};
pub use schema::{
    CharInterval, Endpoint, ExtractionSpan, GraphResult, Node, NormalizationWarning, Relationship, SpanKind,
};
pub use strategy::{Strategy, StrategyDescription, StrategyOverrides, StrategyStore};

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// One unit of work: text, an optional strategy name and per-call overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionRequest {
    pub text: String,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub overrides: StrategyOverrides,
}

impl ExtractionRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, name: impl Into<String>) -> Self {
        self.strategy = Some(name.into());
        self
    }
}

/// Runs build → extract → normalize for a shared strategy store and backend.
pub struct Extractor<B> {
    store: Arc<StrategyStore>,
    backend: B,
    builder: PromptBuilder,
    timeout: Duration,
}

impl<B: ExtractionBackend> Extractor<B> {
    pub fn new(store: Arc<StrategyStore>, backend: B) -> Self {
        Self {
            store,
            backend,
            builder: PromptBuilder::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_prompt_builder(mut self, builder: PromptBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn store(&self) -> &StrategyStore {
        &self.store
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Resolve the strategy and build the prompt without calling the backend.
    pub fn prepare(&self, request: &ExtractionRequest) -> Result<(Arc<Strategy>, PromptSpec)> {
        let strategy = self.store.resolve(request.strategy.as_deref(), &request.overrides)?;
        let prompt = self.builder.build(&strategy, &request.text)?;
        Ok((strategy, prompt))
    }

    /// The single external call. Fails once on timeout or backend error; retrying is up to the caller.
    pub async fn extract_spans(&self, prompt: &PromptSpec) -> Result<Vec<ExtractionSpan>> {
        match tokio::time::timeout(self.timeout, self.backend.extract(prompt)).await {
            Ok(Ok(spans)) => Ok(spans),
            Ok(Err(e)) => {
                warn!(error = %e, "Extraction backend failed");
                Err(e.into())
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "Extraction backend timed out");
                Err(BackendError::Timeout(self.timeout).into())
            }
        }
    }

    /// Extract spans for a prepared prompt and normalize them under `strategy`.
    pub async fn run(&self, strategy: &Strategy, prompt: &PromptSpec) -> Result<GraphResult> {
        let spans = self.extract_spans(prompt).await?;
        let graph = GraphNormalizer::for_strategy(strategy).normalize(strategy.name(), &prompt.text, spans);

        info!(
            strategy = %strategy.name(),
            nodes = graph.nodes().len(),
            relationships = graph.relationships().len(),
            warnings = graph.warnings().len(),
            "Extraction complete"
        );
        Ok(graph)
    }

    pub async fn extract(&self, text: &str, strategy: &str) -> Result<GraphResult> {
        self.extract_request(&ExtractionRequest::new(text).with_strategy(strategy))
            .await
    }

    /// Extract with a strategy that is not necessarily registered.
    pub async fn extract_with(&self, text: &str, strategy: &Strategy) -> Result<GraphResult> {
        let prompt = self.builder.build(strategy, text)?;
        self.run(strategy, &prompt).await
    }

    pub async fn extract_request(&self, request: &ExtractionRequest) -> Result<GraphResult> {
        let (strategy, prompt) = self.prepare(request)?;
        self.run(&strategy, &prompt).await
    }

    /// Evaluate several strategies against the same text concurrently.
    /// Results come back in the order of `strategies`.
    pub async fn compare(&self, text: &str, strategies: &[&str]) -> Result<Vec<GraphResult>> {
        let runs = strategies.iter().map(|name| self.extract(text, name));
        futures::future::try_join_all(runs).await
    }
}
