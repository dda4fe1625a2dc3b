//! Test doubles for the backend boundary.
//!
//! [`MockBackend`] stands in for a whole [`ExtractionBackend`]; [`ScriptedModel`]
//! stands in for a [`LanguageModel`] so the prompting and parsing in
//! [`crate::llm::LlmBackend`] can run without a server.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::BackendError;
use crate::llm::{ExtractionBackend, LanguageModel};
use crate::prompt::PromptSpec;
use crate::schema::ExtractionSpan;

/// Returns canned spans and records every prompt it receives.
#[derive(Default)]
pub struct MockBackend {
    spans: Vec<ExtractionSpan>,
    by_text: HashMap<String, Vec<ExtractionSpan>>,
    failure: Option<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<PromptSpec>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spans returned for any text without a specific response.
    pub fn with_spans(mut self, spans: Vec<ExtractionSpan>) -> Self {
        self.spans = spans;
        self
    }

    pub fn with_response(mut self, text: impl Into<String>, spans: Vec<ExtractionSpan>) -> Self {
        self.by_text.insert(text.into(), spans);
        self
    }

    /// Every call fails with [`BackendError::Request`].
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<PromptSpec> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl ExtractionBackend for MockBackend {
    async fn extract(&self, prompt: &PromptSpec) -> Result<Vec<ExtractionSpan>, BackendError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(BackendError::Request(message.clone()));
        }

        Ok(self
            .by_text
            .get(&prompt.text)
            .cloned()
            .unwrap_or_else(|| self.spans.clone()))
    }
}

/// Language model that replays fixed responses in order.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str, _temperature: f32) -> Result<String, BackendError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| BackendError::Request("script exhausted".to_string()))
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}
