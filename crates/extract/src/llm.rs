use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::align::Aligner;
use crate::chunk::chunk_text;
use crate::error::BackendError;
use crate::examples::example_output;
use crate::normalizer::normalize_label;
use crate::prompt::PromptSpec;
use crate::schema::{Endpoint, ExtractionSpan, SpanKind};

/// The external extraction boundary: prompt in, ordered spans out.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn extract(&self, prompt: &PromptSpec) -> Result<Vec<ExtractionSpan>, BackendError>;
}

#[async_trait]
impl<T: ExtractionBackend + ?Sized> ExtractionBackend for Arc<T> {
    async fn extract(&self, prompt: &PromptSpec) -> Result<Vec<ExtractionSpan>, BackendError> {
        (**self).extract(prompt).await
    }
}

/// A text-completion endpoint that can be asked for JSON.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, BackendError>;

    fn model_id(&self) -> &str;
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str, // "json" for structured output
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, BackendError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json", // Force JSON output
            options: OllamaOptions { temperature },
        };

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("failed to parse Ollama response: {e}")))?;

        Ok(ollama_response.response)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(
        base_url: String,
        model: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("failed to parse chat response: {e}")))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::InvalidResponse("chat response had no content".to_string()))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Extraction backend that prompts a [`LanguageModel`] chunk by chunk and
/// aligns the returned extractions to character offsets in the source.
pub struct LlmBackend<M> {
    model: M,
    repair_attempts: usize,
}

impl<M: LanguageModel> LlmBackend<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            repair_attempts: 1,
        }
    }

    /// How many corrective prompts to send when the model returns invalid JSON.
    pub fn with_repair_attempts(mut self, attempts: usize) -> Self {
        self.repair_attempts = attempts;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Get a JSON document from the model, asking it to fix invalid output.
    async fn complete_json(&self, prompt: &str, temperature: f32) -> Result<Value, BackendError> {
        let mut response = self.model.complete(prompt, temperature).await?;

        for attempt in 0..=self.repair_attempts {
            match serde_json::from_str::<Value>(strip_fences(&response)) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.repair_attempts => {
                    warn!(
                        model = self.model.model_id(),
                        attempt = attempt + 1,
                        error = %e,
                        "Model returned invalid JSON, asking for a correction"
                    );
                    response = self.model.complete(&build_retry_prompt(&response), temperature).await?;
                }
                Err(e) => {
                    return Err(BackendError::InvalidResponse(format!(
                        "invalid JSON after {} correction attempts: {e}",
                        self.repair_attempts
                    )));
                }
            }
        }

        Err(BackendError::InvalidResponse("no JSON returned".to_string()))
    }
}

#[async_trait]
impl<M: LanguageModel> ExtractionBackend for LlmBackend<M> {
    async fn extract(&self, prompt: &PromptSpec) -> Result<Vec<ExtractionSpan>, BackendError> {
        let params = prompt.params;
        let chunks = chunk_text(&prompt.text, params.max_char_buffer);
        let mut spans = Vec::new();

        for pass in 0..params.passes.max(1) {
            for chunk in &chunks {
                let request = render_request(prompt, chunk.text);
                let value = self.complete_json(&request, params.temperature).await?;
                let raw = parse_extractions(value)?;

                let mut aligner = Aligner::new(chunk.text);
                for item in raw {
                    let mut span = item.into_span();
                    span.interval = aligner.align(&span.text).map(|mut iv| {
                        iv.start += chunk.char_offset;
                        iv.end += chunk.char_offset;
                        iv
                    });
                    spans.push(span);
                }
                debug!(pass, offset = chunk.char_offset, total = spans.len(), "Extracted chunk");
            }
        }

        info!(
            model = self.model.model_id(),
            chunks = chunks.len(),
            passes = params.passes,
            spans = spans.len(),
            "Backend extraction finished"
        );
        Ok(spans)
    }
}

/// Full prompt for one chunk: instruction, worked examples, then the target text.
pub fn render_request(prompt: &PromptSpec, chunk_text: &str) -> String {
    let mut out = String::with_capacity(prompt.instruction.len() + chunk_text.len() + 512);
    out.push_str(&prompt.instruction);
    out.push_str("\n\nEXAMPLES:\n");
    for example in &prompt.examples {
        out.push_str("\nTEXT:\n");
        out.push_str(&example.text);
        out.push_str("\nJSON OUTPUT:\n");
        out.push_str(&example_output(example).to_string());
        out.push('\n');
    }
    out.push_str("\nTEXT:\n");
    out.push_str(chunk_text);
    out.push_str("\n\nJSON OUTPUT:");
    out
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        invalid_json
    )
}

fn strip_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// One extraction as backends emit it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawExtraction {
    #[serde(alias = "class")]
    pub extraction_class: String,
    #[serde(alias = "text", default)]
    pub extraction_text: String,
    #[serde(default)]
    pub attributes: Option<Map<String, Value>>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Deserialize)]
struct RawEnvelope {
    extractions: Vec<RawExtraction>,
}

pub fn parse_extractions(value: Value) -> Result<Vec<RawExtraction>, BackendError> {
    let parsed = if value.is_array() {
        serde_json::from_value::<Vec<RawExtraction>>(value)
    } else {
        serde_json::from_value::<RawEnvelope>(value).map(|e| e.extractions)
    };
    parsed.map_err(|e| BackendError::InvalidResponse(format!("unexpected extraction payload: {e}")))
}

impl RawExtraction {
    pub fn into_span(self) -> ExtractionSpan {
        let attributes = self.attributes.unwrap_or_default();
        let text_attr = |key: &str| attributes.get(key).and_then(Value::as_str).map(str::to_string);

        let generic_class = matches!(
            normalize_label(&self.extraction_class).as_str(),
            "relationship" | "relation"
        );
        let head_text = text_attr("head_text");
        let tail_text = text_attr("tail_text");

        let kind = if head_text.is_some() || tail_text.is_some() || generic_class {
            SpanKind::Relation {
                head: Endpoint {
                    text: head_text.unwrap_or_default(),
                    class: text_attr("head_class"),
                },
                tail: Endpoint {
                    text: tail_text.unwrap_or_default(),
                    class: text_attr("tail_class"),
                },
            }
        } else {
            SpanKind::Entity
        };

        let class = if generic_class {
            text_attr("relation_type").unwrap_or_else(|| "related_to".to_string())
        } else {
            self.extraction_class
        };

        ExtractionSpan {
            class,
            text: self.extraction_text,
            interval: None,
            attributes: attributes.into_iter().collect(),
            confidence: self.confidence.unwrap_or(1.0),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptBuilder;
    use crate::schema::CharInterval;
    use crate::strategy::StrategyStore;
    use crate::testing::ScriptedModel;

    fn prompt(text: &str) -> PromptSpec {
        let store = StrategyStore::builtin().unwrap();
        let strategy = store.load("default").unwrap();
        PromptBuilder::new().build(&strategy, text).unwrap()
    }

    #[test]
    fn test_raw_entity_into_span() {
        let raw: RawExtraction = serde_json::from_value(serde_json::json!({
            "extraction_class": "person",
            "extraction_text": "Alice",
            "attributes": {"role": "data scientist"},
            "confidence": 0.8
        }))
        .unwrap();
        let span = raw.into_span();
        assert_eq!(span.kind, SpanKind::Entity);
        assert_eq!(span.confidence, 0.8);
        assert_eq!(span.attributes["role"], "data scientist");
    }

    #[test]
    fn test_generic_relationship_class_uses_relation_type() {
        let raw: RawExtraction = serde_json::from_value(serde_json::json!({
            "extraction_class": "relationship",
            "extraction_text": "is",
            "attributes": {
                "head_text": "Juliet", "head_class": "character",
                "relation_type": "metaphor",
                "tail_text": "the sun", "tail_class": "symbol"
            }
        }))
        .unwrap();
        let span = raw.into_span();
        assert_eq!(span.class, "metaphor");
        assert_eq!(span.confidence, 1.0);
        match span.kind {
            SpanKind::Relation { head, tail } => {
                assert_eq!(head, Endpoint::typed("Juliet", "character"));
                assert_eq!(tail, Endpoint::typed("the sun", "symbol"));
            }
            SpanKind::Entity => panic!("expected relation"),
        }
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_render_request_contains_examples_and_text() {
        let request = render_request(&prompt("Alice works here."), "Alice works here.");
        assert!(request.contains("Marie Curie"));
        assert!(request.ends_with("TEXT:\nAlice works here.\n\nJSON OUTPUT:"));
    }

    #[tokio::test]
    async fn test_backend_aligns_spans() {
        let model = ScriptedModel::new(vec![
            r#"{"extractions": [
                {"extraction_class": "person", "extraction_text": "Alice", "confidence": 0.9},
                {"extraction_class": "organization", "extraction_text": "TechCorp"}
            ]}"#,
        ]);
        let mut spec = prompt("Alice is a data scientist at TechCorp.");
        spec.params.passes = 1;

        let spans = LlmBackend::new(model).extract(&spec).await.unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].interval, Some(CharInterval { start: 0, end: 5 }));
        assert_eq!(spans[1].interval, Some(CharInterval { start: 29, end: 37 }));
    }

    #[tokio::test]
    async fn test_backend_repairs_invalid_json_once() {
        let model = ScriptedModel::new(vec!["not json", r#"{"extractions": []}"#]);
        let mut spec = prompt("Nothing here.");
        spec.params.passes = 1;

        let backend = LlmBackend::new(model);
        let spans = backend.extract(&spec).await.unwrap();
        assert!(spans.is_empty());

        let prompts = backend.model().prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].starts_with("The following JSON is invalid"));
    }

    #[tokio::test]
    async fn test_backend_gives_up_on_invalid_json() {
        let model = ScriptedModel::new(vec!["nope", "still nope"]);
        let mut spec = prompt("Nothing here.");
        spec.params.passes = 1;

        let err = LlmBackend::new(model).extract(&spec).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_backend_runs_every_pass() {
        let model = ScriptedModel::new(vec![r#"{"extractions": []}"#, r#"{"extractions": []}"#]);
        let spec = prompt("Short text.");
        assert_eq!(spec.params.passes, 2);

        let backend = LlmBackend::new(model);
        backend.extract(&spec).await.unwrap();
        assert_eq!(backend.model().prompts().len(), 2);
    }
}
