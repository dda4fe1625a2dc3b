use std::sync::Arc;
use std::time::Duration;

use crate::testing::{MockBackend, ScriptedModel};
use crate::*;

const ALICE: &str = "Alice is a data scientist at TechCorp.";

fn store() -> Arc<StrategyStore> {
    Arc::new(StrategyStore::builtin().unwrap())
}

fn alice_spans() -> Vec<ExtractionSpan> {
    vec![
        ExtractionSpan::entity("person", "Alice")
            .with_interval(0, 5)
            .with_attribute("role", "data scientist")
            .with_confidence(0.95),
        ExtractionSpan::entity("organization", "TechCorp")
            .with_interval(29, 37)
            .with_confidence(0.9),
        ExtractionSpan::relation(
            "works_at",
            "data scientist at",
            Endpoint::typed("Alice", "person"),
            Endpoint::typed("TechCorp", "organization"),
        )
        .with_confidence(0.85),
        // Below the default strategy's medium floor.
        ExtractionSpan::entity("concept", "data").with_confidence(0.2),
    ]
}

fn assert_alice_triple(graph: &GraphResult) {
    let alice = graph.find_node("alice", "person").expect("person node");
    let techcorp = graph.find_node("techcorp", "organization").expect("organization node");

    let works_at: Vec<_> = graph
        .relationships()
        .iter()
        .filter(|r| r.rel_type == "works_at")
        .collect();
    assert_eq!(works_at.len(), 1);
    assert_eq!(works_at[0].source_id, alice.id);
    assert_eq!(works_at[0].target_id, techcorp.id);
}

#[tokio::test]
async fn test_alice_works_at_techcorp() {
    let extractor = Extractor::new(store(), MockBackend::new().with_spans(alice_spans()));
    let graph = extractor.extract(ALICE, "default").await.unwrap();

    assert_alice_triple(&graph);
    assert_eq!(graph.nodes().len(), 2);
    assert_eq!(graph.warnings().len(), 1);
    assert_eq!(graph.provenance().strategy, "default");
    assert_eq!(graph.provenance().spans_received, 4);
}

#[tokio::test]
async fn test_alice_through_language_model() {
    let response = r#"{"extractions": [
        {"extraction_class": "person", "extraction_text": "Alice", "attributes": {"role": "data scientist"}, "confidence": 0.95},
        {"extraction_class": "organization", "extraction_text": "TechCorp", "confidence": 0.9},
        {"extraction_class": "works_at", "extraction_text": "data scientist at",
         "attributes": {"head_text": "Alice", "head_class": "person", "tail_text": "TechCorp", "tail_class": "organization"}}
    ]}"#;
    // Default breadth runs two passes over one chunk.
    let backend = LlmBackend::new(ScriptedModel::new([response, response]));
    let extractor = Extractor::new(store(), backend);

    let graph = extractor.extract(ALICE, "default").await.unwrap();
    assert_alice_triple(&graph);

    let alice = graph.find_node("alice", "person").unwrap();
    assert_eq!(alice.mentions, vec![CharInterval { start: 0, end: 5 }]);
    assert_eq!(graph.relationships()[0].confidence, 1.0);
}

#[tokio::test]
async fn test_prompt_reaches_backend() {
    let extractor = Extractor::new(store(), MockBackend::new());
    extractor.extract(ALICE, "business").await.unwrap();

    let calls = extractor.backend().calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].text, ALICE);
    assert!(calls[0].instruction.contains("- company"));
}

#[tokio::test]
async fn test_unknown_strategy_fails_before_backend() {
    let extractor = Extractor::new(store(), MockBackend::new());
    let err = extractor.extract(ALICE, "poetry").await.unwrap_err();

    assert!(matches!(err, ExtractError::StrategyNotFound { .. }));
    assert_eq!(extractor.backend().call_count(), 0);
}

#[tokio::test]
async fn test_backend_failure_is_not_retried() {
    let extractor = Extractor::new(store(), MockBackend::new().failing("connection refused"));
    let err = extractor.extract(ALICE, "default").await.unwrap_err();

    assert!(err.is_retryable());
    assert!(matches!(err, ExtractError::Backend(BackendError::Request(_))));
    assert_eq!(extractor.backend().call_count(), 1);
}

#[tokio::test]
async fn test_backend_timeout() {
    let backend = MockBackend::new().with_delay(Duration::from_secs(5));
    let extractor = Extractor::new(store(), backend).with_timeout(Duration::from_millis(20));

    let err = extractor.extract(ALICE, "default").await.unwrap_err();
    assert!(matches!(err, ExtractError::Backend(BackendError::Timeout(_))));
}

#[tokio::test]
async fn test_overrides_apply_per_call() {
    let extractor = Extractor::new(store(), MockBackend::new().with_spans(alice_spans()));
    let mut request = ExtractionRequest::new(ALICE).with_strategy("default");
    request.overrides.confidence = Some("low".to_string());

    let graph = extractor.extract_request(&request).await.unwrap();
    assert_eq!(graph.nodes().len(), 3);
    assert!(graph.warnings().is_empty());

    // The registered strategy is untouched.
    let default = extractor.store().load("default").unwrap();
    assert_eq!(default.granularity().confidence.as_str(), "medium");
}

#[tokio::test]
async fn test_custom_vocabulary_without_name() {
    let extractor = Extractor::new(store(), MockBackend::new());
    let request = ExtractionRequest {
        text: ALICE.to_string(),
        strategy: None,
        overrides: StrategyOverrides {
            entities: Some(vec!["Scientist".to_string()]),
            relations: Some(vec!["employed by".to_string()]),
            ..Default::default()
        },
    };

    let (strategy, prompt) = extractor.prepare(&request).unwrap();
    assert_eq!(strategy.entities(), &["scientist".to_string()]);
    assert!(prompt.instruction.contains("- employed_by"));
}

#[tokio::test]
async fn test_compare_strategies_concurrently() {
    let backend = MockBackend::new()
        .with_spans(alice_spans())
        .with_delay(Duration::from_millis(200));
    let extractor = Extractor::new(store(), backend);

    let started = std::time::Instant::now();
    let graphs = extractor
        .compare(ALICE, &["default", "business", "news"])
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(550));
    let names: Vec<_> = graphs.iter().map(|g| g.provenance().strategy.as_str()).collect();
    assert_eq!(names, vec!["default", "business", "news"]);
    assert_eq!(extractor.backend().call_count(), 3);
}

#[tokio::test]
async fn test_compare_fails_on_unknown_strategy() {
    let extractor = Extractor::new(store(), MockBackend::new());
    let err = extractor.compare(ALICE, &["default", "missing"]).await.unwrap_err();
    assert!(matches!(err, ExtractError::StrategyNotFound { ref name } if name == "missing"));
}
