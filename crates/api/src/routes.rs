use axum::{
    Json, Router,
    extract::{Path, State},
    response::Html,
    routing::{get, post},
};
use extract::{ExtractionRequest, GraphResult, StrategyDescription, StrategyOverrides};
use index::{GraphStats, WriteMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use visual::{HtmlRenderer, Renderer, StyleOverrides, Surface, VisualSpec, compare_specs, comparison_report};

use crate::cache::CacheStats;
use crate::error::ApiError;
use crate::metrics::MetricsSnapshot;
use crate::state::{AppState, Extraction};

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/strategies", get(list_strategies))
        .route("/strategies/:name", get(describe_strategy))
        .route("/extract", post(extract_graph))
        .route("/statements", post(generate_statements))
        .route("/visualize", post(visualize))
        .route("/compare", post(compare))
        .route("/load", post(load_graph))
        .route("/stats", get(get_stats))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    strategies: usize,
    neo4j: String,
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let neo4j = match &state.loader {
        Some(loader) => match loader.ping().await {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("error: {e:#}"),
        },
        None => "not configured".to_string(),
    };

    Json(HealthResponse {
        status: "ok",
        strategies: state.extractor.store().list().len(),
        neo4j,
    })
}

#[derive(Serialize)]
struct StrategyList {
    strategies: Vec<String>,
}

async fn list_strategies(State(state): State<Arc<AppState>>) -> Json<StrategyList> {
    Json(StrategyList {
        strategies: state.extractor.store().list(),
    })
}

async fn describe_strategy(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<StrategyDescription> {
    Ok(Json(state.extractor.store().describe(&name)?))
}

#[derive(Serialize)]
struct ExtractResponse {
    extraction_id: Uuid,
    cached: bool,
    graph: GraphResult,
}

async fn extract_graph(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExtractionRequest>,
) -> ApiResult<ExtractResponse> {
    let Extraction { graph, cached } = tracked(&state, state.extract(&req).await)?;
    let extraction_id = Uuid::new_v4();
    info!(
        extraction_id = %extraction_id,
        strategy = %graph.provenance().strategy,
        cached,
        "Extraction served"
    );
    Ok(Json(ExtractResponse {
        extraction_id,
        cached,
        graph: Arc::unwrap_or_clone(graph),
    }))
}

fn default_mode() -> WriteMode {
    WriteMode::Merge
}

#[derive(Deserialize)]
struct StatementsRequest {
    #[serde(flatten)]
    extraction: ExtractionRequest,
    #[serde(default = "default_mode")]
    mode: WriteMode,
    batch_size: Option<usize>,
}

#[derive(Serialize)]
struct StatementsResponse {
    mode: WriteMode,
    strategy: String,
    nodes: usize,
    relationships: usize,
    statements: Vec<String>,
}

async fn generate_statements(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StatementsRequest>,
) -> ApiResult<StatementsResponse> {
    if req.batch_size == Some(0) {
        return Err(ApiError::BadRequest("batch_size must be at least 1".to_string()));
    }
    let Extraction { graph, .. } = tracked(&state, state.extract(&req.extraction).await)?;

    let statements = index::statements(&graph, req.mode, req.batch_size);
    state.metrics.record_statements(statements.len());

    Ok(Json(StatementsResponse {
        mode: req.mode,
        strategy: graph.provenance().strategy.clone(),
        nodes: graph.nodes().len(),
        relationships: graph.relationships().len(),
        statements,
    }))
}

#[derive(Deserialize)]
struct VisualizeRequest {
    #[serde(flatten)]
    extraction: ExtractionRequest,
    #[serde(default)]
    style: StyleOverrides,
    #[serde(default)]
    surface: Surface,
}

async fn visualize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VisualizeRequest>,
) -> Result<Html<String>, ApiError> {
    let Extraction { graph, .. } = tracked(&state, state.extract(&req.extraction).await)?;
    let spec = visual::to_visual_spec(&graph, &req.style);
    Ok(Html(HtmlRenderer.render(&spec, &req.surface)?))
}

#[derive(Deserialize)]
struct CompareRequest {
    text: String,
    strategies: Vec<String>,
    #[serde(default)]
    overrides: StrategyOverrides,
    #[serde(default)]
    style: StyleOverrides,
}

#[derive(Serialize)]
struct CompareResponse {
    specs: Vec<VisualSpec>,
    report: String,
}

async fn compare(State(state): State<Arc<AppState>>, Json(req): Json<CompareRequest>) -> ApiResult<CompareResponse> {
    if req.strategies.is_empty() {
        return Err(ApiError::BadRequest("at least one strategy is required".to_string()));
    }

    let requests: Vec<ExtractionRequest> = req
        .strategies
        .iter()
        .map(|name| ExtractionRequest {
            text: req.text.clone(),
            strategy: Some(name.clone()),
            overrides: req.overrides.clone(),
        })
        .collect();
    let runs = requests.iter().map(|r| state.extract(r));
    let results = tracked(&state, futures::future::try_join_all(runs).await)?;

    let graphs: Vec<GraphResult> = results.iter().map(|e| e.graph.as_ref().clone()).collect();
    let specs = compare_specs(&graphs, &req.strategies, &req.style)?;
    let report = comparison_report(&specs);

    Ok(Json(CompareResponse { specs, report }))
}

#[derive(Deserialize)]
struct LoadRequest {
    #[serde(flatten)]
    extraction: ExtractionRequest,
    #[serde(default = "default_mode")]
    mode: WriteMode,
}

#[derive(Serialize)]
struct LoadResponse {
    mode: WriteMode,
    statements_executed: usize,
    nodes: usize,
    relationships: usize,
}

async fn load_graph(State(state): State<Arc<AppState>>, Json(req): Json<LoadRequest>) -> ApiResult<LoadResponse> {
    let loader = state.loader.as_ref().ok_or(ApiError::NotConfigured("Neo4j"))?;
    let Extraction { graph, .. } = tracked(&state, state.extract(&req.extraction).await)?;

    let executed = loader.load(&graph, req.mode).await.map_err(ApiError::Database)?;
    state.metrics.record_statements(executed);

    Ok(Json(LoadResponse {
        mode: req.mode,
        statements_executed: executed,
        nodes: graph.nodes().len(),
        relationships: graph.relationships().len(),
    }))
}

#[derive(Serialize)]
struct StatsResponse {
    metrics: MetricsSnapshot,
    cache: CacheStats,
    graph: Option<GraphStats>,
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let graph = match &state.loader {
        Some(loader) => match loader.get_stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, "Failed to read graph statistics");
                None
            }
        },
        None => None,
    };

    Json(StatsResponse {
        metrics: state.metrics.snapshot(),
        cache: state.cache.stats(),
        graph,
    })
}

/// Count the outcome of an extracting request.
fn tracked<T>(state: &AppState, result: Result<T, ApiError>) -> Result<T, ApiError> {
    state.metrics.record_request(result.is_ok());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::tests::{alice_spans, test_state};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use extract::testing::MockBackend;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const TEXT: &str = "Alice works for TechCorp.";

    fn app() -> (Router, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::new().with_spans(alice_spans()));
        let state = test_state(Arc::clone(&backend), AppConfig::balanced_mode());
        (router(Arc::new(state)), backend)
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, String) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_without_neo4j() {
        let (app, _) = app();
        let (status, body) = send(app, "GET", "/health", None).await;
        let json: Value = serde_json::from_str(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["neo4j"], "not configured");
        assert!(json["strategies"].as_u64().unwrap() >= 5);
    }

    #[tokio::test]
    async fn test_strategy_routes() {
        let (app, _) = app();
        let (status, body) = send(app.clone(), "GET", "/strategies", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"business\""));

        let (status, body) = send(app.clone(), "GET", "/strategies/business", None).await;
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "business");

        let (status, body) = send(app, "GET", "/strategies/astrology", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("astrology"));
    }

    #[tokio::test]
    async fn test_extract_returns_graph() {
        let (app, backend) = app();
        let (status, body) = send(
            app,
            "POST",
            "/extract",
            Some(json!({ "text": TEXT, "strategy": "business" })),
        )
        .await;
        let json: Value = serde_json::from_str(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["cached"], false);
        assert_eq!(json["graph"]["nodes"].as_array().unwrap().len(), 2);
        assert_eq!(json["graph"]["relationships"][0]["rel_type"], "works_for");
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_override_is_unprocessable() {
        let (app, backend) = app();
        let (status, _) = send(
            app,
            "POST",
            "/extract",
            Some(json!({ "text": TEXT, "strategy": "business", "overrides": { "breadth": "huge" } })),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_is_bad_gateway() {
        let backend = Arc::new(MockBackend::new().failing("connection refused"));
        let mut config = AppConfig::balanced_mode();
        config.retry.max_retries = 0;
        let app = router(Arc::new(test_state(backend, config)));

        let (status, body) = send(app, "POST", "/extract", Some(json!({ "text": TEXT }))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_statements_in_batches() {
        let (app, _) = app();
        let (status, body) = send(
            app.clone(),
            "POST",
            "/statements",
            Some(json!({ "text": TEXT, "strategy": "business", "mode": "create" })),
        )
        .await;
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["mode"], "create");
        assert_eq!(json["statements"].as_array().unwrap().len(), 3);
        assert!(json["statements"][0].as_str().unwrap().starts_with("CREATE"));

        let (_, body) = send(
            app.clone(),
            "POST",
            "/statements",
            Some(json!({ "text": TEXT, "strategy": "business", "batch_size": 2 })),
        )
        .await;
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["mode"], "merge");
        assert_eq!(json["statements"].as_array().unwrap().len(), 2);

        let (status, _) = send(
            app,
            "POST",
            "/statements",
            Some(json!({ "text": TEXT, "batch_size": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_visualize_returns_html() {
        let (app, _) = app();
        let (status, body) = send(
            app,
            "POST",
            "/visualize",
            Some(json!({ "text": TEXT, "strategy": "business", "surface": { "height": "400px" } })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("<!DOCTYPE html>"));
        assert!(body.contains("height: 400px"));
        assert!(body.contains("Node Visualization - business"));
    }

    #[tokio::test]
    async fn test_compare_strategies() {
        let (app, backend) = app();
        let (status, body) = send(
            app,
            "POST",
            "/compare",
            Some(json!({ "text": TEXT, "strategies": ["business", "default"] })),
        )
        .await;
        let json: Value = serde_json::from_str(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["specs"].as_array().unwrap().len(), 2);
        assert_eq!(json["specs"][1]["title"], "Comparison 2: default");
        assert!(json["report"].as_str().unwrap().starts_with("Data Comparison Statistics"));
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_compare_requires_strategies() {
        let (app, _) = app();
        let (status, _) = send(app, "POST", "/compare", Some(json!({ "text": TEXT, "strategies": [] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_load_without_neo4j() {
        let (app, backend) = app();
        let (status, _) = send(app, "POST", "/load", Some(json!({ "text": TEXT }))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stats_reflect_requests() {
        let (app, _) = app();
        let request = json!({ "text": TEXT, "strategy": "business" });
        send(app.clone(), "POST", "/extract", Some(request.clone())).await;
        send(app.clone(), "POST", "/extract", Some(request)).await;

        let (status, body) = send(app, "GET", "/stats", None).await;
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["metrics"]["total_requests"], 2);
        assert_eq!(json["metrics"]["extractions"], 1);
        assert_eq!(json["cache"]["hits"], 1);
        assert!(json["graph"].is_null());
    }
}
