use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    middleware::from_fn,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use futures::StreamExt;
use medichat_core::{
    FastEmbedder, GeminiClient, GenerationError, PineconeStore, RagPipeline,
};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
    config::ServiceConfig,
    data_stream::{STREAM_HEADER, STREAM_VERSION, encode_event},
    extraction::{DataUrl, ExtractionError, GeminiReportExtractor, ReportExtractor},
    models::{ChatRequest, ExtractReportRequest},
    telemetry::correlation_id_middleware,
};

pub const CHAT_ROUTE: &str = "/api/ask-ai/medichatgemini";
pub const EXTRACT_ROUTE: &str = "/api/ask-ai/extractreportgemini";

type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn bad_gateway_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn gateway_timeout_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::GATEWAY_TIMEOUT,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn provider_error(message: &str, e: &GenerationError) -> ApiError {
    match e {
        GenerationError::Timeout(_) => gateway_timeout_error(message, &e.to_string()),
        _ => bad_gateway_error(message, &e.to_string()),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: RagPipeline,
    pub extractor: Arc<dyn ReportExtractor>,
    pub max_upload_bytes: usize,
}

pub fn create_app(config: &ServiceConfig) -> Router {
    build_router(create_app_state(config))
}

pub fn create_app_state(config: &ServiceConfig) -> AppState {
    let gemini = GeminiClient::new(config.gemini_api_key.clone())
        .with_base_url(config.gemini_base_url.clone())
        .with_model(config.gemini_model.clone())
        .with_request_timeout(config.generation_timeout);

    let embedder = match &config.fastembed_cache_dir {
        Some(dir) => FastEmbedder::new().with_cache_dir(dir.clone()),
        None => FastEmbedder::new(),
    };

    if config.pinecone_api_key.is_none() {
        warn!("PINECONE_API_KEY not set, answers will not be grounded in clinical findings");
    }

    let store = PineconeStore::new(config.pinecone_api_key.clone(), Arc::new(embedder));
    let store = match &config.pinecone_index_host {
        Some(host) => store.with_index_host(config.scope.collection.clone(), host.clone()),
        None => store,
    };

    let pipeline = RagPipeline::new(Arc::new(store), Arc::new(gemini.clone()), config.scope.clone())
        .with_generation_budget(config.generation_timeout);

    AppState {
        pipeline,
        extractor: Arc::new(GeminiReportExtractor::new(gemini)),
        max_upload_bytes: config.max_upload_bytes,
    }
}

pub fn build_router(app_state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(app_state.max_upload_bytes);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route(CHAT_ROUTE, post(chat))
        .route(EXTRACT_ROUTE, post(extract_report).layer(upload_limit))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "MediChat Clinical Report Assistant",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Answers questions about a clinical report, grounded with retrieved clinical findings",
        "endpoints": {
            "POST /api/ask-ai/extractreportgemini": "Extract report text from an uploaded image or PDF data URL",
            "POST /api/ask-ai/medichatgemini": "Stream a grounded answer to the last chat message",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let question = request
        .question()
        .ok_or_else(|| bad_request_error("messages must contain at least one message"))?;

    info!(
        messages = request.messages.len(),
        report_chars = request.report_text().len(),
        "Received chat request"
    );

    let answer = state
        .pipeline
        .answer(request.report_text(), question)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to start answer generation");
            provider_error("Failed to generate answer", &e)
        })?;

    let body = Body::from_stream(answer.map(|event| Ok::<_, Infallible>(encode_event(&event))));

    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            ),
            (
                HeaderName::from_static(STREAM_HEADER),
                HeaderValue::from_static(STREAM_VERSION),
            ),
        ],
        body,
    )
        .into_response())
}

async fn extract_report(
    State(state): State<AppState>,
    Json(request): Json<ExtractReportRequest>,
) -> Result<String, ApiError> {
    let upload = DataUrl::parse(&request.base64).map_err(|e| {
        warn!(error = %e, "Rejected report upload");
        bad_request_error(&e.to_string())
    })?;

    state.extractor.extract(&upload).await.map_err(|e| {
        error!(error = %e, "Report extraction failed");
        match &e {
            ExtractionError::Provider(inner) => provider_error("Failed to extract report text", inner),
            _ => bad_request_error(&e.to_string()),
        }
    })
}
