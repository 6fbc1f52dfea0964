//! HTTP surface
//!
//! Both endpoints answer HTTP 200 with a status envelope:
//! `{"status":1,"detail":{"sticker_url":…}}` on success and
//! `{"status":0,"detail":{"error_type":…,"details":…}}` on failure.

use crate::error::ErrorDetail;
use crate::processor::StickerProcessor;
use crate::types::PipelineMode;
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<StickerProcessor>,
}

impl AppState {
    #[must_use]
    pub fn new(processor: Arc<StickerProcessor>) -> Self {
        Self { processor }
    }
}

/// Request body of both pipeline endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRequest {
    pub image_url: String,
}

/// Status envelope returned by both pipeline endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// 1 on success, 0 on failure
    pub status: u8,
    pub detail: Value,
}

impl ApiResponse {
    #[must_use]
    pub fn success(mode: PipelineMode, url: &str) -> Self {
        let mut detail = serde_json::Map::new();
        detail.insert(mode.url_field().to_string(), Value::String(url.to_string()));
        Self {
            status: 1,
            detail: Value::Object(detail),
        }
    }

    #[must_use]
    pub fn failure(detail: &ErrorDetail) -> Self {
        Self {
            status: 0,
            detail: json!({
                "error_type": detail.error_type,
                "details": detail.details,
            }),
        }
    }
}

/// Router with the pipeline endpoints, a health check and permissive CORS
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/generate-sticker/", post(generate_sticker))
        .route("/generate-sticker", post(generate_sticker))
        .route("/remove-background/", post(remove_background))
        .route("/remove-background", post(remove_background))
        .route("/health", get(health))
        .with_state(state)
        .layer(cors)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn generate_sticker(
    State(state): State<AppState>,
    Json(request): Json<ImageRequest>,
) -> Json<ApiResponse> {
    Json(handle(&state, PipelineMode::Sticker, &request.image_url).await)
}

async fn remove_background(
    State(state): State<AppState>,
    Json(request): Json<ImageRequest>,
) -> Json<ApiResponse> {
    Json(handle(&state, PipelineMode::BackgroundRemoval, &request.image_url).await)
}

#[instrument(skip(state))]
async fn handle(state: &AppState, mode: PipelineMode, image_url: &str) -> ApiResponse {
    let processor = &state.processor;
    if let Err(err) = processor.fetcher().ensure_reachable(image_url).await {
        info!("Rejected unreachable image URL");
        return ApiResponse::failure(&err.to_detail(mode));
    }

    match processor.run(mode, image_url).await {
        Ok(output) => ApiResponse::success(mode, &output.url),
        Err(err) => ApiResponse::failure(&err.to_detail(mode)),
    }
}
