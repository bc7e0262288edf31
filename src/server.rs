use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    config::{ConfigError, ConfigManager, StorageConfig},
    flow::{resolver::resolve_file_upload_block, store::FlowStore, store::StoreError},
    logger::Telemetry,
    storage::{PresignedPostGenerator, PresignedPostRequest, StorageError},
};

pub const UPLOAD_URL_ROUTE: &str = "/flows/{flowId}/blocks/{blockId}/storage/upload-url";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn FlowStore>,
    pub config: ConfigManager,
    pub presigner: Arc<dyn PresignedPostGenerator>,
    pub telemetry: Arc<Telemetry>,
}

/// Errors returned to HTTP clients
#[derive(Debug)]
pub enum ApiError {
    /// 400
    BadRequest(String),
    /// 404
    NotFound(String),
    /// 500
    InternalServerError(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::InternalServerError(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::InternalServerError(err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::InternalServerError(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "ERR_BAD_REQUEST", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "ERR_NOT_FOUND", msg),
            ApiError::InternalServerError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ERR_INTERNAL_SERVER_ERROR",
                msg,
            ),
        };

        let body = Json(json!({
            "error": message,
            "errorDetails": {
                "errorCode": error_code,
                "errorMessage": message,
            }
        }));

        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlQuery {
    pub file_path: Option<String>,
    pub file_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlResponse {
    pub presigned_url: String,
    pub form_data: Map<String, Value>,
    pub has_reached_storage_limit: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(UPLOAD_URL_ROUTE, get(get_upload_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_upload_url(
    State(state): State<AppState>,
    Path((flow_id, block_id)): Path<(String, String)>,
    Query(query): Query<UploadUrlQuery>,
) -> Result<Json<UploadUrlResponse>, ApiError> {
    let telemetry = state.telemetry.clone();
    telemetry
        .instrument_request("upload_url", || {
            generate_upload_url(&state, &flow_id, &block_id, query)
        })
        .await
        .map(Json)
}

async fn generate_upload_url(
    state: &AppState,
    flow_id: &str,
    block_id: &str,
    query: UploadUrlQuery,
) -> Result<UploadUrlResponse, ApiError> {
    let storage = StorageConfig::load(&state.config).await?;

    let file_path = query
        .file_path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing filePath query parameter".to_string()))?;

    let flow = state
        .store
        .find_one_by_flow_id(flow_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Published flow not found".to_string()))?;

    let block = resolve_file_upload_block(state.store.as_ref(), &flow, block_id)
        .await?
        .ok_or_else(|| {
            warn!(%flow_id, %block_id, "file upload block not found");
            ApiError::BadRequest("File upload block not found".to_string())
        })?;

    let post = state
        .presigner
        .generate(
            &storage,
            &PresignedPostRequest {
                file_path,
                file_type: query.file_type,
                max_file_size_mb: storage.max_file_size_mb,
            },
        )
        .await?;

    let key = post
        .form_data
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ApiError::InternalServerError("Upload form is missing the object key".to_string())
        })?;

    info!(%flow_id, block_id = %block.id, %key, "issued upload url");

    Ok(UploadUrlResponse {
        presigned_url: format!("{}/{}", post.post_url, key),
        form_data: post.form_data,
        has_reached_storage_limit: false,
    })
}

/// Serves the API on `addr` until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("botflow API listening on {addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(?e, "could not listen for Ctrl-C");
            }
        })
        .await?;
    Ok(())
}
