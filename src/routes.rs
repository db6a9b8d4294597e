use std::sync::Arc;

use axum::{
    Form, Json, Router,
    body::Body,
    extract::{FromRequest, Path as AxumPath, Request, State},
    http::{
        HeaderMap, HeaderValue, Method,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{debug, info};

use crate::{
    config::{ServerConfig, non_empty},
    error::ApiError,
    extractor::MediaExtractor,
    files::{
        build_content_disposition, content_type_for_filename, resolve_requested_file,
        resolve_within,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub extractor: Arc<dyn MediaExtractor>,
}

impl AppState {
    pub fn new(config: ServerConfig, extractor: Arc<dyn MediaExtractor>) -> Self {
        Self {
            config: Arc::new(config),
            extractor,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct DownloadResponse {
    status: &'static str,
    filename: String,
    download: String,
}

pub fn build_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);
    let static_dir = state.config.static_dir.clone();

    let mut app = Router::new()
        .route("/api/health", get(health))
        .route("/download", post(download_media))
        .route("/api/download", post(download_media))
        .route("/downloads/{*filename}", get(serve_download))
        .with_state(state);

    if static_dir.is_dir() {
        info!("Serving static files from {:?}", static_dir);
        app = app.fallback_service(ServeDir::new(static_dir));
    }

    app.layer(cors).layer(TraceLayer::new_for_http())
}

fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let allow_origin = match &config.allowed_origins {
        None => AllowOrigin::from(Any),
        Some(origins) => {
            info!(
                "CORS allow-list loaded with {} origin(s): {:?}",
                origins.len(),
                origins
            );
            let origins = Arc::new(origins.clone());
            AllowOrigin::predicate(move |origin: &HeaderValue, _| {
                let normalized = origin
                    .to_str()
                    .ok()
                    .and_then(crate::config::normalize_origin);
                let allowed = normalized
                    .as_ref()
                    .is_some_and(|value| origins.contains(value));
                debug!(
                    "CORS origin check raw={:?} normalized={:?} allowed={}",
                    origin, normalized, allowed
                );
                allowed
            })
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION])
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn download_media(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<DownloadResponse>, ApiError> {
    let payload = read_download_request(request)
        .await
        .ok_or_else(|| ApiError::bad_request("URL parameter missing"))?;
    let raw_url = payload
        .url
        .ok_or_else(|| ApiError::bad_request("URL parameter missing"))?;
    let url = non_empty(&raw_url).ok_or_else(|| ApiError::bad_request("URL cannot be empty"))?;

    let expose_details = state.config.expose_error_details;
    let download_dir = &state.config.download_dir;

    info!("Download requested for {url:?}");
    let written = state
        .extractor
        .download(url, download_dir)
        .await
        .map_err(|failure| ApiError::from_extract(failure, expose_details))?;

    let on_disk = resolve_within(download_dir, &written)
        .await
        .map_err(|error| ApiError::server(error, expose_details))?
        .ok_or_else(|| {
            ApiError::server(
                format!("{:?} is not a file in the download directory", written),
                expose_details,
            )
        })?;

    let filename = on_disk
        .file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| {
            ApiError::server(
                format!("{:?} has no UTF-8 file name", on_disk),
                expose_details,
            )
        })?;

    info!("Download finished for {url:?}: {filename}");
    Ok(Json(DownloadResponse {
        status: "success",
        download: format!("/downloads/{}", urlencoding::encode(&filename)),
        filename,
    }))
}

/// Accepts the `url` field form-encoded or as a JSON object. `None` means
/// the body could not be read as either. Repeated form fields keep the
/// first value.
async fn read_download_request(request: Request) -> Option<DownloadRequest> {
    let is_json = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().starts_with("application/json"));

    if is_json {
        Json::<DownloadRequest>::from_request(request, &())
            .await
            .ok()
            .map(|Json(payload)| payload)
    } else {
        Form::<Vec<(String, String)>>::from_request(request, &())
            .await
            .ok()
            .map(|Form(fields)| DownloadRequest {
                url: fields
                    .into_iter()
                    .find(|(name, _)| name == "url")
                    .map(|(_, value)| value),
            })
    }
}

async fn serve_download(
    State(state): State<AppState>,
    AxumPath(filename): AxumPath<String>,
) -> Result<Response, ApiError> {
    let expose_details = state.config.expose_error_details;

    let path = resolve_requested_file(&state.config.download_dir, &filename)
        .await
        .map_err(|error| ApiError::server(error, expose_details))?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|error| ApiError::server(error, expose_details))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|error| ApiError::server(error, expose_details))?;

    let served_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(filename.as_str());

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(served_name)),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(served_name))
            .map_err(|error| ApiError::server(error, expose_details))?,
    );

    debug!("Serving {:?} ({} bytes)", path, metadata.len());
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}
