use crate::app::SessionCommand;
use crate::config::redact;
use crate::error::{StorageError, UploadError};
use crate::events::SnapEvent;
use crate::storage::{GallerySource, ImageMime, UploadRequest, UploadSink};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::api::ServerState;

fn no_cache() -> [(header::HeaderName, &'static str); 3] {
    [
        (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        (header::PRAGMA, "no-cache"),
        (header::EXPIRES, "0"),
    ]
}

fn json_error<S: Into<String>>(status: StatusCode, message: S) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "error": message.into(),
        })),
    )
        .into_response()
}

fn upload_error_status(error: &UploadError) -> StatusCode {
    match error {
        UploadError::MissingImage
        | UploadError::InvalidPayload { .. }
        | UploadError::UnsupportedMime { .. }
        | UploadError::InvalidFilename { .. } => StatusCode::BAD_REQUEST,
        UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        UploadError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        UploadError::Backend(StorageError::AlreadyExists { .. }) => StatusCode::CONFLICT,
        UploadError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Handler for health check endpoint
pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let health_info = json!({
        "status": "healthy",
        "storage": state.bucket.backend_name(),
        "bucket": state.bucket.bucket(),
        "privileged": state.bucket.is_privileged(),
        "session": state.session.as_ref().map(|s| s.status().state),
        "server_info": {
            "subscribers": state.event_bus.subscriber_count(),
        }
    });

    (StatusCode::OK, Json(health_info))
}

/// Store a base64 image in the bucket
pub async fn upload_handler(
    State(state): State<ServerState>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!("Rejected upload body: {}", rejection.body_text());
            let status = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                StatusCode::PAYLOAD_TOO_LARGE
            } else {
                StatusCode::BAD_REQUEST
            };
            return json_error(status, rejection.body_text());
        }
    };

    match state.bucket.upload(request).await {
        Ok(receipt) => {
            if let Err(e) = state.event_bus.publish(SnapEvent::UploadCompleted {
                url: receipt.url.clone(),
                filename: receipt.filename.clone(),
            }) {
                warn!("Failed to publish upload event: {}", e);
            }

            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "url": receipt.url,
                    "filename": receipt.filename,
                    "path": receipt.path,
                    "storage": state.bucket.backend_name(),
                })),
            )
                .into_response()
        }
        Err(e) => {
            let status = upload_error_status(&e);
            if status.is_server_error() {
                error!("Upload failed: {}", e);
            } else {
                warn!("Upload rejected ({}): {}", status, e);
            }
            json_error(status, e.to_string())
        }
    }
}

/// Newest-first listing of stored photos
pub async fn gallery_handler(State(state): State<ServerState>) -> Response {
    match state.bucket.list_entries().await {
        Ok(photos) => {
            debug!("Gallery request returned {} photos", photos.len());
            (
                StatusCode::OK,
                no_cache(),
                Json(json!({
                    "success": true,
                    "count": photos.len(),
                    "photos": photos,
                    "storage": state.bucket.backend_name(),
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!("Gallery listing failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                no_cache(),
                Json(json!({
                    "success": false,
                    "error": "Failed to load gallery",
                    "details": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

/// Keep the newest photo and delete the rest. Requires the cleanup secret.
pub async fn cleanup_handler(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let authorized = matches!(
        (state.config.server.cleanup_secret.as_deref(), token),
        (Some(expected), Some(token)) if token == expected
    );
    if !authorized {
        warn!("Unauthorized cleanup request");
        return json_error(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    match state.bucket.prune_to_latest().await {
        Ok(result) => (
            StatusCode::OK,
            no_cache(),
            Json(json!({
                "success": true,
                "kept": result.kept,
                "deleted": result.deleted,
            })),
        )
            .into_response(),
        Err(StorageError::Unprivileged) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Service role key not configured",
        ),
        Err(e) => {
            error!("Cleanup failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": "Cleanup failed",
                    "message": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

/// Which storage settings are present, with secrets cut to a prefix
pub async fn debug_handler(State(state): State<ServerState>) -> Response {
    let storage = &state.config.storage;
    let url_prefix: String = storage.endpoint.chars().take(30).collect();

    let presence = json!({
        "hasUrl": !storage.endpoint.is_empty(),
        "hasKey": storage.anon_key.is_some(),
        "hasServiceKey": storage.service_role_key.is_some(),
        "hasCleanupSecret": state.config.server.cleanup_secret.is_some(),
        "urlPrefix": format!("{}...", url_prefix),
        "keyPrefix": storage.anon_key.as_deref().map(redact),
        "bucket": state.bucket.bucket(),
    });

    match state.bucket.list(5).await {
        Ok(photos) => {
            let mut body = presence;
            body["success"] = json!(true);
            body["photoCount"] = json!(photos.len());
            body["photos"] = json!(photos);
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            let mut body = presence;
            body["success"] = json!(false);
            body["error"] = json!(e.to_string());
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

/// Serve a stored object at its public URL
pub async fn public_object_handler(
    State(state): State<ServerState>,
    Path((bucket, file)): Path<(String, String)>,
) -> Response {
    if bucket != state.bucket.bucket() {
        return json_error(StatusCode::NOT_FOUND, "Bucket not found");
    }

    match state.bucket.read_object(&file).await {
        Ok(bytes) => {
            let content_type = ImageMime::from_extension(&file)
                .map(|mime| mime.mime_type())
                .unwrap_or("application/octet-stream");
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, content_type),
                    (header::CACHE_CONTROL, "public, max-age=3600"),
                ],
                Bytes::from(bytes),
            )
                .into_response()
        }
        Err(StorageError::NotFound { .. }) | Err(StorageError::InvalidName { .. }) => {
            json_error(StatusCode::NOT_FOUND, "Object not found")
        }
        Err(e) => {
            error!("Failed to read object {}: {}", file, e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read object")
        }
    }
}

pub async fn session_status_handler(State(state): State<ServerState>) -> Response {
    match &state.session {
        Some(session) => (StatusCode::OK, Json(session.status())).into_response(),
        None => json_error(StatusCode::SERVICE_UNAVAILABLE, "No booth session running"),
    }
}

/// `start`, `cancel`, `download`, `coin` or `wallet`
pub async fn session_command_handler(
    State(state): State<ServerState>,
    Path(action): Path<String>,
) -> Response {
    let Some(session) = &state.session else {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "No booth session running");
    };

    let command = match action.as_str() {
        "start" => SessionCommand::Start,
        "cancel" => SessionCommand::Cancel,
        "download" => SessionCommand::Download,
        "coin" => SessionCommand::MintCoin,
        "wallet" => SessionCommand::ToggleWallet,
        _ => return json_error(StatusCode::NOT_FOUND, format!("Unknown action: {}", action)),
    };

    match session.send(command).await {
        Ok(()) => {
            info!("Session command {:?} queued via API", command);
            (
                StatusCode::ACCEPTED,
                Json(json!({ "success": true, "action": action })),
            )
                .into_response()
        }
        Err(e) => json_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}
