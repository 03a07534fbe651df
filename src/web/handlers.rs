//! Route handlers for the player-facing surface

use std::str::FromStr;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use serde::Serialize;
use tracing::{error, info};

use crate::debrid::ResolveRequest;
use crate::errors::{AppError, DebridError};
use crate::models::{MediaType, ParsedStream, RawStream, StreamRequest, StreamType};
use crate::playback::{FileInfo, open_store_auth};
use crate::web::AppState;

/// Wire envelope of the stream listing
#[derive(Debug, Serialize)]
pub struct StreamListResponse {
    pub streams: Vec<RawStream>,
}

/// Convert a pipeline record into the upstream wire shape the player eats
fn to_wire(stream: ParsedStream) -> RawStream {
    RawStream {
        url: stream.url.clone(),
        external_url: stream.external_url.clone(),
        yt_id: stream.yt_id.clone(),
        info_hash: match stream.stream_type() {
            StreamType::P2p => stream.torrent.as_ref().map(|t| t.info_hash.clone()),
            _ => None,
        },
        file_idx: stream.torrent.as_ref().and_then(|t| t.file_idx),
        name: stream
            .formatted_name
            .clone()
            .or_else(|| stream.error.as_ref().map(|e| e.title.clone())),
        title: stream
            .formatted_description
            .clone()
            .or_else(|| stream.error.as_ref().and_then(|e| e.description.clone())),
        description: None,
        subtitles: stream.subtitles.clone(),
        sources: stream
            .torrent
            .as_ref()
            .map(|t| t.sources.clone())
            .unwrap_or_default(),
        behavior_hints: None,
    }
}

/// `GET /stream/{type}/{id}.json`
pub async fn stream(
    State(state): State<AppState>,
    Path((media_type, id)): Path<(String, String)>,
) -> Response {
    let Some(id) = id.strip_suffix(".json").map(str::to_string) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Ok(media_type) = MediaType::from_str(&media_type) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let request = StreamRequest::new(media_type, id);
    let user = (*state.default_user).clone();

    match state.orchestrator.handle(&request, user, None).await {
        Ok(streams) => {
            info!(count = streams.len(), "stream listing served");
            Json(StreamListResponse {
                streams: streams.into_iter().map(to_wire).collect(),
            })
            .into_response()
        }
        Err(AppError::InvalidConfig { path, message }) => (
            StatusCode::BAD_REQUEST,
            format!("configuration error at {path}: {message}"),
        )
            .into_response(),
        Err(error) => {
            error!(%error, "stream request failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /playback/{auth}/{file_info}/{metadata_id}/{filename}`
///
/// 307 to the final playable URL; 302 to a static placeholder on debrid
/// errors, including the distinguished downloading state.
pub async fn playback(
    State(state): State<AppState>,
    Path((auth, file_info, metadata_id, filename)): Path<(String, String, String, String)>,
) -> Response {
    let auth = match open_store_auth(&state.credentials, &auth) {
        Ok(auth) => auth,
        Err(error) => return reject(error),
    };
    let file_info = match FileInfo::decode(&file_info) {
        Ok(info) => info,
        Err(error) => return reject(error),
    };
    let metadata = match state.metadata_store.get(&metadata_id).await {
        Ok(Some(metadata)) => metadata,
        Ok(None) => {
            return reject(DebridError::PlaybackRejected {
                message: format!("unknown metadata id '{metadata_id}'"),
            });
        }
        Err(error) => {
            error!(%error, "metadata store read failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let request = ResolveRequest {
        auth,
        file_info,
        metadata,
        filename: Some(filename),
    };
    match state.resolver.resolve(request).await {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(error) => reject(error),
    }
}

/// Plain 302; the player treats it as a retryable placeholder target
fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(axum::http::header::LOCATION, location.to_string())],
    )
        .into_response()
}

/// Map a debrid failure onto its redirect target
fn reject(error: DebridError) -> Response {
    match &error {
        DebridError::Downloading => {
            info!("playback still downloading, redirecting to placeholder");
            found("/static/downloading.mp4")
        }
        DebridError::Service { code, message } => {
            error!(code = %code, message, "debrid resolution failed");
            found(&code.placeholder_path())
        }
        DebridError::PlaybackRejected { message } => {
            error!(message, "playback link rejected");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

pub async fn health() -> &'static str {
    "ok"
}
