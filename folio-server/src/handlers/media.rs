use std::path::PathBuf;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::Response;
use folio_core::JobRecord;
use tokio_util::io::ReaderStream;

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;

async fn load_record(state: &AppState, id: &str) -> AppResult<JobRecord> {
    state
        .store
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("Generation not found"))
}

async fn stream_file(path: PathBuf, content_type: &'static str) -> AppResult<Response> {
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| AppError::not_found("File not found"))?;

    let body = Body::from_stream(ReaderStream::new(file));
    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .body(body)
        .map_err(|err| AppError::internal(err.to_string()))
}

pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let record = load_record(&state, &id).await?;
    let rel = record
        .image_path
        .ok_or_else(|| AppError::not_found("Image not available"))?;
    stream_file(state.storage.absolute(rel), "image/webp").await
}

pub async fn get_thumbnail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let record = load_record(&state, &id).await?;
    let rel = record
        .thumbnail_path
        .ok_or_else(|| AppError::not_found("Thumbnail not available"))?;
    stream_file(state.storage.absolute(rel), "image/webp").await
}

pub async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let record = load_record(&state, &id).await?;
    let rel = record
        .video_path
        .ok_or_else(|| AppError::not_found("Video not available"))?;
    stream_file(state.storage.absolute(rel), "video/mp4").await
}
