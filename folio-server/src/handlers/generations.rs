use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use folio_core::{CreateGeneration, JobRecord};
use serde::Deserialize;

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub portfolio_id: Option<String>,
}

pub async fn list_generations(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Vec<JobRecord>>> {
    let generations = state.service.list(params.portfolio_id.as_deref()).await?;
    Ok(Json(generations))
}

pub async fn create_generation(
    State(state): State<AppState>,
    Json(data): Json<CreateGeneration>,
) -> AppResult<(StatusCode, Json<JobRecord>)> {
    let generation = state.service.create(data).await?;
    Ok((StatusCode::CREATED, Json(generation)))
}

pub async fn get_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<JobRecord>> {
    let generation = state
        .service
        .get(&id)
        .await?
        .ok_or_else(|| AppError::not_found("Generation not found"))?;
    Ok(Json(generation))
}

pub async fn delete_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    if state.service.delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("Generation not found"))
    }
}

pub async fn iterate_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<(StatusCode, Json<JobRecord>)> {
    let generation = state.service.iterate(&id).await?;
    Ok((StatusCode::CREATED, Json(generation)))
}

pub async fn list_portfolio_animations(
    State(state): State<AppState>,
    Path(portfolio_id): Path<String>,
) -> AppResult<Json<Vec<JobRecord>>> {
    let animations = state.service.list_animations(&portfolio_id).await?;
    Ok(Json(animations))
}
