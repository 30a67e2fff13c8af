//! Models endpoint
//!
//! Lists the models the gateway can route, one entry per model name no
//! matter how many tenants serve it.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    registry::ModelEntry,
    routing::ModelNotFoundError,
    AppState,
};

/// Model information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Model {
    pub id: String,
    pub object: String,
    pub created: i64,
    /// Backend family serving the model
    pub owned_by: String,
}

/// Models list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<Model>,
}

fn describe(entry: &ModelEntry, created: i64) -> Model {
    Model {
        id: entry.model.clone(),
        object: "model".to_string(),
        created,
        owned_by: entry.family.as_str().to_string(),
    }
}

/// List available models
pub async fn list_models(
    State(state): State<Arc<AppState>>,
) -> AppResult<(StatusCode, Json<ModelsResponse>)> {
    let created = state.started_at.timestamp();

    let mut models: Vec<Model> = state
        .registry
        .index()
        .models()
        .map(|entry| describe(entry, created))
        .collect();
    models.sort_by(|a, b| a.id.cmp(&b.id));

    let response = ModelsResponse {
        object: "list".to_string(),
        data: models,
    };

    Ok((StatusCode::OK, Json(response)))
}

/// Describe a single model
pub async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
) -> AppResult<Json<Model>> {
    let entry = state
        .registry
        .resolve(&model_id)
        .ok_or_else(|| AppError::from(ModelNotFoundError(model_id.clone())))?;

    Ok(Json(describe(entry, state.started_at.timestamp())))
}
