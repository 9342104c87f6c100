use crate::error::ApiError;
use crate::middleware::CallerId;
use crate::server::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use ragforge_core::{ModelKind, ModelRecord, RagError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

type ApiResult<T> = Result<T, ApiError>;

/// A model registration; the id is generated when absent.
#[derive(Debug, Deserialize)]
pub struct RegisterModel {
    /// Model id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Embedding or chat.
    pub kind: ModelKind,
    /// Provider name, such as `openai` or `ollama`.
    pub provider: String,
    /// Endpoint; the provider default when empty.
    #[serde(default)]
    pub base_url: String,
    /// Model name at the provider.
    pub model_name: String,
    /// Provider API key.
    #[serde(default)]
    pub api_key: String,
    /// Vector dimension; required for embedding models.
    #[serde(default)]
    pub dimension: usize,
    /// Output length limit of chat models.
    #[serde(default)]
    pub max_output_length: u32,
    /// Token limit of chat models.
    #[serde(default)]
    pub max_tokens: u32,
}

impl RegisterModel {
    fn into_record(self, user_id: &str) -> Result<ModelRecord, RagError> {
        if self.provider.trim().is_empty() || self.model_name.trim().is_empty() {
            return Err(RagError::Validation(
                "provider and model_name are required".into(),
            ));
        }
        if self.kind == ModelKind::Embedding && self.dimension == 0 {
            return Err(RagError::Validation(
                "embedding models need a dimension".into(),
            ));
        }
        Ok(ModelRecord {
            id: self
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            user_id: user_id.to_string(),
            kind: self.kind,
            provider: self.provider.trim().to_lowercase(),
            base_url: self.base_url,
            model_name: self.model_name,
            api_key: self.api_key,
            dimension: self.dimension,
            max_output_length: self.max_output_length,
            max_tokens: self.max_tokens,
        })
    }
}

/// A model as listed back to its owner; the API key is never echoed.
#[derive(Debug, Serialize)]
pub struct ModelView {
    /// Model id.
    pub id: String,
    /// Embedding or chat.
    pub kind: ModelKind,
    /// Provider name.
    pub provider: String,
    /// Endpoint.
    pub base_url: String,
    /// Model name at the provider.
    pub model_name: String,
    /// Vector dimension; 0 for chat models.
    pub dimension: usize,
    /// Whether a key is stored.
    pub has_api_key: bool,
}

impl From<ModelRecord> for ModelView {
    fn from(record: ModelRecord) -> Self {
        Self {
            has_api_key: !record.api_key.is_empty(),
            id: record.id,
            kind: record.kind,
            provider: record.provider,
            base_url: record.base_url,
            model_name: record.model_name,
            dimension: record.dimension,
        }
    }
}

/// `POST /api/models`: registers a model owned by the caller.
pub async fn register_model(
    State(state): State<Arc<AppState>>,
    CallerId(user): CallerId,
    Json(body): Json<RegisterModel>,
) -> ApiResult<impl IntoResponse> {
    let record = body.into_record(&user)?;
    state.models.create_model(&record).await?;
    info!(model_id = %record.id, user_id = %user, provider = %record.provider, "Model registered");
    Ok((StatusCode::CREATED, Json(ModelView::from(record))))
}

/// Query of `GET /api/models`.
#[derive(Debug, Deserialize)]
pub struct ModelFilter {
    /// Only models of this kind.
    #[serde(default)]
    pub kind: Option<ModelKind>,
}

/// `GET /api/models`: the caller's models.
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    CallerId(user): CallerId,
    Query(filter): Query<ModelFilter>,
) -> ApiResult<Json<Vec<ModelView>>> {
    let models = state.models.list_models(&user, filter.kind).await?;
    Ok(Json(models.into_iter().map(ModelView::from).collect()))
}
