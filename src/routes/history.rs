use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::dto::search_dto::ClearHistoryResponse;
use crate::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

#[axum::debug_handler]
pub async fn get_chat_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> crate::error::Result<Json<serde_json::Value>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    let chats = state.store.user_chats(&user_id, limit).await?;
    Ok(Json(json!({ "chats": chats })))
}

#[axum::debug_handler]
pub async fn clear_chat_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> crate::error::Result<Json<ClearHistoryResponse>> {
    let deleted_count = state.store.clear_user_chats(&user_id).await?;
    tracing::info!(user_id = %user_id, deleted_count, "chat history cleared");
    Ok(Json(ClearHistoryResponse { deleted_count }))
}
