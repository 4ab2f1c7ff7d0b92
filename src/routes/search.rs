use axum::{extract::State, response::Json};
use uuid::Uuid;
use validator::Validate;

use crate::dto::search_dto::{JobSearchRequest, JobSearchResponse};
use crate::models::chat::Message;
use crate::AppState;

/// Single-shot variant of the search pipeline, for clients that cannot
/// hold a socket open. Runs the same pipeline and persists the exchange
/// under the supplied (or a fresh) chat id.
#[axum::debug_handler]
pub async fn search_jobs(
    State(state): State<AppState>,
    Json(request): Json<JobSearchRequest>,
) -> crate::error::Result<Json<JobSearchResponse>> {
    request.validate()?;

    let outcome = state
        .search
        .run(&request.message, request.language.as_deref())
        .await?;

    // A supplied chat id must belong to the requesting user.
    let chat_id = match request.chat_id {
        Some(chat_id) => {
            if let Some(chat) = state.store.load_chat(&chat_id).await? {
                if chat.user_id != request.user_id {
                    return Err(crate::error::Error::BadRequest(format!(
                        "chat {} belongs to another user",
                        chat_id
                    )));
                }
            }
            chat_id
        }
        None => Uuid::new_v4().to_string(),
    };
    let user_message = Message::user(request.message.clone());
    let bot_message = Message::bot(outcome.response.clone(), Some(outcome.matched.clone()));
    state
        .store
        .append_exchange(&chat_id, &request.user_id, &user_message, &bot_message)
        .await?;

    Ok(Json(JobSearchResponse {
        response: outcome.response,
        jobs: outcome.jobs,
        matched_jobs: outcome.matched,
        requirements_extracted: outcome.criteria,
        total_jobs_found: outcome.total_jobs_found,
        total_matched_jobs: outcome.total_matched_jobs,
        source_errors: outcome.source_errors,
    }))
}
