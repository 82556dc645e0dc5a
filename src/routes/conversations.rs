use axum::{Json, debug_handler, extract::State};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    AppError, AppResult, directory,
    models::{Conversation, ConversationSummary, sort_summaries},
    session,
};

#[debug_handler]
pub(crate) async fn list(
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    let who = session::require_user(&session).await?;

    let conversations = directory::list_for_user(&db_pool, who.user_id, who.role).await?;
    let mut summaries = Vec::with_capacity(conversations.len());
    for conversation in &conversations {
        summaries.push(directory::summarize(&db_pool, conversation, who.user_id).await?);
    }
    sort_summaries(&mut summaries);

    Ok(Json(summaries))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateConversation {
    other_party_id: Option<String>,
}

#[debug_handler]
pub(crate) async fn create(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(body): Json<CreateConversation>,
) -> AppResult<Json<Conversation>> {
    let who = session::require_user(&session).await?;

    let other = body
        .other_party_id
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| AppError::InvalidInput("otherPartyId is required".to_owned()))?;
    let other = Uuid::parse_str(&other)
        .map_err(|_| AppError::InvalidInput(format!("bad otherPartyId: {other}")))?;

    let (therapist_id, patient_id) =
        directory::authorize_pair(&db_pool, who.user_id, who.role, other).await?;
    let conversation = directory::get_or_create(&db_pool, therapist_id, patient_id).await?;

    Ok(Json(conversation))
}
