use axum::{
    Json, debug_handler,
    extract::{Query, State},
};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{AppError, AppResult, Hub, directory, models::Message, session, store};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HistoryQuery {
    conversation_id: Uuid,
}

#[debug_handler]
pub(crate) async fn history(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Query(HistoryQuery { conversation_id }): Query<HistoryQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let who = session::require_user(&session).await?;

    let conversation = directory::fetch(&db_pool, conversation_id).await?;
    if !conversation.participant(who.user_id) {
        return Err(AppError::Forbidden);
    }

    Ok(Json(store::list(&db_pool, conversation_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendMessage {
    conversation_id: Uuid,
    body: String,
}

/// The REST fallback send. Runs through the hub so persistence, the
/// activity bump, per-room ordering, fan-out, and the participant check
/// match the socket path; the created message comes back in the response
/// because no broadcast can reach the disconnected sender.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn send(
    State(hub): State<Hub>,
    session: Session,
    Json(SendMessage { conversation_id, body }): Json<SendMessage>,
) -> AppResult<Json<Message>> {
    let who = session::require_user(&session).await?;

    let message = hub.send(conversation_id, who.user_id, who.role, &body).await?;
    Ok(Json(message))
}
