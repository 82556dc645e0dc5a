mod conversations;
mod messages;
mod ws;

use axum::{Router, routing::get};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/conversations",
            get(conversations::list).post(conversations::create),
        )
        .route("/messages", get(messages::history).post(messages::send))
        .route("/ws", get(ws::chat_ws))
}
