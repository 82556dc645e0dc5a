use std::collections::HashMap;

use axum::{
    debug_handler,
    extract::{State, WebSocketUpgrade, ws::WebSocket},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::unbounded_channel;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    AppError, AppResult, Hub,
    hub::{ClientEvent, ServerEvent, SubscriberId},
    session::{self, Identity},
};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn chat_ws(
    State(hub): State<Hub>,
    session: Session,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    // rejected before the upgrade; the hub never sees unauthenticated sockets
    let who = session::require_user(&session).await?;

    Ok(ws.on_upgrade(async move |stream| socket_loop(stream, hub, who).await))
}

async fn socket_loop(stream: WebSocket, hub: Hub, who: Identity) {
    let (mut sink, mut receiver) = stream.split();
    let (tx, mut rx) = unbounded_channel::<ServerEvent>();

    // one forward task drains every joined room into the wire
    let forward = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(json.into()).await.is_err() {
                break;
            }
        }
    });

    let mut joined: HashMap<Uuid, SubscriberId> = HashMap::new();

    while let Some(Ok(frame)) = receiver.next().await {
        let Ok(event) = serde_json::from_slice::<ClientEvent>(&frame.into_data()) else {
            tracing::debug!(user_id = %who.user_id, "skipping unparseable frame");
            continue;
        };

        match event {
            ClientEvent::Join { conversation_id, user_id } => {
                if user_id != who.user_id {
                    continue;
                }
                if !joined.contains_key(&conversation_id) {
                    let id = hub.join(conversation_id, who.user_id, tx.clone()).await;
                    joined.insert(conversation_id, id);
                }
            }
            ClientEvent::Leave { conversation_id } => {
                if let Some(id) = joined.remove(&conversation_id) {
                    hub.leave(conversation_id, id).await;
                }
            }
            ClientEvent::Send { conversation_id, user_id, role, body } => {
                if user_id != who.user_id || role != who.role {
                    continue;
                }
                match hub.send(conversation_id, who.user_id, who.role, &body).await {
                    Ok(_) => {}
                    // empty body: dropped, logged, no ack and no broadcast
                    Err(AppError::InvalidInput(reason)) => {
                        tracing::debug!(%conversation_id, %reason, "dropped send");
                    }
                    // persistence failure: acknowledged only to this socket
                    Err(err) => {
                        let _ = tx.send(ServerEvent::SendRejected {
                            conversation_id,
                            reason: err.to_string(),
                        });
                    }
                }
            }
            ClientEvent::MarkRead { conversation_id, message_id } => {
                if let Err(err) = hub.mark_read(conversation_id, message_id, who.user_id).await {
                    tracing::warn!(%conversation_id, %message_id, %err, "markRead rejected");
                }
            }
            ClientEvent::Typing { conversation_id, user_id } => {
                if user_id == who.user_id {
                    hub.typing(conversation_id, who.user_id).await;
                }
            }
            ClientEvent::StopTyping { conversation_id, user_id } => {
                if user_id == who.user_id {
                    hub.stop_typing(conversation_id, who.user_id).await;
                }
            }
        }
    }

    // socket gone: membership is transient, the client re-joins on reconnect
    for (conversation_id, id) in joined {
        hub.leave(conversation_id, id).await;
    }
    forward.abort();
}
