use std::collections::HashSet;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::{
    AppResult,
    hub::{ClientEvent, ServerEvent},
    models::{Message, Role},
};

use super::{ChatApi, ChatSocket};

/// How long after the last keystroke the stop-typing event fires.
pub const TYPING_IDLE: Duration = Duration::from_secs(2);

/// Sender-side typing expiry. `typing` goes out on every keystroke; one
/// `stopTyping` goes out once the keyboard has been quiet for the window.
/// Deterministic on purpose: callers pass the clock in.
#[derive(Debug, Default)]
pub struct TypingDebounce {
    last_keystroke: Option<Instant>,
}

impl TypingDebounce {
    pub fn keystroke(&mut self, now: Instant) {
        self.last_keystroke = Some(now);
    }

    /// True exactly once per quiet period.
    pub fn should_stop(&mut self, now: Instant) -> bool {
        match self.last_keystroke {
            Some(at) if now.duration_since(at) >= TYPING_IDLE => {
                self.last_keystroke = None;
                true
            }
            _ => false,
        }
    }
}

/// One open conversation: the local timeline plus typing and send state.
/// Messages are appended only on confirmed receipt (socket echo, REST
/// response, or history load), never optimistically.
pub struct ChatWindow<S: ChatSocket, A: ChatApi> {
    conversation_id: Uuid,
    user_id: Uuid,
    role: Role,
    socket: S,
    api: A,
    messages: Vec<Message>,
    seen: HashSet<Uuid>,
    peer_typing: bool,
    last_send_error: Option<String>,
    debounce: TypingDebounce,
}

impl<S: ChatSocket, A: ChatApi> ChatWindow<S, A> {
    pub fn new(conversation_id: Uuid, user_id: Uuid, role: Role, socket: S, api: A) -> Self {
        Self {
            conversation_id,
            user_id,
            role,
            socket,
            api,
            messages: Vec::new(),
            seen: HashSet::new(),
            peer_typing: false,
            last_send_error: None,
            debounce: TypingDebounce::default(),
        }
    }

    /// Mount: join the room, then bulk-load history over REST. Live deltas
    /// arrive through `apply`.
    pub async fn open(&mut self) -> AppResult<()> {
        if self.socket.is_connected() {
            self.socket
                .emit(ClientEvent::Join {
                    conversation_id: self.conversation_id,
                    user_id: self.user_id,
                })
                .await?;
        }
        self.load_history().await
    }

    /// Reconnect repair: re-join the room and re-fetch history. Anything
    /// missed while disconnected comes back here; anything already present
    /// is dropped by the id filter.
    pub async fn resync(&mut self) -> AppResult<()> {
        self.open().await
    }

    async fn load_history(&mut self) -> AppResult<()> {
        let history = self.api.fetch_messages(self.conversation_id).await?;
        for message in history {
            self.insert(message);
        }
        Ok(())
    }

    /// Appends unless this id is already on the timeline. A message can
    /// legitimately show up twice (REST load + socket replay after a
    /// reconnect); it must render once.
    fn insert(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| (m.created_at, m.id) <= (message.created_at, message.id));
        self.messages.insert(at, message);
        true
    }

    pub fn apply(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::MessageReceived { message } => {
                self.insert(message);
            }
            ServerEvent::MessageRead { message_id } => {
                if let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) {
                    message.read = true;
                }
            }
            ServerEvent::Typing { user_id, .. } => {
                if user_id != self.user_id {
                    self.peer_typing = true;
                }
            }
            ServerEvent::StopTyping { user_id, .. } => {
                if user_id != self.user_id {
                    self.peer_typing = false;
                }
            }
            ServerEvent::SendRejected { reason, .. } => {
                self.last_send_error = Some(reason);
            }
        }
    }

    /// Socket when connected, REST when not. The socket path appends via
    /// the echoed broadcast; the REST path appends the response directly
    /// because no broadcast will reach a disconnected socket.
    pub async fn send(&mut self, body: &str) -> AppResult<()> {
        self.last_send_error = None;

        if self.socket.is_connected() {
            self.socket
                .emit(ClientEvent::Send {
                    conversation_id: self.conversation_id,
                    user_id: self.user_id,
                    role: self.role,
                    body: body.to_owned(),
                })
                .await
        } else {
            let message = self.api.post_message(self.conversation_id, body).await?;
            self.insert(message);
            Ok(())
        }
    }

    pub async fn mark_read(&mut self, message_id: Uuid) -> AppResult<()> {
        self.socket
            .emit(ClientEvent::MarkRead {
                conversation_id: self.conversation_id,
                message_id,
            })
            .await
    }

    pub async fn keystroke(&mut self, now: Instant) -> AppResult<()> {
        self.debounce.keystroke(now);
        if self.socket.is_connected() {
            self.socket
                .emit(ClientEvent::Typing {
                    conversation_id: self.conversation_id,
                    user_id: self.user_id,
                })
                .await?;
        }
        Ok(())
    }

    /// Call periodically (or on a timer reset by keystrokes); emits the
    /// stop-typing event once the idle window elapses.
    pub async fn tick(&mut self, now: Instant) -> AppResult<()> {
        if self.debounce.should_stop(now) && self.socket.is_connected() {
            self.socket
                .emit(ClientEvent::StopTyping {
                    conversation_id: self.conversation_id,
                    user_id: self.user_id,
                })
                .await?;
        }
        Ok(())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn peer_typing(&self) -> bool {
        self.peer_typing
    }

    pub fn last_send_error(&self) -> Option<&str> {
        self.last_send_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;

    struct DeadSocket;

    #[async_trait]
    impl ChatSocket for DeadSocket {
        fn is_connected(&self) -> bool {
            false
        }
        async fn emit(&self, _event: ClientEvent) -> AppResult<()> {
            Err(crate::AppError::Transport("socket closed".to_owned()))
        }
    }

    struct EmptyApi;

    #[async_trait]
    impl ChatApi for EmptyApi {
        async fn list_conversations(&self) -> AppResult<Vec<crate::models::ConversationSummary>> {
            Ok(Vec::new())
        }
        async fn fetch_messages(&self, _c: Uuid) -> AppResult<Vec<Message>> {
            Ok(Vec::new())
        }
        async fn post_message(&self, _c: Uuid, _b: &str) -> AppResult<Message> {
            unimplemented!("not used in these tests")
        }
    }

    fn message(conversation_id: Uuid, sender_id: Uuid) -> Message {
        Message {
            id: Uuid::now_v7(),
            conversation_id,
            sender_id,
            sender_role: Role::Patient,
            body: "hi".to_owned(),
            read: false,
            created_at: Utc::now(),
        }
    }

    fn window() -> ChatWindow<DeadSocket, EmptyApi> {
        ChatWindow::new(Uuid::now_v7(), Uuid::now_v7(), Role::Therapist, DeadSocket, EmptyApi)
    }

    #[tokio::test]
    async fn duplicate_message_ids_render_once() {
        let mut w = window();
        let m = message(Uuid::now_v7(), Uuid::now_v7());

        w.apply(ServerEvent::MessageReceived { message: m.clone() });
        w.apply(ServerEvent::MessageReceived { message: m.clone() });
        assert_eq!(w.messages().len(), 1);

        w.apply(ServerEvent::MessageRead { message_id: m.id });
        assert!(w.messages()[0].read);
    }

    #[tokio::test]
    async fn typing_indicator_follows_the_other_participant_only() {
        let mut w = window();
        let peer = Uuid::now_v7();
        let conv = Uuid::now_v7();

        w.apply(ServerEvent::Typing { conversation_id: conv, user_id: peer });
        assert!(w.peer_typing());

        w.apply(ServerEvent::StopTyping { conversation_id: conv, user_id: peer });
        assert!(!w.peer_typing());
    }

    #[test]
    fn debounce_fires_stop_once_after_two_quiet_seconds() {
        let mut d = TypingDebounce::default();
        let t0 = Instant::now();

        d.keystroke(t0);
        assert!(!d.should_stop(t0 + Duration::from_millis(1500)));

        // keystroke resets the idle window
        d.keystroke(t0 + Duration::from_millis(1500));
        assert!(!d.should_stop(t0 + Duration::from_millis(3000)));
        assert!(d.should_stop(t0 + Duration::from_millis(3500)));

        // quiet period already consumed
        assert!(!d.should_stop(t0 + Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn send_rejection_is_recorded_not_appended() {
        let mut w = window();
        w.apply(ServerEvent::SendRejected {
            conversation_id: Uuid::now_v7(),
            reason: "message not sent".to_owned(),
        });
        assert_eq!(w.last_send_error(), Some("message not sent"));
        assert!(w.messages().is_empty());
    }
}
