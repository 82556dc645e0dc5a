use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Role};

/// Socket events from client to server. A closed enum so every event kind
/// carries exactly its own fields and dispatch is an exhaustive match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    Join {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    Leave {
        conversation_id: Uuid,
    },
    Send {
        conversation_id: Uuid,
        user_id: Uuid,
        role: Role,
        body: String,
    },
    MarkRead {
        conversation_id: Uuid,
        message_id: Uuid,
    },
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    StopTyping {
        conversation_id: Uuid,
        user_id: Uuid,
    },
}

/// Socket events from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    MessageReceived {
        message: Message,
    },
    MessageRead {
        message_id: Uuid,
    },
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    StopTyping {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    /// Error acknowledgment for a failed send, delivered only to the
    /// socket that attempted it. Never broadcast.
    SendRejected {
        conversation_id: Uuid,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_use_tagged_camel_case_wire_names() {
        let ev = ClientEvent::MarkRead {
            conversation_id: Uuid::nil(),
            message_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "markRead");
        assert!(json.get("conversationId").is_some());
        assert!(json.get("messageId").is_some());

        let parsed: ClientEvent = serde_json::from_str(
            r#"{"type":"stopTyping","conversationId":"00000000-0000-0000-0000-000000000000","userId":"00000000-0000-0000-0000-000000000000"}"#,
        )
        .unwrap();
        assert!(matches!(parsed, ClientEvent::StopTyping { .. }));
    }

    #[test]
    fn unknown_event_kinds_fail_to_parse() {
        let err = serde_json::from_str::<ClientEvent>(r#"{"type":"deleteMessage"}"#);
        assert!(err.is_err());
    }
}
