use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    AppError, AppResult,
    models::{Message, Role},
};

type MessageRow = (String, String, String, String, String, bool, DateTime<Utc>);

fn from_row(
    (id, conversation_id, sender_id, sender_role, body, read, created_at): MessageRow,
) -> AppResult<Message> {
    Ok(Message {
        id: Uuid::parse_str(&id).map_err(|e| AppError::Persistence(e.to_string()))?,
        conversation_id: Uuid::parse_str(&conversation_id)
            .map_err(|e| AppError::Persistence(e.to_string()))?,
        sender_id: Uuid::parse_str(&sender_id).map_err(|e| AppError::Persistence(e.to_string()))?,
        sender_role: Role::parse(&sender_role)?,
        body,
        read,
        created_at,
    })
}

pub async fn create(
    pool: &SqlitePool,
    conversation_id: Uuid,
    sender_id: Uuid,
    sender_role: Role,
    body: &str,
) -> AppResult<Message> {
    let message = Message {
        id: Uuid::now_v7(),
        conversation_id,
        sender_id,
        sender_role,
        body: body.to_owned(),
        read: false,
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO messages (id, conversation_id, sender_id, sender_role, body, read, created_at)
         VALUES (?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(message.id.to_string())
    .bind(conversation_id.to_string())
    .bind(sender_id.to_string())
    .bind(sender_role.as_str())
    .bind(&message.body)
    .bind(message.created_at)
    .execute(pool)
    .await?;

    Ok(message)
}

/// Full history for one conversation, oldest first. Uuid v7 ids break
/// ties between messages created within the same timestamp.
pub async fn list(pool: &SqlitePool, conversation_id: Uuid) -> AppResult<Vec<Message>> {
    let rows: Vec<MessageRow> = sqlx::query_as(
        "SELECT id, conversation_id, sender_id, sender_role, body, read, created_at
         FROM messages WHERE conversation_id = ?
         ORDER BY created_at ASC, id ASC",
    )
    .bind(conversation_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(from_row).collect()
}

/// Flips read to true for one message. The reader must not be the sender,
/// and the message must belong to the given conversation. Returns whether
/// the flag actually flipped (false means it was already read).
pub async fn mark_read(
    pool: &SqlitePool,
    conversation_id: Uuid,
    message_id: Uuid,
    reader_id: Uuid,
) -> AppResult<bool> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT sender_id FROM messages WHERE id = ? AND conversation_id = ?")
            .bind(message_id.to_string())
            .bind(conversation_id.to_string())
            .fetch_optional(pool)
            .await?;

    let Some((sender_id,)) = row else {
        return Err(AppError::NotFound(format!("message {message_id}")));
    };

    if sender_id == reader_id.to_string() {
        return Err(AppError::InvalidInput(
            "cannot mark own message as read".to_owned(),
        ));
    }

    // The read = 0 guard is what makes the transition one-way.
    let result = sqlx::query(
        "UPDATE messages SET read = 1
         WHERE id = ? AND conversation_id = ? AND sender_id <> ? AND read = 0",
    )
    .bind(message_id.to_string())
    .bind(conversation_id.to_string())
    .bind(reader_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Unread for one viewer: messages they did not send and have not read.
/// Always recomputed; never kept as a counter.
pub async fn count_unread(
    pool: &SqlitePool,
    conversation_id: Uuid,
    viewer_id: Uuid,
) -> AppResult<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM messages
         WHERE conversation_id = ? AND sender_id <> ? AND read = 0",
    )
    .bind(conversation_id.to_string())
    .bind(viewer_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count)
}

pub async fn last_message_body(
    pool: &SqlitePool,
    conversation_id: Uuid,
) -> AppResult<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT body FROM messages WHERE conversation_id = ?
         ORDER BY created_at DESC, id DESC LIMIT 1",
    )
    .bind(conversation_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(body,)| body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rand::Rng;

    #[tokio::test]
    async fn unread_counts_skip_own_and_read_messages() {
        let pool = db::test_pool().await;
        let conversation = Uuid::now_v7();
        let patient = Uuid::now_v7();
        let therapist = Uuid::now_v7();

        create(&pool, conversation, patient, Role::Patient, "hola").await.unwrap();
        create(&pool, conversation, patient, Role::Patient, "are you there?").await.unwrap();
        let own = create(&pool, conversation, therapist, Role::Therapist, "yes").await.unwrap();

        // own outgoing message never counts as unread for its sender
        assert_eq!(count_unread(&pool, conversation, therapist).await.unwrap(), 2);
        assert_eq!(count_unread(&pool, conversation, patient).await.unwrap(), 1);

        assert!(mark_read(&pool, conversation, own.id, patient).await.unwrap());
        assert_eq!(count_unread(&pool, conversation, patient).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mark_read_rejects_sender_and_wrong_conversation() {
        let pool = db::test_pool().await;
        let conversation = Uuid::now_v7();
        let patient = Uuid::now_v7();
        let therapist = Uuid::now_v7();

        let m = create(&pool, conversation, patient, Role::Patient, "hey").await.unwrap();

        assert!(matches!(
            mark_read(&pool, conversation, m.id, patient).await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            mark_read(&pool, Uuid::now_v7(), m.id, therapist).await,
            Err(AppError::NotFound(_))
        ));

        // first flip succeeds, repeat is a no-op
        assert!(mark_read(&pool, conversation, m.id, therapist).await.unwrap());
        assert!(!mark_read(&pool, conversation, m.id, therapist).await.unwrap());
    }

    #[tokio::test]
    async fn read_flag_never_reverts_under_random_event_sequences() {
        let pool = db::test_pool().await;
        let conversation = Uuid::now_v7();
        let patient = Uuid::now_v7();
        let therapist = Uuid::now_v7();
        let users = [(patient, Role::Patient), (therapist, Role::Therapist)];

        let mut rng = rand::rng();
        let mut ids = Vec::new();
        let mut ever_read = std::collections::HashSet::new();

        for _ in 0..200 {
            if ids.is_empty() || rng.random_bool(0.4) {
                let (sender, role) = users[rng.random_range(0..2)];
                let m = create(&pool, conversation, sender, role, "msg").await.unwrap();
                ids.push(m.id);
            } else {
                let id = ids[rng.random_range(0..ids.len())];
                let (reader, _) = users[rng.random_range(0..2)];
                let _ = mark_read(&pool, conversation, id, reader).await;
            }

            // once observed read, a message must stay read forever after
            for m in list(&pool, conversation).await.unwrap() {
                if ever_read.contains(&m.id) {
                    assert!(m.read, "read flag reverted on {}", m.id);
                } else if m.read {
                    ever_read.insert(m.id);
                }
            }
        }
    }

    #[tokio::test]
    async fn history_is_ascending() {
        let pool = db::test_pool().await;
        let conversation = Uuid::now_v7();
        let sender = Uuid::now_v7();

        for i in 0..5 {
            create(&pool, conversation, sender, Role::Patient, &format!("m{i}")).await.unwrap();
        }

        let history = list(&pool, conversation).await.unwrap();
        assert_eq!(history.len(), 5);
        for pair in history.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
        assert_eq!(history[0].body, "m0");
        assert_eq!(history[4].body, "m4");
    }
}
