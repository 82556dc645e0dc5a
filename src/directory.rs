use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    AppError, AppResult,
    models::{Conversation, ConversationSummary, Party, Role},
    store,
};

type ConversationRow = (String, String, String, DateTime<Utc>, DateTime<Utc>);

fn from_row(
    (id, therapist_id, patient_id, created_at, updated_at): ConversationRow,
) -> AppResult<Conversation> {
    Ok(Conversation {
        id: Uuid::parse_str(&id).map_err(|e| AppError::Persistence(e.to_string()))?,
        therapist_id: Uuid::parse_str(&therapist_id)
            .map_err(|e| AppError::Persistence(e.to_string()))?,
        patient_id: Uuid::parse_str(&patient_id)
            .map_err(|e| AppError::Persistence(e.to_string()))?,
        created_at,
        updated_at,
    })
}

/// Idempotent upsert on the (therapist_id, patient_id) unique index. The
/// index arbitrates concurrent calls, so there is no check-then-insert
/// window and never a duplicate pair.
pub async fn get_or_create(
    pool: &SqlitePool,
    therapist_id: Uuid,
    patient_id: Uuid,
) -> AppResult<Conversation> {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO conversations (id, therapist_id, patient_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (therapist_id, patient_id) DO NOTHING",
    )
    .bind(Uuid::now_v7().to_string())
    .bind(therapist_id.to_string())
    .bind(patient_id.to_string())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let row: ConversationRow = sqlx::query_as(
        "SELECT id, therapist_id, patient_id, created_at, updated_at
         FROM conversations WHERE therapist_id = ? AND patient_id = ?",
    )
    .bind(therapist_id.to_string())
    .bind(patient_id.to_string())
    .fetch_one(pool)
    .await?;

    from_row(row)
}

pub async fn fetch(pool: &SqlitePool, conversation_id: Uuid) -> AppResult<Conversation> {
    let row: Option<ConversationRow> = sqlx::query_as(
        "SELECT id, therapist_id, patient_id, created_at, updated_at
         FROM conversations WHERE id = ?",
    )
    .bind(conversation_id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => from_row(row),
        None => Err(AppError::NotFound(format!("conversation {conversation_id}"))),
    }
}

/// Last-writer-wins activity bump on new messages.
pub async fn touch(pool: &SqlitePool, conversation_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
    sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
        .bind(at)
        .bind(conversation_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Therapists get one conversation per currently-assigned patient, patients
/// get zero or one with their assigned therapist. Both sides are created on
/// demand.
pub async fn list_for_user(
    pool: &SqlitePool,
    user_id: Uuid,
    role: Role,
) -> AppResult<Vec<Conversation>> {
    match role {
        Role::Therapist => {
            let patients: Vec<(String,)> =
                sqlx::query_as("SELECT id FROM users WHERE therapist_id = ?")
                    .bind(user_id.to_string())
                    .fetch_all(pool)
                    .await?;

            let mut conversations = Vec::with_capacity(patients.len());
            for (patient_id,) in patients {
                let patient_id = Uuid::parse_str(&patient_id)
                    .map_err(|e| AppError::Persistence(e.to_string()))?;
                conversations.push(get_or_create(pool, user_id, patient_id).await?);
            }
            Ok(conversations)
        }
        Role::Patient => {
            let row: Option<(Option<String>,)> =
                sqlx::query_as("SELECT therapist_id FROM users WHERE id = ?")
                    .bind(user_id.to_string())
                    .fetch_optional(pool)
                    .await?;

            match row {
                Some((Some(therapist_id),)) => {
                    let therapist_id = Uuid::parse_str(&therapist_id)
                        .map_err(|e| AppError::Persistence(e.to_string()))?;
                    Ok(vec![get_or_create(pool, therapist_id, user_id).await?])
                }
                _ => Ok(Vec::new()),
            }
        }
    }
}

/// The assignment rule: a patient may only address their currently-assigned
/// therapist, a therapist only a patient assigned to them. Returns the
/// (therapist, patient) pair on success so callers can upsert directly.
pub async fn authorize_pair(
    pool: &SqlitePool,
    viewer_id: Uuid,
    viewer_role: Role,
    other_id: Uuid,
) -> AppResult<(Uuid, Uuid)> {
    let other: Option<(String, Option<String>)> =
        sqlx::query_as("SELECT role, therapist_id FROM users WHERE id = ?")
            .bind(other_id.to_string())
            .fetch_optional(pool)
            .await?;

    let Some((other_role, other_therapist)) = other else {
        return Err(AppError::NotFound(format!("user {other_id}")));
    };

    match viewer_role {
        Role::Patient => {
            let assigned: Option<(Option<String>,)> =
                sqlx::query_as("SELECT therapist_id FROM users WHERE id = ?")
                    .bind(viewer_id.to_string())
                    .fetch_optional(pool)
                    .await?;

            match assigned {
                Some((Some(assigned),))
                    if Role::parse(&other_role)? == Role::Therapist
                        && assigned == other_id.to_string() =>
                {
                    Ok((other_id, viewer_id))
                }
                _ => Err(AppError::Forbidden),
            }
        }
        Role::Therapist => {
            if Role::parse(&other_role)? == Role::Patient
                && other_therapist == Some(viewer_id.to_string())
            {
                Ok((viewer_id, other_id))
            } else {
                Err(AppError::Forbidden)
            }
        }
    }
}

pub async fn party(pool: &SqlitePool, user_id: Uuid) -> AppResult<Party> {
    let row: Option<(String, Option<String>)> =
        sqlx::query_as("SELECT name, avatar FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_optional(pool)
            .await?;

    let Some((name, avatar)) = row else {
        return Err(AppError::NotFound(format!("user {user_id}")));
    };

    Ok(Party { id: user_id, name, avatar })
}

/// Builds the conversation-list entry one viewer sees for one conversation.
pub async fn summarize(
    pool: &SqlitePool,
    conversation: &Conversation,
    viewer_id: Uuid,
) -> AppResult<ConversationSummary> {
    let other_party = party(pool, conversation.other_party_id(viewer_id)).await?;
    let last_message = store::last_message_body(pool, conversation.id).await?;
    let unread_count = store::count_unread(pool, conversation.id, viewer_id).await?;

    Ok(ConversationSummary {
        id: conversation.id,
        other_party,
        last_message,
        unread_count,
        created_at: conversation.created_at,
        updated_at: conversation.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn seed_user(pool: &SqlitePool, role: Role, therapist: Option<Uuid>) -> Uuid {
        let id = Uuid::now_v7();
        sqlx::query("INSERT INTO users (id, name, avatar, role, therapist_id) VALUES (?, ?, NULL, ?, ?)")
            .bind(id.to_string())
            .bind(format!("{} {}", role.as_str(), id))
            .bind(role.as_str())
            .bind(therapist.map(|t| t.to_string()))
            .execute(pool)
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let pool = db::test_pool().await;
        let therapist = Uuid::now_v7();
        let patient = Uuid::now_v7();

        let a = get_or_create(&pool, therapist, patient).await.unwrap();
        let b = get_or_create(&pool, therapist, patient).await.unwrap();
        assert_eq!(a.id, b.id);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn concurrent_get_or_create_never_duplicates() {
        let pool = db::test_pool().await;
        let therapist = Uuid::now_v7();
        let patient = Uuid::now_v7();

        let (a, b, c) = tokio::join!(
            get_or_create(&pool, therapist, patient),
            get_or_create(&pool, therapist, patient),
            get_or_create(&pool, therapist, patient),
        );
        let a = a.unwrap();
        assert_eq!(a.id, b.unwrap().id);
        assert_eq!(a.id, c.unwrap().id);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn unassigned_pairing_is_forbidden_and_creates_nothing() {
        let pool = db::test_pool().await;
        let their_therapist = seed_user(&pool, Role::Therapist, None).await;
        let someone_else = seed_user(&pool, Role::Therapist, None).await;
        let patient = seed_user(&pool, Role::Patient, Some(their_therapist)).await;

        assert!(matches!(
            authorize_pair(&pool, patient, Role::Patient, someone_else).await,
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            authorize_pair(&pool, someone_else, Role::Therapist, patient).await,
            Err(AppError::Forbidden)
        ));

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);

        // the assigned pair passes in both directions
        assert_eq!(
            authorize_pair(&pool, patient, Role::Patient, their_therapist).await.unwrap(),
            (their_therapist, patient)
        );
        assert_eq!(
            authorize_pair(&pool, their_therapist, Role::Therapist, patient).await.unwrap(),
            (their_therapist, patient)
        );
    }

    #[tokio::test]
    async fn listing_creates_on_demand_per_assignment() {
        let pool = db::test_pool().await;
        let therapist = seed_user(&pool, Role::Therapist, None).await;
        let p1 = seed_user(&pool, Role::Patient, Some(therapist)).await;
        let _p2 = seed_user(&pool, Role::Patient, Some(therapist)).await;
        let unassigned = seed_user(&pool, Role::Patient, None).await;

        let mine = list_for_user(&pool, therapist, Role::Therapist).await.unwrap();
        assert_eq!(mine.len(), 2);

        let p1_list = list_for_user(&pool, p1, Role::Patient).await.unwrap();
        assert_eq!(p1_list.len(), 1);
        assert!(mine.iter().any(|c| c.id == p1_list[0].id));

        assert!(list_for_user(&pool, unassigned, Role::Patient).await.unwrap().is_empty());
    }
}
