use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppError, AppResult};

/// Which side of the pairing a user is on. Anything else in the users table
/// is rejected at the parse boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Therapist,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Therapist => "therapist",
        }
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw {
            "patient" => Ok(Role::Patient),
            "therapist" => Ok(Role::Therapist),
            other => Err(AppError::InvalidInput(format!("invalid role: {other}"))),
        }
    }
}

/// The persistent pairing of one patient and one therapist.
/// Exactly one row exists per (therapist_id, patient_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub therapist_id: Uuid,
    pub patient_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn participant(&self, user_id: Uuid) -> bool {
        self.therapist_id == user_id || self.patient_id == user_id
    }

    /// The participant opposite `viewer_id`.
    pub fn other_party_id(&self, viewer_id: Uuid) -> Uuid {
        if viewer_id == self.therapist_id {
            self.patient_id
        } else {
            self.therapist_id
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: Role,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    pub id: Uuid,
    pub name: String,
    pub avatar: Option<String>,
}

/// One entry of the conversation list, computed for a specific viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: Uuid,
    pub other_party: Party,
    pub last_message: Option<String>,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Conversation list ordering, shared by the server route and the
/// conversation list client: threads with unread messages first
/// (most unread on top), everything else by latest activity.
pub fn sort_summaries(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|a, b| {
        let a_unread = a.unread_count > 0;
        let b_unread = b.unread_count > 0;
        b_unread
            .cmp(&a_unread)
            .then(b.unread_count.cmp(&a.unread_count))
            .then(b.updated_at.cmp(&a.updated_at))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn summary(unread: i64, age_secs: i64) -> ConversationSummary {
        ConversationSummary {
            id: Uuid::now_v7(),
            other_party: Party {
                id: Uuid::now_v7(),
                name: "x".to_owned(),
                avatar: None,
            },
            last_message: None,
            unread_count: unread,
            created_at: Utc::now(),
            updated_at: Utc::now() - TimeDelta::seconds(age_secs),
        }
    }

    #[test]
    fn unread_threads_sort_first_by_count_then_activity() {
        let mut list = vec![summary(0, 10), summary(2, 500), summary(5, 900), summary(0, 5)];
        sort_summaries(&mut list);

        assert_eq!(list[0].unread_count, 5);
        assert_eq!(list[1].unread_count, 2);
        // zero-unread remainder by updated_at descending
        assert!(list[2].updated_at > list[3].updated_at);
    }

    #[test]
    fn role_parse_round_trips_and_rejects_garbage() {
        assert_eq!(Role::parse("patient").unwrap(), Role::Patient);
        assert_eq!(Role::parse(Role::Therapist.as_str()).unwrap(), Role::Therapist);
        assert!(Role::parse("admin").is_err());
    }
}
