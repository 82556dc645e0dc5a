use tower_sessions::Session;
use uuid::Uuid;

use crate::{AppError, AppResult, models::Role};

// Written by the platform's auth flow at login; the engine only reads them.
pub const USER_ID: &str = "user_id";
pub const USER_ROLE: &str = "user_role";

#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
}

pub async fn current_user(session: &Session) -> AppResult<Option<Identity>> {
    let Some(user_id) = session.get::<String>(USER_ID).await? else {
        return Ok(None);
    };
    let Some(role) = session.get::<String>(USER_ROLE).await? else {
        return Ok(None);
    };

    let user_id = Uuid::parse_str(&user_id)
        .map_err(|_| AppError::InvalidInput(format!("bad session user id: {user_id}")))?;

    Ok(Some(Identity {
        user_id,
        role: Role::parse(&role)?,
    }))
}

/// Rejects with 401 before any engine logic runs.
pub async fn require_user(session: &Session) -> AppResult<Identity> {
    current_user(session).await?.ok_or(AppError::Unauthenticated)
}
