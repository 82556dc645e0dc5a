use crate::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_minutes: i64,
    /// Conversation-list poll cadence, handed to `ConversationList`.
    pub poll_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        let database_url = dotenv::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL is not set".to_owned()))?;

        let bind_addr = dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());

        let session_ttl_minutes = match dotenv::var("SESSION_TTL_MINUTES") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| AppError::Config(format!("bad SESSION_TTL_MINUTES: {raw}")))?,
            Err(_) => 5,
        };

        let poll_interval_secs = match dotenv::var("POLL_INTERVAL_SECS") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| AppError::Config(format!("bad POLL_INTERVAL_SECS: {raw}")))?,
            Err(_) => 5,
        };

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_minutes,
            poll_interval_secs,
        })
    }
}
