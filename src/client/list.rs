use std::time::Duration;

use uuid::Uuid;

use crate::{
    AppResult,
    models::{ConversationSummary, sort_summaries},
};

use super::ChatApi;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Conversation list state: ordered entries with unread badges, refreshed
/// by polling (the hub does not push conversation-level summaries). A
/// failed poll keeps the previous entries on screen and sets the retry
/// flag instead of blanking the list.
pub struct ConversationList<A: ChatApi> {
    api: A,
    entries: Vec<ConversationSummary>,
    needs_retry: bool,
    poll_interval: Duration,
}

impl<A: ChatApi> ConversationList<A> {
    pub fn new(api: A) -> Self {
        Self::with_interval(api, DEFAULT_POLL_INTERVAL)
    }

    /// Interval override, typically `Config::poll_interval_secs`.
    pub fn with_interval(api: A, poll_interval: Duration) -> Self {
        Self {
            api,
            entries: Vec::new(),
            needs_retry: false,
            poll_interval,
        }
    }

    /// How long the driving loop should sleep between polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub async fn poll(&mut self) -> AppResult<()> {
        match self.api.list_conversations().await {
            Ok(mut entries) => {
                sort_summaries(&mut entries);
                self.entries = entries;
                self.needs_retry = false;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%err, "conversation list poll failed");
                self.needs_retry = true;
                Err(err)
            }
        }
    }

    /// Opening a thread clears its badge locally and re-sorts right away,
    /// without waiting for the next poll to observe the read transition.
    pub fn select(&mut self, conversation_id: Uuid) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == conversation_id) {
            entry.unread_count = 0;
            sort_summaries(&mut self.entries);
        }
    }

    pub fn entries(&self) -> &[ConversationSummary] {
        &self.entries
    }

    pub fn needs_retry(&self) -> bool {
        self.needs_retry
    }
}
