use crate::models::job::ScoredJob;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Ranked results attached to bot replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<Vec<ScoredJob>>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: Sender::User,
            content: content.into(),
            timestamp: Utc::now(),
            jobs: None,
        }
    }

    pub fn bot(content: impl Into<String>, jobs: Option<Vec<ScoredJob>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: Sender::Bot,
            content: content.into(),
            timestamp: Utc::now(),
            jobs,
        }
    }
}

/// A resumable conversation. The chat id never changes after first
/// assignment; messages are append-only in acceptance order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub chat_id: String,
    pub user_id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(chat_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
            created_at: now,
            last_active_at: now,
        }
    }
}
