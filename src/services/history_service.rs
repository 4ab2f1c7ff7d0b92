use crate::error::{Error, Result};
use crate::models::chat::{ChatSession, Message, Sender};
use crate::models::job::{JobPosting, ScoredJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// The external persistent store, as seen by the session layer. The store
/// is the single writer of durable chat history; callers serialize writes
/// per chat id, the store only appends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persists one accepted exchange (user message + bot reply) as a unit.
    async fn append_exchange(
        &self,
        chat_id: &str,
        user_id: &str,
        user_message: &Message,
        bot_message: &Message,
    ) -> Result<()>;

    async fn load_chat(&self, chat_id: &str) -> Result<Option<ChatSession>>;

    /// Most recently active chats for a user, messages in acceptance order.
    async fn user_chats(&self, user_id: &str, limit: usize) -> Result<Vec<ChatSession>>;

    async fn clear_user_chats(&self, user_id: &str) -> Result<u64>;

    /// Client-driven snapshot save (`save_chat` envelope).
    async fn save_chat(&self, session: &ChatSession) -> Result<()>;

    /// Upserts postings keyed by identity key; returns the number written.
    async fn upsert_postings(&self, postings: &[JobPosting]) -> Result<u64>;
}

#[derive(FromRow)]
struct ChatRow {
    chat_id: String,
    user_id: String,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    sender: String,
    content: String,
    jobs: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> Result<Message> {
        let sender = match self.sender.as_str() {
            "user" => Sender::User,
            "bot" => Sender::Bot,
            other => return Err(Error::Internal(format!("unknown sender '{}'", other))),
        };
        let jobs = match self.jobs {
            Some(value) => Some(serde_json::from_value::<Vec<ScoredJob>>(value)?),
            None => None,
        };
        Ok(Message {
            id: self.id,
            sender,
            content: self.content,
            timestamp: self.created_at,
            jobs,
        })
    }
}

#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_message<'e, E>(executor: E, chat_id: &str, message: &Message) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let sender = match message.sender {
            Sender::User => "user",
            Sender::Bot => "bot",
        };
        let jobs = message
            .jobs
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO messages (id, chat_id, sender, content, jobs, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(message.id)
        .bind(chat_id)
        .bind(sender)
        .bind(&message.content)
        .bind(jobs)
        .bind(message.timestamp)
        .execute(executor)
        .await?;
        Ok(())
    }

    async fn messages_for(&self, chat_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, sender, content, jobs, created_at
            FROM messages
            WHERE chat_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn append_exchange(
        &self,
        chat_id: &str,
        user_id: &str,
        user_message: &Message,
        bot_message: &Message,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chats (chat_id, user_id, created_at, last_active_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (chat_id) DO UPDATE SET last_active_at = NOW()
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        Self::insert_message(&mut *tx, chat_id, user_message).await?;
        Self::insert_message(&mut *tx, chat_id, bot_message).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_chat(&self, chat_id: &str) -> Result<Option<ChatSession>> {
        let row = sqlx::query_as::<_, ChatRow>(
            r#"SELECT chat_id, user_id, created_at, last_active_at FROM chats WHERE chat_id = $1"#,
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let messages = self.messages_for(chat_id).await?;
        Ok(Some(ChatSession {
            chat_id: row.chat_id,
            user_id: row.user_id,
            messages,
            created_at: row.created_at,
            last_active_at: row.last_active_at,
        }))
    }

    async fn user_chats(&self, user_id: &str, limit: usize) -> Result<Vec<ChatSession>> {
        let rows = sqlx::query_as::<_, ChatRow>(
            r#"
            SELECT chat_id, user_id, created_at, last_active_at
            FROM chats
            WHERE user_id = $1
            ORDER BY last_active_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut chats = Vec::with_capacity(rows.len());
        for row in rows {
            let messages = self.messages_for(&row.chat_id).await?;
            chats.push(ChatSession {
                chat_id: row.chat_id,
                user_id: row.user_id,
                messages,
                created_at: row.created_at,
                last_active_at: row.last_active_at,
            });
        }
        Ok(chats)
    }

    async fn clear_user_chats(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM chats WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn save_chat(&self, session: &ChatSession) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chats (chat_id, user_id, created_at, last_active_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (chat_id) DO UPDATE SET last_active_at = EXCLUDED.last_active_at
            "#,
        )
        .bind(&session.chat_id)
        .bind(&session.user_id)
        .bind(session.created_at)
        .bind(session.last_active_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(r#"DELETE FROM messages WHERE chat_id = $1"#)
            .bind(&session.chat_id)
            .execute(&mut *tx)
            .await?;
        for message in &session.messages {
            Self::insert_message(&mut *tx, &session.chat_id, message).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_postings(&self, postings: &[JobPosting]) -> Result<u64> {
        let mut written = 0u64;
        for posting in postings {
            let skills = serde_json::to_value(&posting.skills)?;
            let result = sqlx::query(
                r#"
                INSERT INTO jobs (identity_key, title, company, location, description,
                                  skills, source, url, posted_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
                ON CONFLICT (identity_key) DO UPDATE SET
                    title = EXCLUDED.title,
                    company = EXCLUDED.company,
                    location = EXCLUDED.location,
                    description = EXCLUDED.description,
                    skills = EXCLUDED.skills,
                    source = EXCLUDED.source,
                    url = EXCLUDED.url,
                    posted_at = EXCLUDED.posted_at,
                    updated_at = NOW()
                "#,
            )
            .bind(posting.identity_key())
            .bind(&posting.title)
            .bind(&posting.company)
            .bind(&posting.location)
            .bind(&posting.description)
            .bind(skills)
            .bind(&posting.source)
            .bind(&posting.url)
            .bind(posting.posted_at)
            .execute(&self.pool)
            .await?;
            written += result.rows_affected();
        }
        Ok(written)
    }
}

/// In-memory store used when no `DATABASE_URL` is configured, and
/// throughout the test suite. Same contract as the Postgres store.
#[derive(Default)]
pub struct MemoryChatStore {
    chats: RwLock<HashMap<String, ChatSession>>,
    postings: RwLock<HashMap<String, JobPosting>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn append_exchange(
        &self,
        chat_id: &str,
        user_id: &str,
        user_message: &Message,
        bot_message: &Message,
    ) -> Result<()> {
        let mut chats = self.chats.write().await;
        let session = chats
            .entry(chat_id.to_string())
            .or_insert_with(|| ChatSession::new(chat_id, user_id));
        session.messages.push(user_message.clone());
        session.messages.push(bot_message.clone());
        session.last_active_at = Utc::now();
        Ok(())
    }

    async fn load_chat(&self, chat_id: &str) -> Result<Option<ChatSession>> {
        Ok(self.chats.read().await.get(chat_id).cloned())
    }

    async fn user_chats(&self, user_id: &str, limit: usize) -> Result<Vec<ChatSession>> {
        let chats = self.chats.read().await;
        let mut matched: Vec<ChatSession> = chats
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn clear_user_chats(&self, user_id: &str) -> Result<u64> {
        let mut chats = self.chats.write().await;
        let before = chats.len();
        chats.retain(|_, c| c.user_id != user_id);
        Ok((before - chats.len()) as u64)
    }

    async fn save_chat(&self, session: &ChatSession) -> Result<()> {
        self.chats
            .write()
            .await
            .insert(session.chat_id.clone(), session.clone());
        Ok(())
    }

    async fn upsert_postings(&self, postings: &[JobPosting]) -> Result<u64> {
        let mut stored = self.postings.write().await;
        for posting in postings {
            stored.insert(posting.identity_key(), posting.clone());
        }
        Ok(postings.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exchanges_append_in_order() {
        let store = MemoryChatStore::new();
        store
            .append_exchange("c1", "u1", &Message::user("first"), &Message::bot("reply 1", None))
            .await
            .unwrap();
        store
            .append_exchange("c1", "u1", &Message::user("second"), &Message::bot("reply 2", None))
            .await
            .unwrap();

        let chat = store.load_chat("c1").await.unwrap().unwrap();
        let contents: Vec<&str> = chat.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "reply 1", "second", "reply 2"]);
    }

    #[tokio::test]
    async fn clear_removes_only_that_user() {
        let store = MemoryChatStore::new();
        store
            .append_exchange("c1", "u1", &Message::user("hi"), &Message::bot("yo", None))
            .await
            .unwrap();
        store
            .append_exchange("c2", "u2", &Message::user("hi"), &Message::bot("yo", None))
            .await
            .unwrap();

        assert_eq!(store.clear_user_chats("u1").await.unwrap(), 1);
        assert!(store.load_chat("c1").await.unwrap().is_none());
        assert!(store.load_chat("c2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn postings_upsert_by_identity_key() {
        let store = MemoryChatStore::new();
        let mut posting = JobPosting {
            title: "Dev".into(),
            company: "Acme".into(),
            location: None,
            description: String::new(),
            skills: Default::default(),
            source: "linkedin".into(),
            url: Some("https://a/1".into()),
            posted_at: None,
        };
        store.upsert_postings(&[posting.clone()]).await.unwrap();
        posting.description = "updated".into();
        store.upsert_postings(&[posting.clone()]).await.unwrap();

        let stored = store.postings.read().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[&posting.identity_key()].description, "updated");
    }
}
