pub mod sqlite;

pub use sqlite::SqliteStorage;

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::context::SessionMeta;
use crate::history::{ChatMessage, MessageHistory};

/// Persistence of completed exchanges. A conversation is one user message
/// paired with the assistant answer it produced.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Conversations of the session's customer, oldest first.
    ///
    /// `offset` skips that many of the most recent conversations; `limit`
    /// then takes the conversations preceding them.
    async fn get_conversations(
        &self,
        meta: &SessionMeta,
        limit: usize,
        offset: usize,
    ) -> Result<MessageHistory>;

    async fn create_conversation(&self, meta: &SessionMeta, user_text: &str) -> Result<()>;

    /// Attach the answer to the conversation created for this session.
    async fn finish_conversation(&self, meta: &SessionMeta, assistant_text: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Conversation {
    session_id: String,
    customer_id: String,
    user_message: String,
    assistant_message: Option<String>,
}

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    conversations: Mutex<Vec<Conversation>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Conversation>>> {
        self.conversations
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {e}"))
    }
}

/// Append the turns of one conversation, skipping empty sides.
pub(crate) fn push_exchange(history: &mut MessageHistory, user: Option<String>, assistant: Option<String>) {
    if let Some(user) = user.filter(|s| !s.is_empty()) {
        history.push(ChatMessage::user(user));
    }
    if let Some(assistant) = assistant.filter(|s| !s.is_empty()) {
        history.push(ChatMessage::assistant(assistant));
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get_conversations(
        &self,
        meta: &SessionMeta,
        limit: usize,
        offset: usize,
    ) -> Result<MessageHistory> {
        let conversations = self.lock()?;
        let mut selected: Vec<&Conversation> = conversations
            .iter()
            .rev()
            .filter(|c| c.customer_id == meta.customer_id)
            .skip(offset)
            .take(limit)
            .collect();
        selected.reverse();

        let mut history = MessageHistory::new();
        for c in selected {
            push_exchange(
                &mut history,
                Some(c.user_message.clone()),
                c.assistant_message.clone(),
            );
        }
        Ok(history)
    }

    async fn create_conversation(&self, meta: &SessionMeta, user_text: &str) -> Result<()> {
        let mut conversations = self.lock()?;
        if conversations.iter().any(|c| c.session_id == meta.session_id) {
            anyhow::bail!("conversation already exists for session_id: {}", meta.session_id);
        }
        conversations.push(Conversation {
            session_id: meta.session_id.clone(),
            customer_id: meta.customer_id.clone(),
            user_message: user_text.to_string(),
            assistant_message: None,
        });
        Ok(())
    }

    async fn finish_conversation(&self, meta: &SessionMeta, assistant_text: &str) -> Result<()> {
        let mut conversations = self.lock()?;
        match conversations
            .iter_mut()
            .find(|c| c.session_id == meta.session_id)
        {
            Some(c) => {
                c.assistant_message = Some(assistant_text.to_string());
                Ok(())
            }
            None => anyhow::bail!("no conversation found with session_id: {}", meta.session_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exchange(storage: &InMemoryStorage, customer: &str, n: usize) {
        let meta = SessionMeta::new(customer);
        storage
            .create_conversation(&meta, &format!("q{n}"))
            .await
            .unwrap();
        storage
            .finish_conversation(&meta, &format!("a{n}"))
            .await
            .unwrap();
    }

    fn contents(history: &MessageHistory) -> Vec<&str> {
        history.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn offset_counts_from_the_end() {
        let storage = InMemoryStorage::new();
        for n in 1..=5 {
            exchange(&storage, "cust", n).await;
        }
        let meta = SessionMeta::new("cust");

        let latest = storage.get_conversations(&meta, 2, 0).await.unwrap();
        assert_eq!(contents(&latest), ["q4", "a4", "q5", "a5"]);

        let earlier = storage.get_conversations(&meta, 2, 2).await.unwrap();
        assert_eq!(contents(&earlier), ["q2", "a2", "q3", "a3"]);

        let past_start = storage.get_conversations(&meta, 10, 4).await.unwrap();
        assert_eq!(contents(&past_start), ["q1", "a1"]);
    }

    #[tokio::test]
    async fn customers_are_isolated() {
        let storage = InMemoryStorage::new();
        exchange(&storage, "a", 1).await;
        exchange(&storage, "b", 2).await;
        let history = storage
            .get_conversations(&SessionMeta::new("a"), 5, 0)
            .await
            .unwrap();
        assert_eq!(contents(&history), ["q1", "a1"]);
    }

    #[tokio::test]
    async fn unfinished_conversation_has_only_user_turn() {
        let storage = InMemoryStorage::new();
        let meta = SessionMeta::new("cust");
        storage.create_conversation(&meta, "pending").await.unwrap();
        let history = storage.get_conversations(&meta, 5, 0).await.unwrap();
        assert_eq!(contents(&history), ["pending"]);
    }

    #[tokio::test]
    async fn finishing_unknown_session_fails() {
        let storage = InMemoryStorage::new();
        let err = storage
            .finish_conversation(&SessionMeta::new("cust"), "answer")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no conversation found"));
    }
}
