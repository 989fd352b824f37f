use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use common::error::AppError;

/// Who produced a message in a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Assistant => write!(f, "Assistant"),
        }
    }
}

/// One message in a conversation thread.
#[derive(Debug, Clone)]
pub struct ThreadMessage {
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Display for ThreadMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

/// Render a slice of history for prompt consumption.
pub fn format_history(history: &[ThreadMessage]) -> String {
    history
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<String>>()
        .join("\n")
}

/// Thread-scoped conversation history. `append` is the only mutator; reads
/// observe a linearizable view of prior appends on the same thread.
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    async fn append(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<(), AppError>;

    /// The last `2 * max_turns` messages, oldest first.
    async fn recent(&self, thread_id: &str, max_turns: usize)
        -> Result<Vec<ThreadMessage>, AppError>;

    async fn message_count(&self, thread_id: &str) -> Result<usize, AppError>;

    async fn reset(&self, thread_id: &str) -> Result<(), AppError>;
}

struct ThreadState {
    messages: Vec<ThreadMessage>,
    last_activity: DateTime<Utc>,
}

/// Default ephemeral backend. Threads are created on first append, appends
/// on one thread are serialized by its own lock, and threads idle past the
/// session timeout are evicted lazily on the next map access.
pub struct InMemoryConversationStore {
    threads: Mutex<HashMap<String, Arc<Mutex<ThreadState>>>>,
    session_timeout: Duration,
}

impl InMemoryConversationStore {
    pub fn new(session_timeout_minutes: u64) -> Self {
        Self {
            threads: Mutex::new(HashMap::new()),
            session_timeout: Duration::minutes(session_timeout_minutes as i64),
        }
    }

    async fn thread(&self, thread_id: &str) -> Arc<Mutex<ThreadState>> {
        let mut threads = self.threads.lock().await;

        let cutoff = Utc::now() - self.session_timeout;
        let before = threads.len();
        threads.retain(|id, thread| {
            id == thread_id
                || thread
                    .try_lock()
                    .map(|state| state.last_activity >= cutoff)
                    .unwrap_or(true)
        });
        if threads.len() < before {
            debug!(evicted = before - threads.len(), "Evicted idle threads");
        }

        Arc::clone(threads.entry(thread_id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(ThreadState {
                messages: Vec::new(),
                last_activity: Utc::now(),
            }))
        }))
    }
}

#[async_trait]
impl ConversationMemory for InMemoryConversationStore {
    async fn append(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<(), AppError> {
        let thread = self.thread(thread_id).await;
        let mut state = thread.lock().await;
        state.messages.push(ThreadMessage {
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        });
        state.last_activity = Utc::now();
        Ok(())
    }

    async fn recent(
        &self,
        thread_id: &str,
        max_turns: usize,
    ) -> Result<Vec<ThreadMessage>, AppError> {
        let thread = self.thread(thread_id).await;
        let mut state = thread.lock().await;
        state.last_activity = Utc::now();
        let take = max_turns.saturating_mul(2);
        let skip = state.messages.len().saturating_sub(take);
        Ok(state.messages.iter().skip(skip).cloned().collect())
    }

    async fn message_count(&self, thread_id: &str) -> Result<usize, AppError> {
        let thread = self.thread(thread_id).await;
        let state = thread.lock().await;
        Ok(state.messages.len())
    }

    async fn reset(&self, thread_id: &str) -> Result<(), AppError> {
        let mut threads = self.threads.lock().await;
        threads.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_then_recent_preserves_order() {
        let store = InMemoryConversationStore::new(30);
        store
            .append("t1", MessageRole::User, "What is CCS?")
            .await
            .unwrap();
        store
            .append("t1", MessageRole::Assistant, "CCS is Child Care Services.")
            .await
            .unwrap();

        let history = store.recent("t1", 5).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[1].role, MessageRole::Assistant);
        assert_eq!(store.message_count("t1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_recent_returns_last_two_per_turn() {
        let store = InMemoryConversationStore::new(30);
        for i in 0..8 {
            let role = if i % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            };
            store
                .append("t1", role, &format!("message {i}"))
                .await
                .unwrap();
        }

        let history = store.recent("t1", 2).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "message 4");
        assert_eq!(history[3].content, "message 7");
    }

    #[tokio::test]
    async fn test_threads_are_isolated() {
        let store = InMemoryConversationStore::new(30);
        store.append("a", MessageRole::User, "in a").await.unwrap();
        store.append("b", MessageRole::User, "in b").await.unwrap();

        let history_a = store.recent("a", 5).await.unwrap();
        assert_eq!(history_a.len(), 1);
        assert_eq!(history_a[0].content, "in a");
    }

    #[tokio::test]
    async fn test_reset_clears_thread() {
        let store = InMemoryConversationStore::new(30);
        store.append("t", MessageRole::User, "hello").await.unwrap();
        store.reset("t").await.unwrap();
        assert_eq!(store.message_count("t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_idle_threads_are_evicted() {
        let store = InMemoryConversationStore::new(0);
        store.append("old", MessageRole::User, "stale").await.unwrap();
        // Zero-minute timeout: the next access on another thread evicts it.
        store.append("new", MessageRole::User, "fresh").await.unwrap();

        assert_eq!(store.message_count("old").await.unwrap(), 0);
    }

    #[test]
    fn test_format_history_renders_roles() {
        let history = vec![
            ThreadMessage {
                role: MessageRole::User,
                content: "Hello".into(),
                created_at: Utc::now(),
            },
            ThreadMessage {
                role: MessageRole::Assistant,
                content: "Hi there!".into(),
                created_at: Utc::now(),
            },
        ];
        assert_eq!(format_history(&history), "User: Hello\nAssistant: Hi there!");
    }
}
