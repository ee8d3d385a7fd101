//! In-memory conversation histories keyed by conversation id
//!
//! Each conversation sits behind its own mutex so a whole turn (read history, call the provider,
//! append the reply) can run exclusively for one id while other ids proceed in parallel.
//! Histories live for the lifetime of the process.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::models::message::Message;
use crate::models::role::Role;

#[derive(Error, Debug, PartialEq)]
pub enum ConversationError {
    #[error("conversation {0} does not exist")]
    Unknown(String),

    #[error("cannot append a {got} message after a {after} message")]
    OutOfOrder { after: Role, got: Role },
}

/// Ordered message history, oldest first. The first message is always the system prompt.
#[derive(Debug, Clone)]
pub struct Conversation {
    id: String,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new<S: Into<String>>(id: S, system_prompt: String) -> Self {
        Self {
            id: id.into(),
            messages: vec![Message::system(system_prompt)],
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message, keeping the system, (user, assistant)* shape intact
    pub fn append(&mut self, message: Message) -> Result<(), ConversationError> {
        let after = self.messages.last().map_or(Role::System, Message::role);
        let allowed = match message.role() {
            Role::User => after != Role::User,
            Role::Assistant => after == Role::User,
            Role::System => false,
        };
        if !allowed {
            return Err(ConversationError::OutOfOrder {
                after,
                got: message.role(),
            });
        }
        self.messages.push(message);
        Ok(())
    }

    /// Append a completed turn. Either both messages are stored or neither is.
    pub fn append_turn(&mut self, user: Message, assistant: Message) -> Result<(), ConversationError> {
        self.append(user)?;
        if let Err(e) = self.append(assistant) {
            self.messages.pop();
            return Err(e);
        }
        Ok(())
    }

    /// History followed by a message that is not stored yet
    pub fn with_pending(&self, pending: &Message) -> Vec<Message> {
        let mut messages = self.messages.clone();
        messages.push(pending.clone());
        messages
    }
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: RwLock<HashMap<String, Arc<Mutex<Conversation>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the conversation for `id`, creating it with the given system prompt if unseen.
    ///
    /// The prompt closure only runs when a new conversation is created.
    pub async fn get_or_create<F>(&self, id: &str, system_prompt: F) -> Arc<Mutex<Conversation>>
    where
        F: FnOnce() -> String,
    {
        if let Some(conversation) = self.conversations.read().await.get(id) {
            return Arc::clone(conversation);
        }

        let mut conversations = self.conversations.write().await;
        Arc::clone(conversations.entry(id.to_string()).or_insert_with(|| {
            tracing::debug!("creating conversation {}", id);
            Arc::new(Mutex::new(Conversation::new(id, system_prompt())))
        }))
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<Conversation>>> {
        self.conversations.read().await.get(id).cloned()
    }

    pub async fn append(&self, id: &str, message: Message) -> Result<(), ConversationError> {
        let conversation = self
            .get(id)
            .await
            .ok_or_else(|| ConversationError::Unknown(id.to_string()))?;
        let mut conversation = conversation.lock().await;
        conversation.append(message)
    }

    /// Snapshot of the messages stored for `id`
    pub async fn history(&self, id: &str) -> Option<Vec<Message>> {
        let conversation = self.get(id).await?;
        let conversation = conversation.lock().await;
        Some(conversation.messages().to_vec())
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_conversation_starts_with_system_prompt() {
        let store = ConversationStore::new();
        let conversation = store.get_or_create("abc", || "be helpful".to_string()).await;
        let conversation = conversation.lock().await;
        assert_eq!(conversation.id(), "abc");
        assert_eq!(conversation.messages(), &[Message::system("be helpful")]);
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = ConversationStore::new();
        let first = store.get_or_create("abc", || "first".to_string()).await;
        store.append("abc", Message::user("hi")).await.unwrap();

        let second = store
            .get_or_create("abc", || panic!("must not build a second prompt"))
            .await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.lock().await.len(), 2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_append_enforces_alternation() {
        let store = ConversationStore::new();
        store.get_or_create("c", || "sys".to_string()).await;

        assert_eq!(
            store.append("c", Message::assistant("too early")).await,
            Err(ConversationError::OutOfOrder {
                after: Role::System,
                got: Role::Assistant
            })
        );
        store.append("c", Message::user("q")).await.unwrap();
        assert!(store.append("c", Message::user("again")).await.is_err());
        store.append("c", Message::assistant("a")).await.unwrap();
        assert!(store.append("c", Message::system("reset")).await.is_err());

        let history = store.history("c").await.unwrap();
        let roles: Vec<Role> = history.iter().map(Message::role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_append_to_unknown_conversation() {
        let store = ConversationStore::new();
        assert_eq!(
            store.append("missing", Message::user("hi")).await,
            Err(ConversationError::Unknown("missing".to_string()))
        );
        assert!(store.history("missing").await.is_none());
    }

    #[test]
    fn test_append_turn_is_all_or_nothing() {
        let mut conversation = Conversation::new("c", "sys".to_string());
        let err = conversation.append_turn(Message::user("q"), Message::user("not a reply"));
        assert!(err.is_err());
        assert_eq!(conversation.len(), 1);

        conversation
            .append_turn(Message::user("q"), Message::assistant("a"))
            .unwrap();
        assert_eq!(conversation.len(), 3);
    }

    #[tokio::test]
    async fn test_distinct_ids_are_independent() {
        let store = Arc::new(ConversationStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let id = format!("conv-{}", i);
                store.get_or_create(&id, || format!("prompt {}", i)).await;
                store.append(&id, Message::user("q")).await.unwrap();
                store.append(&id, Message::assistant("a")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len().await, 16);
        for i in 0..16 {
            let history = store.history(&format!("conv-{}", i)).await.unwrap();
            assert_eq!(history[0], Message::system(format!("prompt {}", i)));
            assert_eq!(history.len(), 3);
        }
    }
}
