use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock};

/// Who said what, independent of any particular LLM provider's message type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
}

/// Context shared between the stages of a pipeline execution.
///
/// Carries typed key/value data plus an append-only chat history.
#[derive(Clone, Debug)]
pub struct Context {
    data: Arc<DashMap<String, Value>>,
    history: Arc<RwLock<Vec<ChatMessage>>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: impl serde::Serialize) {
        let value = serde_json::to_value(value).expect("Failed to serialize value");
        self.data.insert(key.into(), value);
    }

    pub async fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub async fn remove(&self, key: &str) -> Option<Value> {
        self.data.remove(key).map(|(_, v)| v)
    }

    pub async fn add_message(&self, message: ChatMessage) {
        self.history.write().unwrap().push(message);
    }

    pub async fn add_user_message(&self, content: impl Into<String>) {
        self.add_message(ChatMessage::user(content)).await;
    }

    pub async fn add_assistant_message(&self, content: impl Into<String>) {
        self.add_message(ChatMessage::assistant(content)).await;
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.history.read().unwrap().clone()
    }

    pub async fn last_messages(&self, n: usize) -> Vec<ChatMessage> {
        let history = self.history.read().unwrap();
        let skip = history.len().saturating_sub(n);
        history[skip..].to_vec()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
