use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::{ChatError, ValidationError};

pub const GREETING: &str = "Hello! I'm the campus assistant. How can I help you today?";
/// Sent when the model answers with nothing usable.
pub const FALLBACK_REPLY: &str = "I'm not sure how to respond to that.";
/// Sent when the chat service could not be reached.
pub const UNAVAILABLE_REPLY: &str =
    "I'm experiencing some technical difficulties. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    Assistant,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub speaker: Speaker,
    pub text: String,
}

/// One message in the shape chat-completion APIs expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionMessage {
    pub role: &'static str,
    pub content: String,
}

pub trait ChatService: Send + Sync {
    fn complete(
        &self,
        messages: &[CompletionMessage],
    ) -> impl Future<Output = Result<String, ChatError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self {
            messages: vec![ChatMessage {
                speaker: Speaker::Assistant,
                text: GREETING.into(),
            }],
        }
    }
}

impl Conversation {
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        if messages.is_empty() {
            Self::default()
        } else {
            Self { messages }
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }

    pub fn push_user(&mut self, text: &str) -> Result<(), ValidationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        self.messages.push(ChatMessage {
            speaker: Speaker::User,
            text: text.into(),
        });
        Ok(())
    }

    pub fn push_reply(&mut self, text: impl Into<String>) {
        self.messages.push(ChatMessage {
            speaker: Speaker::Assistant,
            text: text.into(),
        });
    }

    /// The whole history, greeting included, mapped to completion roles.
    pub fn completion_messages(&self) -> Vec<CompletionMessage> {
        self.messages
            .iter()
            .map(|message| CompletionMessage {
                role: match message.speaker {
                    Speaker::Assistant => "assistant",
                    Speaker::User => "user",
                },
                content: message.text.clone(),
            })
            .collect()
    }
}

/// Asks `service` for the next assistant message. Never fails: an empty answer
/// becomes [`FALLBACK_REPLY`] and a failed request [`UNAVAILABLE_REPLY`].
pub async fn reply<C: ChatService>(service: &C, conversation: &Conversation) -> ChatMessage {
    let text = match service.complete(&conversation.completion_messages()).await {
        Ok(text) if text.trim().is_empty() => FALLBACK_REPLY.to_string(),
        Ok(text) => text.trim().to_string(),
        Err(err) => {
            warn!(%err, "assistant request failed");
            UNAVAILABLE_REPLY.to_string()
        }
    };
    ChatMessage {
        speaker: Speaker::Assistant,
        text,
    }
}
