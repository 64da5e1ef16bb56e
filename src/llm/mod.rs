//! Text-generation provider seam.
//!
//! The extraction pipeline only needs a small surface: send an ordered chat
//! exchange, get the assistant reply back as text. Provider errors are plain
//! [`crate::SiftError::Completion`] values; callers on the extraction path
//! degrade them into sentinel answers instead of propagating.

pub mod openai;

pub use openai::OpenAiCompletion;

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::Result;

/// Role of one chat turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of the exchange sent to the provider.
#[derive(Clone, Debug)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Chat-completion capability consumed by extraction, lead generation and
/// question screening.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Returns the trimmed assistant reply for the given exchange.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;
}

/// Scripted completion provider for tests.
///
/// Replies are popped in FIFO order; once the script is exhausted the
/// provider returns an empty string, mirroring the degraded contract of a
/// failing real provider. Every request is recorded for inspection.
#[derive(Default)]
pub struct MockCompletionProvider {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockCompletionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful reply.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(Ok(reply.into()));
    }

    /// Queues a provider failure.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.replies.lock().push_back(Err(message.into()));
    }

    /// Exchanges received so far, in call order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionProvider for MockCompletionProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String> {
        self.requests.lock().push(messages.to_vec());
        match self.replies.lock().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(crate::SiftError::Completion(message)),
            None => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_replays_script_in_order() {
        let provider = MockCompletionProvider::new();
        provider.push_reply("first");
        provider.push_failure("boom");

        let messages = [ChatMessage::user("hello")];
        assert_eq!(provider.complete(&messages, 0.0, 10).await.unwrap(), "first");
        assert!(provider.complete(&messages, 0.0, 10).await.is_err());
        // Exhausted script degrades to an empty reply.
        assert_eq!(provider.complete(&messages, 0.0, 10).await.unwrap(), "");
        assert_eq!(provider.requests().len(), 3);
    }
}
