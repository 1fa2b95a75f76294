use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{ChatAction, SendOptions},
    Result,
};

/// Outbound side of the chat transport.
///
/// The core only ever sends; inbound commands arrive as `Command` values built by the adapter.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        opts: SendOptions,
    ) -> Result<MessageRef>;

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()>;

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        self.send_message(chat_id, text, SendOptions::plain()).await
    }
}
