//! Test doubles for the ports.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicI32, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, SendOptions},
    },
    Error, Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sent {
    pub chat_id: ChatId,
    pub text: String,
    pub opts: SendOptions,
}

/// Records every send. Chats in `failing` get a delivery error; `latency` delays each send.
#[derive(Default)]
pub struct FakeMessenger {
    next_id: AtomicI32,
    sends: Mutex<Vec<Sent>>,
    actions: Mutex<Vec<ChatId>>,
    failing: Mutex<HashSet<i64>>,
    latency: Mutex<Option<Duration>>,
}

impl FakeMessenger {
    pub fn failing_for(chats: &[i64]) -> Self {
        let fake = Self::default();
        fake.failing.lock().unwrap().extend(chats.iter().copied());
        fake
    }

    pub fn with_latency(latency: Duration) -> Self {
        let fake = Self::default();
        *fake.latency.lock().unwrap() = Some(latency);
        fake
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sends.lock().unwrap().clone()
    }

    pub fn sent_to(&self, chat_id: ChatId) -> Vec<String> {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.chat_id == chat_id)
            .map(|s| s.text.clone())
            .collect()
    }

    pub fn chat_actions(&self) -> Vec<ChatId> {
        self.actions.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        opts: SendOptions,
    ) -> Result<MessageRef> {
        let latency = *self.latency.lock().unwrap();
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }
        if self.failing.lock().unwrap().contains(&chat_id.0) {
            return Err(Error::Delivery("Forbidden: bot was blocked by the user".into()));
        }
        self.sends.lock().unwrap().push(Sent {
            chat_id,
            text: text.to_string(),
            opts,
        });
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(id),
        })
    }

    async fn send_chat_action(&self, chat_id: ChatId, _action: ChatAction) -> Result<()> {
        self.actions.lock().unwrap().push(chat_id);
        Ok(())
    }
}

/// Config with default categories, no inter-message delay and the given admins.
pub fn test_config(admins: &str) -> crate::config::Config {
    crate::config::Config::from_source(|k| match k {
        "TELEGRAM_BOT_TOKEN" => Some("test-token".to_string()),
        "ADMIN_USER_IDS" => Some(admins.to_string()),
        "BROADCAST_MESSAGE_DELAY_MS" => Some("0".to_string()),
        _ => None,
    })
    .unwrap()
}

pub fn news_item(title: &str, published: &str) -> crate::feeds::NewsItem {
    crate::feeds::NewsItem {
        title: title.to_string(),
        summary: format!("{title} summary"),
        link: format!("https://news.example/{}", title.to_lowercase().replace(' ', "-")),
        published: published.to_string(),
        published_at: crate::feeds::parse_published(published),
        source: "Example Wire".to_string(),
    }
}
