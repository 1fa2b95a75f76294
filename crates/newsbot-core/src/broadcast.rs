//! Fan-out delivery: scheduled digests per category and admin announcements.
//!
//! Recipients are served one after another; each recipient gets its messages in
//! order. A failing recipient is recorded in the batch outcome and skipped.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    domain::{ChatId, UserId},
    feeds::{FeedSource, NewsItem},
    formatting::{escape_html, format_digest_header, format_news_item},
    messaging::{port::MessagingPort, types::SendOptions},
    users::SubscriptionRegistry,
    Error, Result,
};

const DIGEST_ITEM_ICON: &str = "•";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub chat_id: ChatId,
    pub reason: String,
}

/// Result of one fan-out. `sent`/`failed` count recipients, `messages` counts sends.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub category: Option<String>,
    pub recipients: usize,
    pub sent: usize,
    pub failed: usize,
    pub messages: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl BatchOutcome {
    fn for_category(category: &str) -> Self {
        Self {
            category: Some(category.to_string()),
            ..Self::default()
        }
    }

    pub fn summary_line(&self) -> String {
        let label = self.category.as_deref().unwrap_or("announcement");
        format!(
            "{label}: delivered to {}/{} users ({} failed)",
            self.sent, self.recipients, self.failed
        )
    }
}

pub struct Broadcaster {
    cfg: Arc<Config>,
    messenger: Arc<dyn MessagingPort>,
    feeds: Arc<dyn FeedSource>,
    registry: Arc<dyn SubscriptionRegistry>,
}

impl Broadcaster {
    pub fn new(
        cfg: Arc<Config>,
        messenger: Arc<dyn MessagingPort>,
        feeds: Arc<dyn FeedSource>,
        registry: Arc<dyn SubscriptionRegistry>,
    ) -> Self {
        Self {
            cfg,
            messenger,
            feeds,
            registry,
        }
    }

    pub fn categories(&self) -> Vec<String> {
        self.cfg.categories()
    }

    /// Active users subscribed to `category`, in id order.
    pub fn recipients_for(&self, category: &str) -> Vec<UserId> {
        self.registry
            .active_users()
            .into_iter()
            .filter(|u| self.registry.subscriptions(*u).contains(category))
            .collect()
    }

    /// Send a digest for `category` to its subscribers.
    ///
    /// No fresh items means nothing is sent and the outcome is empty.
    pub async fn broadcast_category(&self, category: &str) -> BatchOutcome {
        let mut outcome = BatchOutcome::for_category(category);

        let items = self
            .feeds
            .fetch_items(category, self.cfg.broadcast_article_limit)
            .await;
        if items.is_empty() {
            info!(category, "no fresh items, skipping digest");
            return outcome;
        }

        let recipients = self.recipients_for(category);
        outcome.recipients = recipients.len();
        if recipients.is_empty() {
            debug!(category, "no subscribers");
            return outcome;
        }

        let header = format_digest_header(category);
        let bodies: Vec<String> = items.iter().map(digest_item).collect();

        let mut delivered = Vec::with_capacity(recipients.len());
        for user in recipients {
            let chat_id = ChatId::from(user);
            match self.deliver_digest(chat_id, &header, &bodies).await {
                Ok(n) => {
                    outcome.sent += 1;
                    outcome.messages += n;
                    delivered.push(user);
                }
                Err((n, e)) => {
                    warn!(chat_id = chat_id.0, category, "digest delivery failed: {e}");
                    outcome.failed += 1;
                    outcome.messages += n;
                    outcome.failures.push(DeliveryFailure {
                        chat_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.registry.mark_delivered(&delivered, Utc::now());
        info!(
            category,
            recipients = outcome.recipients,
            sent = outcome.sent,
            failed = outcome.failed,
            "digest delivered"
        );
        outcome
    }

    /// Send `text` (plain) to every active user.
    pub async fn broadcast_text(&self, text: &str) -> BatchOutcome {
        let recipients = self.registry.active_users();
        let mut outcome = BatchOutcome {
            recipients: recipients.len(),
            ..BatchOutcome::default()
        };
        let body = format!("📢 <b>Announcement</b>\n\n{}", escape_html(text));

        for user in recipients {
            let chat_id = ChatId::from(user);
            match self.send(chat_id, &body, SendOptions::html()).await {
                Ok(()) => {
                    outcome.sent += 1;
                    outcome.messages += 1;
                }
                Err(e) => {
                    warn!(chat_id = chat_id.0, "announcement delivery failed: {e}");
                    outcome.failed += 1;
                    outcome.failures.push(DeliveryFailure {
                        chat_id,
                        reason: e.to_string(),
                    });
                }
            }
            self.pace().await;
        }

        info!(
            recipients = outcome.recipients,
            sent = outcome.sent,
            failed = outcome.failed,
            "announcement delivered"
        );
        outcome
    }

    /// Header then items, stopping at the first failed send. Returns the number of
    /// messages sent (alongside the error on failure).
    async fn deliver_digest(
        &self,
        chat_id: ChatId,
        header: &str,
        bodies: &[String],
    ) -> std::result::Result<usize, (usize, Error)> {
        self.send(chat_id, header, SendOptions::html())
            .await
            .map_err(|e| (0, e))?;
        let mut sent = 1;

        for body in bodies {
            self.send(chat_id, body, SendOptions::html().without_preview())
                .await
                .map_err(|e| (sent, e))?;
            sent += 1;
            self.pace().await;
        }
        Ok(sent)
    }

    async fn send(&self, chat_id: ChatId, text: &str, opts: SendOptions) -> Result<()> {
        bounded(
            self.cfg.send_timeout,
            self.messenger.send_message(chat_id, text, opts),
        )
        .await
        .map(|_| ())
    }

    async fn pace(&self) {
        let delay = self.cfg.broadcast_message_delay;
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

fn digest_item(item: &NewsItem) -> String {
    format_news_item(DIGEST_ITEM_ICON, item)
}

async fn bounded<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout(limit)),
    }
}
