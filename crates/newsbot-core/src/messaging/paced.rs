//! Outbound pacing for broadcast fan-out.
//!
//! Every send books a slot that is free both globally and for its chat, then
//! sleeps until that slot. Chats whose window has passed are dropped from the
//! table at most once a minute.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, SendOptions},
    },
    Result,
};

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug)]
pub struct SendPacing {
    /// Gap between any two outbound calls.
    pub global_spacing: Duration,
    /// Gap between calls to the same chat.
    pub per_chat_spacing: Duration,
}

impl Default for SendPacing {
    fn default() -> Self {
        Self {
            global_spacing: Duration::from_millis(35),
            per_chat_spacing: Duration::from_secs(1),
        }
    }
}

struct PacingState {
    global_next: Instant,
    per_chat: HashMap<i64, Instant>,
    last_prune: Instant,
}

/// MessagingPort decorator that spaces outbound calls under the transport's
/// flood limits.
pub struct PacedMessenger {
    inner: Arc<dyn MessagingPort>,
    pacing: SendPacing,
    state: Mutex<PacingState>,
}

impl PacedMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, pacing: SendPacing) -> Self {
        let now = Instant::now();
        Self {
            inner,
            pacing,
            state: Mutex::new(PacingState {
                global_next: now,
                per_chat: HashMap::new(),
                last_prune: now,
            }),
        }
    }

    /// Chats that still hold a pacing window.
    pub fn tracked_chats(&self) -> usize {
        self.state.lock().per_chat.len()
    }

    /// Book the next slot for `chat_id` and return how long to wait for it.
    fn reserve(&self, chat_id: i64) -> Duration {
        let now = Instant::now();
        let mut st = self.state.lock();
        if now.saturating_duration_since(st.last_prune) >= PRUNE_INTERVAL {
            st.per_chat.retain(|_, next| *next > now);
            st.last_prune = now;
        }

        let chat_next = st.per_chat.get(&chat_id).copied().unwrap_or(now);
        let start = now.max(st.global_next).max(chat_next);
        st.global_next = start + self.pacing.global_spacing;
        st.per_chat.insert(chat_id, start + self.pacing.per_chat_spacing);
        start.saturating_duration_since(now)
    }

    async fn pace(&self, chat_id: ChatId) {
        let wait = self.reserve(chat_id.0);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for PacedMessenger {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        opts: SendOptions,
    ) -> Result<MessageRef> {
        self.pace(chat_id).await;
        self.inner.send_message(chat_id, text, opts).await
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        self.pace(chat_id).await;
        self.inner.send_chat_action(chat_id, action).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMessenger;

    fn paced(fake: &Arc<FakeMessenger>, global: Duration, per_chat: Duration) -> PacedMessenger {
        PacedMessenger::new(
            fake.clone(),
            SendPacing {
                global_spacing: global,
                per_chat_spacing: per_chat,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_calls_to_the_same_chat() {
        let fake = Arc::new(FakeMessenger::default());
        let p = paced(&fake, Duration::ZERO, Duration::from_secs(1));

        let started = Instant::now();
        for _ in 0..3 {
            p.send_text(ChatId(1), "x").await.unwrap();
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_millis(2050));
        assert_eq!(fake.sent_to(ChatId(1)).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn other_chats_only_wait_for_the_global_gap() {
        let fake = Arc::new(FakeMessenger::default());
        let p = paced(&fake, Duration::from_millis(100), Duration::from_secs(5));

        let started = Instant::now();
        for id in 0..5 {
            p.send_text(ChatId(id), "x").await.unwrap();
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(400) && elapsed < Duration::from_millis(450));
        assert_eq!(fake.sent().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_chats_are_pruned() {
        let fake = Arc::new(FakeMessenger::default());
        let p = paced(&fake, Duration::ZERO, Duration::from_secs(1));

        for id in 0..5 {
            p.send_text(ChatId(id), "x").await.unwrap();
        }
        assert_eq!(p.tracked_chats(), 5);

        sleep(Duration::from_secs(30)).await;
        p.send_text(ChatId(7), "x").await.unwrap();
        assert_eq!(p.tracked_chats(), 6);

        sleep(Duration::from_secs(31)).await;
        p.send_text(ChatId(99), "x").await.unwrap();
        assert_eq!(p.tracked_chats(), 1);
        assert_eq!(fake.sent().len(), 7);
    }
}
