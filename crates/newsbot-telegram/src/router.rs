use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::{info, warn};

use newsbot_core::{
    broadcast::Broadcaster,
    commands::{CommandService, TRACKED_COMMANDS},
    config::Config,
    feeds::{FeedSource, RssFeedFetcher},
    messaging::{
        port::MessagingPort,
        paced::{PacedMessenger, SendPacing},
    },
    rate_limit::RateLimiter,
    scheduler::NewsScheduler,
    stats::StatsAggregator,
    users::UserStore,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub commands: Arc<CommandService>,
}

/// Load persisted state, arm the scheduler and serve updates until interrupted.
pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "news bot started"),
        Err(e) => warn!("getMe failed, continuing: {e}"),
    }
    info!(
        categories = %cfg.categories().join(","),
        admins = cfg.admin_ids.len(),
        "configuration loaded"
    );

    let categories = cfg.categories();
    let users = Arc::new(UserStore::open(cfg.users_file.clone(), categories.clone()));
    let stats = Arc::new(StatsAggregator::open(
        cfg.stats_file.clone(),
        TRACKED_COMMANDS,
        &categories,
    ));
    let limiter = Arc::new(RateLimiter::new(
        cfg.rate_limit_enabled,
        cfg.rate_limit_per_minute,
        cfg.rate_limit_per_hour,
    ));
    let feeds: Arc<dyn FeedSource> = Arc::new(RssFeedFetcher::new(&cfg)?);

    // Digests fan out in bursts; space sends out before they reach Telegram.
    // RetryAfter is still retried once inside the adapter.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> =
        Arc::new(PacedMessenger::new(raw_messenger, SendPacing::default()));

    let broadcaster = Arc::new(Broadcaster::new(
        cfg.clone(),
        messenger.clone(),
        feeds.clone(),
        users.clone(),
    ));
    let scheduler = NewsScheduler::new(
        cfg.broadcast_times.clone(),
        broadcaster,
        messenger.clone(),
    );
    scheduler.start();

    let state = Arc::new(AppState {
        commands: Arc::new(CommandService::new(
            cfg,
            limiter,
            users,
            stats,
            feeds,
            messenger,
            scheduler.clone(),
        )),
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    scheduler.stop();
    info!("news bot stopped");
    Ok(())
}
