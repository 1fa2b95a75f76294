//! Command handling: admission, stats recording, then the command itself.
//!
//! Nothing returned from here reaches the transport as an error. Input mistakes
//! become a corrective reply; anything else is logged and answered with an apology.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    domain::{ChatId, UserId},
    errors::InputError,
    feeds::FeedSource,
    formatting::{category_icon, format_news_item, title_case},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, Command, SendOptions},
    },
    rate_limit::RateLimiter,
    scheduler::{BroadcastJob, NewsScheduler},
    stats::StatsAggregator,
    users::UserStore,
    Error,
};

/// Commands with a per-command usage counter. Admin commands are not tracked.
pub const TRACKED_COMMANDS: &[&str] = &[
    "start",
    "help",
    "news",
    "tech",
    "business",
    "categories",
    "subscribe",
    "unsubscribe",
    "mysubs",
];

const APOLOGY: &str = "Sorry, something went wrong while processing your command. Please try again later.";

#[derive(Debug)]
enum CommandError {
    Input(InputError),
    Internal(Error),
}

impl From<InputError> for CommandError {
    fn from(e: InputError) -> Self {
        CommandError::Input(e)
    }
}

impl From<Error> for CommandError {
    fn from(e: Error) -> Self {
        CommandError::Internal(e)
    }
}

type CommandResult = std::result::Result<(), CommandError>;

/// Shared context for command handlers. Built once at startup.
pub struct CommandService {
    cfg: Arc<Config>,
    limiter: Arc<RateLimiter>,
    users: Arc<UserStore>,
    stats: Arc<StatsAggregator>,
    feeds: Arc<dyn FeedSource>,
    messenger: Arc<dyn MessagingPort>,
    scheduler: NewsScheduler,
}

impl CommandService {
    pub fn new(
        cfg: Arc<Config>,
        limiter: Arc<RateLimiter>,
        users: Arc<UserStore>,
        stats: Arc<StatsAggregator>,
        feeds: Arc<dyn FeedSource>,
        messenger: Arc<dyn MessagingPort>,
        scheduler: NewsScheduler,
    ) -> Self {
        Self {
            cfg,
            limiter,
            users,
            stats,
            feeds,
            messenger,
            scheduler,
        }
    }

    pub async fn handle(&self, cmd: Command) {
        let decision = self.limiter.admit(cmd.user_id);
        if !decision.allowed {
            let reason = decision
                .reason
                .unwrap_or_else(|| "Too many requests. Please try again later.".to_string());
            self.reply(cmd.chat_id, &format!("⏳ {reason}")).await;
            return;
        }

        self.stats.record_command(&cmd.name, cmd.user_id);
        debug!(user_id = cmd.user_id.0, command = %cmd.name, "handling command");

        match self.dispatch(&cmd).await {
            Ok(()) => {}
            Err(CommandError::Input(e)) => {
                debug!(user_id = cmd.user_id.0, command = %cmd.name, "rejected input: {e}");
                self.reply(cmd.chat_id, &e.to_string()).await;
            }
            Err(CommandError::Internal(e)) => {
                error!(user_id = cmd.user_id.0, command = %cmd.name, "command failed: {e}");
                self.reply(cmd.chat_id, APOLOGY).await;
            }
        }
    }

    async fn dispatch(&self, cmd: &Command) -> CommandResult {
        match cmd.name.as_str() {
            "start" => self.start(cmd).await,
            "help" => self.help(cmd).await,
            "news" => {
                let category = cmd
                    .first_arg()
                    .map(str::to_lowercase)
                    .unwrap_or_else(|| "general".to_string());
                self.news(cmd.chat_id, &category).await
            }
            "tech" | "business" => self.news(cmd.chat_id, &cmd.name).await,
            "categories" => self.categories(cmd).await,
            "subscribe" => self.subscribe(cmd).await,
            "unsubscribe" => self.unsubscribe(cmd).await,
            "mysubs" => self.my_subscriptions(cmd).await,
            "stats" => {
                self.require_admin(cmd)?;
                let text = format!("{}\n{}", self.stats.summarize(), self.scheduler.status_text());
                self.reply(cmd.chat_id, &text).await;
                Ok(())
            }
            "broadcast" => self.broadcast(cmd).await,
            "userinfo" => self.user_info(cmd).await,
            "digest" => {
                self.require_admin(cmd)?;
                self.scheduler.submit(BroadcastJob::Digest {
                    notify: Some(cmd.chat_id),
                })?;
                info!(admin = cmd.user_id.0, "manual digest queued");
                self.reply(cmd.chat_id, "📰 Digest queued. You'll get a report when it finishes.")
                    .await;
                Ok(())
            }
            other => Err(InputError::UnknownCommand(other.to_string()).into()),
        }
    }

    async fn start(&self, cmd: &Command) -> CommandResult {
        self.register(cmd);
        let greeting = match cmd.display_name.as_deref() {
            Some(name) => format!("Hi {name}! I am your news bot."),
            None => "Hi! I am your news bot.".to_string(),
        };
        self.reply(
            cmd.chat_id,
            &format!("{greeting} Use /help to see available commands."),
        )
        .await;
        Ok(())
    }

    async fn help(&self, cmd: &Command) -> CommandResult {
        let mut text = String::from(
            "Available commands:\n\
             /start - Start the bot\n\
             /help - Show this help message\n\
             /news [category] - Get latest news (default: general)\n\
             /tech - Get latest tech news\n\
             /business - Get latest business news\n\
             /categories - List news categories\n\
             /subscribe <category> - Get daily digests for a category\n\
             /unsubscribe <category> - Stop daily digests for a category\n\
             /mysubs - Show your subscriptions",
        );
        if self.cfg.is_admin(cmd.user_id.0) {
            text.push_str(
                "\n\nAdmin commands:\n\
                 /stats - Usage statistics\n\
                 /broadcast <message> - Message all active users\n\
                 /userinfo <user_id> - Subscriptions and rate-limit counters\n\
                 /digest - Send the daily digest now",
            );
        }
        self.reply(cmd.chat_id, &text).await;
        Ok(())
    }

    async fn news(&self, chat_id: ChatId, category: &str) -> CommandResult {
        self.known_category(category)?;
        self.stats.record_category_request(category);

        let label = if category == "general" {
            String::new()
        } else {
            format!("{category} ")
        };
        self.reply(chat_id, &format!("Fetching latest {label}news..."))
            .await;
        if let Err(e) = self
            .messenger
            .send_chat_action(chat_id, ChatAction::Typing)
            .await
        {
            debug!(chat_id = chat_id.0, "typing indicator failed: {e}");
        }

        let items = self
            .feeds
            .fetch_items(category, self.cfg.news_article_limit)
            .await;
        if items.is_empty() {
            self.reply(
                chat_id,
                &format!("Sorry, no {label}news available right now."),
            )
            .await;
            return Ok(());
        }

        let icon = category_icon(category);
        for item in &items {
            self.messenger
                .send_message(
                    chat_id,
                    &format_news_item(icon, item),
                    SendOptions::html().without_preview(),
                )
                .await?;
        }
        Ok(())
    }

    async fn categories(&self, cmd: &Command) -> CommandResult {
        let mut lines = vec!["Available news categories:".to_string()];
        for category in self.cfg.categories() {
            lines.push(format!(
                "{} {}",
                category_icon(&category),
                title_case(&category)
            ));
        }
        lines.push(String::new());
        lines.push("Use /subscribe <category> to get daily digests.".to_string());
        self.reply(cmd.chat_id, &lines.join("\n")).await;
        Ok(())
    }

    async fn subscribe(&self, cmd: &Command) -> CommandResult {
        let category = self.category_arg(cmd, "/subscribe <category>")?;
        self.register(cmd);

        if self.users.add_subscription(cmd.user_id, &category) {
            self.stats.record_subscription_change(&category, true);
            info!(user_id = cmd.user_id.0, category = %category, "subscribed");
            let times = self.broadcast_times();
            self.reply(
                cmd.chat_id,
                &format!("✅ Subscribed to {category} news. Digests arrive daily at {times}."),
            )
            .await;
        } else {
            self.reply(
                cmd.chat_id,
                &format!("You are already subscribed to {category} news."),
            )
            .await;
        }
        Ok(())
    }

    async fn unsubscribe(&self, cmd: &Command) -> CommandResult {
        let category = self.category_arg(cmd, "/unsubscribe <category>")?;

        if self.users.remove_subscription(cmd.user_id, &category) {
            self.stats.record_subscription_change(&category, false);
            info!(user_id = cmd.user_id.0, category = %category, "unsubscribed");
            self.reply(
                cmd.chat_id,
                &format!("❌ Unsubscribed from {category} news."),
            )
            .await;
        } else {
            self.reply(
                cmd.chat_id,
                &format!("You are not subscribed to {category} news."),
            )
            .await;
        }
        Ok(())
    }

    async fn my_subscriptions(&self, cmd: &Command) -> CommandResult {
        let subs = self.users.subscriptions(cmd.user_id);
        let text = if subs.is_empty() {
            "You have no subscriptions. Use /subscribe <category> to add one.".to_string()
        } else {
            let mut lines = vec!["Your subscriptions:".to_string()];
            lines.extend(
                subs.iter()
                    .map(|c| format!("{} {}", category_icon(c), title_case(c))),
            );
            lines.join("\n")
        };
        self.reply(cmd.chat_id, &text).await;
        Ok(())
    }

    async fn broadcast(&self, cmd: &Command) -> CommandResult {
        self.require_admin(cmd)?;
        let text = cmd.rest();
        if text.is_empty() {
            return Err(InputError::MissingArgument {
                usage: "/broadcast <message>".to_string(),
            }
            .into());
        }

        let recipients = self.users.active_users().len();
        self.scheduler.submit(BroadcastJob::Announcement {
            text,
            notify: Some(cmd.chat_id),
        })?;
        info!(admin = cmd.user_id.0, recipients, "announcement queued");
        self.reply(
            cmd.chat_id,
            &format!("📢 Broadcast queued for {recipients} active users."),
        )
        .await;
        Ok(())
    }

    async fn user_info(&self, cmd: &Command) -> CommandResult {
        self.require_admin(cmd)?;
        let raw = cmd.first_arg().ok_or_else(|| InputError::MissingArgument {
            usage: "/userinfo <user_id>".to_string(),
        })?;
        let target = raw
            .parse::<i64>()
            .map(UserId)
            .map_err(|_| InputError::MalformedUserId(raw.to_string()))?;

        let mut lines = vec![format!("👤 User {target}")];
        match self.users.user(target) {
            Some(record) => {
                if let Some(name) = record.display_name.as_deref() {
                    lines.push(format!("Name: {name}"));
                }
                lines.push(format!("Active: {}", if record.active { "yes" } else { "no" }));
                let subs = if record.subscriptions.is_empty() {
                    "none".to_string()
                } else {
                    record
                        .subscriptions
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                lines.push(format!("Subscriptions: {subs}"));
                let last = record
                    .last_news_time
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "never".to_string());
                lines.push(format!("Last digest: {last}"));
            }
            None => lines.push("Not registered".to_string()),
        }

        let rate = self.limiter.stats(target);
        lines.push(format!(
            "Requests last minute: {}/{}",
            rate.requests_last_minute, rate.minute_limit
        ));
        lines.push(format!(
            "Requests last hour: {}/{}",
            rate.requests_last_hour, rate.hour_limit
        ));

        self.reply(cmd.chat_id, &lines.join("\n")).await;
        Ok(())
    }

    /// Create the user on first contact and count them once.
    fn register(&self, cmd: &Command) {
        if self
            .users
            .register_user(cmd.user_id, cmd.display_name.as_deref())
        {
            self.stats.record_new_user();
        }
    }

    fn require_admin(&self, cmd: &Command) -> std::result::Result<(), InputError> {
        if self.cfg.is_admin(cmd.user_id.0) {
            Ok(())
        } else {
            warn!(user_id = cmd.user_id.0, command = %cmd.name, "non-admin tried admin command");
            Err(InputError::NotAdmin)
        }
    }

    fn category_arg(&self, cmd: &Command, usage: &str) -> std::result::Result<String, InputError> {
        let category = cmd
            .first_arg()
            .map(str::to_lowercase)
            .ok_or_else(|| InputError::MissingArgument {
                usage: usage.to_string(),
            })?;
        self.known_category(&category)?;
        Ok(category)
    }

    fn known_category(&self, category: &str) -> std::result::Result<(), InputError> {
        if self.cfg.is_known_category(category) {
            return Ok(());
        }
        Err(InputError::UnknownCategory {
            given: category.to_string(),
            available: self.cfg.categories().join(", "),
        })
    }

    fn broadcast_times(&self) -> String {
        self.cfg
            .broadcast_times
            .iter()
            .map(|t| t.format("%H:%M").to_string())
            .collect::<Vec<_>>()
            .join(" and ")
    }

    async fn reply(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self
            .messenger
            .send_message(chat_id, text, SendOptions::plain())
            .await
        {
            warn!(chat_id = chat_id.0, "reply failed: {e}");
        }
    }
}
