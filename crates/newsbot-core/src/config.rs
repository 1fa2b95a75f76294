use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::NaiveTime;

use crate::{errors::Error, Result};

const DEFAULT_CATEGORIES: &str = "general,tech,business";

/// Feed URLs for one news category.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedCategory {
    pub name: String,
    pub urls: Vec<String>,
}

/// Typed configuration, validated at load time.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub admin_ids: Vec<i64>,

    // Feeds
    pub feeds: Vec<FeedCategory>,
    pub news_article_limit: usize,
    pub broadcast_article_limit: usize,
    pub feed_timeout: Duration,

    // Rate limiting
    pub rate_limit_enabled: bool,
    pub rate_limit_per_minute: u32,
    pub rate_limit_per_hour: u32,

    // Storage
    pub users_file: PathBuf,
    pub stats_file: PathBuf,

    // Broadcast
    pub broadcast_times: Vec<NaiveTime>,
    pub broadcast_message_delay: Duration,
    pub send_timeout: Duration,
}

impl Config {
    /// Load from the process environment (plus an optional `.env` file).
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_source(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `load()` uses the environment.
    pub fn from_source(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let admin_ids = parse_csv_i64(get("ADMIN_USER_IDS"))?;

        let categories = parse_csv_lower(
            get("NEWS_CATEGORIES").or_else(|| Some(DEFAULT_CATEGORIES.to_string())),
        );
        if categories.is_empty() {
            return Err(Error::Config(
                "NEWS_CATEGORIES must name at least one category".to_string(),
            ));
        }

        let mut feeds = Vec::with_capacity(categories.len());
        for name in categories {
            if feeds.iter().any(|f: &FeedCategory| f.name == name) {
                continue;
            }
            let key = format!("FEEDS_{}", name.to_uppercase());
            let urls = parse_csv(get(&key))
                .filter(|v| !v.is_empty())
                .or_else(|| default_feeds(&name))
                .ok_or_else(|| {
                    Error::Config(format!("category '{name}' has no feeds; set {key}"))
                })?;
            feeds.push(FeedCategory { name, urls });
        }

        let news_article_limit = positive::<usize>(&get, "NEWS_ARTICLE_LIMIT", 3)?;
        let broadcast_article_limit = positive::<usize>(&get, "BROADCAST_ARTICLE_LIMIT", 2)?;
        let feed_timeout = Duration::from_secs(positive::<u64>(&get, "FEED_TIMEOUT_SECS", 15)?);

        let rate_limit_enabled = get("RATE_LIMIT_ENABLED")
            .map(|s| parse_bool(&s))
            .unwrap_or(true);
        let rate_limit_per_minute = positive::<u32>(&get, "RATE_LIMIT_PER_MINUTE", 10)?;
        let rate_limit_per_hour = positive::<u32>(&get, "RATE_LIMIT_PER_HOUR", 100)?;

        let users_file = PathBuf::from(get("USERS_FILE").unwrap_or_else(|| "users.json".into()));
        let stats_file =
            PathBuf::from(get("STATS_FILE").unwrap_or_else(|| "bot_stats.json".into()));

        let broadcast_times =
            parse_times(&get("BROADCAST_TIMES").unwrap_or_else(|| "09:00,18:00".into()))?;
        let broadcast_message_delay = Duration::from_millis(
            get("BROADCAST_MESSAGE_DELAY_MS")
                .map(|s| parse_number(&s, "BROADCAST_MESSAGE_DELAY_MS"))
                .transpose()?
                .unwrap_or(1000),
        );
        let send_timeout = Duration::from_secs(positive::<u64>(&get, "SEND_TIMEOUT_SECS", 10)?);

        Ok(Self {
            telegram_bot_token,
            admin_ids,
            feeds,
            news_article_limit,
            broadcast_article_limit,
            feed_timeout,
            rate_limit_enabled,
            rate_limit_per_minute,
            rate_limit_per_hour,
            users_file,
            stats_file,
            broadcast_times,
            broadcast_message_delay,
            send_timeout,
        })
    }

    /// Category names in configured order.
    pub fn categories(&self) -> Vec<String> {
        self.feeds.iter().map(|f| f.name.clone()).collect()
    }

    pub fn is_known_category(&self, category: &str) -> bool {
        self.feeds.iter().any(|f| f.name == category)
    }

    pub fn feeds_for(&self, category: &str) -> Option<&[String]> {
        self.feeds
            .iter()
            .find(|f| f.name == category)
            .map(|f| f.urls.as_slice())
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

fn default_feeds(category: &str) -> Option<Vec<String>> {
    let urls: &[&str] = match category {
        "general" => &[
            "https://rss.cnn.com/rss/edition.rss",
            "https://feeds.bbci.co.uk/news/world/rss.xml",
        ],
        "tech" => &[
            "https://techcrunch.com/feed/",
            "https://www.theverge.com/rss/index.xml",
        ],
        "business" => &[
            "https://feeds.bbci.co.uk/news/business/rss.xml",
            "https://www.cnbc.com/id/10001147/device/rss/rss.html",
        ],
        _ => return None,
    };
    Some(urls.iter().map(|s| s.to_string()).collect())
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        return &s[1..s.len() - 1];
    }
    s
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_number(s: &str, key: &str) -> Result<u64> {
    s.trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got '{s}'")))
}

fn positive<T: TryFrom<u64>>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    let v = parse_number(&raw, key)?;
    if v == 0 {
        return Err(Error::Config(format!("{key} must be greater than zero")));
    }
    T::try_from(v).map_err(|_| Error::Config(format!("{key} is too large, got '{v}'")))
}

fn parse_csv(v: Option<String>) -> Option<Vec<String>> {
    let v = v?;
    Some(
        v.split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect(),
    )
}

fn parse_csv_lower(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_csv_i64(v: Option<String>) -> Result<Vec<i64>> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| Error::Config(format!("ADMIN_USER_IDS contains invalid id '{s}'")))
        })
        .collect()
}

fn parse_times(raw: &str) -> Result<Vec<NaiveTime>> {
    let mut out = Vec::new();
    for part in raw.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let t = NaiveTime::parse_from_str(part, "%H:%M")
            .map_err(|_| Error::Config(format!("invalid broadcast time '{part}' (want HH:MM)")))?;
        if !out.contains(&t) {
            out.push(t);
        }
    }
    out.sort();
    Ok(out)
}
