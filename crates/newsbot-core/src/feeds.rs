//! Feed source port + RSS/Atom fetcher.
//!
//! - RSS 2.0 `<item>` and Atom `<entry>` blocks are extracted with regexes
//! - CDATA and the common XML entities are decoded, HTML is stripped from summaries
//! - Per-source failures are logged and skipped; siblings still contribute
//! - Items are ordered newest-first by the parsed publish time

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, warn};

use crate::{
    config::{Config, FeedCategory},
    utils::{squash_whitespace, truncate_text},
    Error, Result,
};

pub const SUMMARY_MAX_CHARS: usize = 200;

#[derive(Clone, Debug, PartialEq)]
pub struct NewsItem {
    pub title: String,
    pub summary: String,
    pub link: String,
    /// Raw publish timestamp as found in the feed.
    pub published: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source: String,
}

/// Where news comes from. The broadcaster and command service only see this port.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Up to `limit` items for `category`, newest first. Unknown categories and
    /// failing sources yield no items rather than an error.
    async fn fetch_items(&self, category: &str, limit: usize) -> Vec<NewsItem>;
}

pub struct RssFeedFetcher {
    http: reqwest::Client,
    parser: FeedParser,
    feeds: Vec<FeedCategory>,
}

impl RssFeedFetcher {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.feed_timeout)
            .user_agent("newsbot/0.1")
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            parser: FeedParser::new()?,
            feeds: cfg.feeds.clone(),
        })
    }

    async fn fetch_source(&self, url: &str) -> Result<Vec<NewsItem>> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("{url}: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::Fetch(format!("{url}: http {}", resp.status())));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Error::Fetch(format!("{url}: {e}")))?;
        self.parser.parse(&body)
    }
}

#[async_trait]
impl FeedSource for RssFeedFetcher {
    async fn fetch_items(&self, category: &str, limit: usize) -> Vec<NewsItem> {
        let Some(feed) = self.feeds.iter().find(|f| f.name == category) else {
            return Vec::new();
        };

        let mut all = Vec::new();
        for url in &feed.urls {
            match self.fetch_source(url).await {
                Ok(items) => {
                    debug!(url = %url, count = items.len(), "fetched feed");
                    all.extend(items);
                }
                Err(e) => warn!(url = %url, category, "feed source failed: {e}"),
            }
        }

        sort_newest_first(&mut all);
        all.truncate(limit);
        all
    }
}

/// Newest first by parsed time. Items without a parseable time go last, ordered
/// by their raw timestamp string.
pub fn sort_newest_first(items: &mut [NewsItem]) {
    items.sort_by(|a, b| match (a.published_at, b.published_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.published.cmp(&a.published),
    });
}

pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Regex-based extractor for the subset of RSS/Atom we need.
pub struct FeedParser {
    item: Regex,
    entry: Regex,
    title: Regex,
    link_text: Regex,
    link_tag: Regex,
    href: Regex,
    rel: Regex,
    summaries: Vec<Regex>,
    dates: Vec<Regex>,
    cdata: Regex,
    tags: Regex,
    numeric_entity: Regex,
}

impl FeedParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            item: compile(r"(?is)<item(?:\s[^>]*)?>(.*?)</item\s*>")?,
            entry: compile(r"(?is)<entry(?:\s[^>]*)?>(.*?)</entry\s*>")?,
            title: element("title")?,
            link_text: element("link")?,
            link_tag: compile(r"(?is)<link\b([^>]*?)/?>")?,
            href: compile(r#"(?is)\bhref\s*=\s*["']([^"']+)["']"#)?,
            rel: compile(r#"(?is)\brel\s*=\s*["']([^"']+)["']"#)?,
            summaries: vec![
                element("description")?,
                element("summary")?,
                element("content:encoded")?,
                element("content")?,
            ],
            dates: vec![
                element("pubDate")?,
                element("published")?,
                element("updated")?,
                element("dc:date")?,
            ],
            cdata: compile(r"(?s)<!\[CDATA\[(.*?)\]\]>")?,
            tags: compile(r"(?s)<[A-Za-z/!][^>]*>")?,
            numeric_entity: compile(r"&#(x[0-9a-fA-F]+|[0-9]+);")?,
        })
    }

    /// Parse a feed document. A document with neither items nor a channel
    /// title is treated as malformed.
    pub fn parse(&self, xml: &str) -> Result<Vec<NewsItem>> {
        let first_block = self
            .item
            .find(xml)
            .or_else(|| self.entry.find(xml))
            .map(|m| m.start())
            .unwrap_or(xml.len());

        let source = self
            .first_text(&self.title, &xml[..first_block])
            .map(|t| self.plain_text(&t))
            .filter(|t| !t.is_empty());

        let blocks: Vec<&str> = if self.item.is_match(xml) {
            self.item
                .captures_iter(xml)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect()
        } else {
            self.entry
                .captures_iter(xml)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect()
        };

        if blocks.is_empty() && source.is_none() {
            return Err(Error::Fetch("document is not an RSS or Atom feed".to_string()));
        }

        let source = source.unwrap_or_else(|| "Unknown".to_string());
        let items = blocks
            .into_iter()
            .filter_map(|block| self.parse_block(block, &source))
            .collect();
        Ok(items)
    }

    fn parse_block(&self, block: &str, source: &str) -> Option<NewsItem> {
        let title = self
            .first_text(&self.title, block)
            .map(|t| self.plain_text(&t))
            .unwrap_or_default();
        let link = self.link(block).unwrap_or_default();
        if title.is_empty() && link.is_empty() {
            return None;
        }

        let summary = self
            .summaries
            .iter()
            .find_map(|re| self.first_text(re, block))
            .map(|s| truncate_text(&self.plain_text(&s), SUMMARY_MAX_CHARS))
            .unwrap_or_default();

        let published = self
            .dates
            .iter()
            .find_map(|re| self.first_text(re, block))
            .map(|s| self.decode(&s).trim().to_string())
            .unwrap_or_default();

        Some(NewsItem {
            title,
            summary,
            link,
            published_at: parse_published(&published),
            published,
            source: source.to_string(),
        })
    }

    fn link(&self, block: &str) -> Option<String> {
        if let Some(text) = self.first_text(&self.link_text, block) {
            let text = self.decode(&text).trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }

        // Atom: <link rel="alternate" href="..."/>; a missing rel means alternate.
        self.link_tag.captures_iter(block).find_map(|c| {
            let attrs = c.get(1)?.as_str();
            let rel = self
                .rel
                .captures(attrs)
                .and_then(|r| r.get(1))
                .map(|m| m.as_str().to_lowercase());
            if matches!(rel.as_deref(), None | Some("alternate")) {
                let href = self.href.captures(attrs)?.get(1)?.as_str();
                return Some(self.decode(href));
            }
            None
        })
    }

    fn first_text(&self, re: &Regex, haystack: &str) -> Option<String> {
        let raw = re.captures(haystack)?.get(1)?.as_str();
        let unwrapped = self.cdata.replace_all(raw, "$1").to_string();
        if unwrapped.trim().is_empty() {
            return None;
        }
        Some(unwrapped)
    }

    /// Drop markup, decode entities, collapse whitespace. Escaped HTML
    /// only becomes markup after decoding, so tags are stripped twice.
    fn plain_text(&self, s: &str) -> String {
        let raw = self.tags.replace_all(s, " ");
        let decoded = self.decode(&raw);
        let stripped = self.tags.replace_all(&decoded, " ");
        squash_whitespace(&stripped.replace("&nbsp;", " "))
    }

    fn decode(&self, s: &str) -> String {
        let numeric = self.numeric_entity.replace_all(s, |c: &regex::Captures<'_>| {
            let code = &c[1];
            let n = match code.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => code.parse::<u32>().ok(),
            };
            n.and_then(char::from_u32)
                .map(|ch| ch.to_string())
                .unwrap_or_default()
        });
        numeric
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&apos;", "'")
            .replace("&amp;", "&")
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Config(format!("bad feed pattern {pattern}: {e}")))
}

fn element(name: &str) -> Result<Regex> {
    let name = regex::escape(name);
    compile(&format!(r"(?is)<{name}(?:\s[^>]*)?>(.*?)</{name}\s*>"))
}

/// Serves a fixed set of items per category (tests, offline runs).
pub struct StaticFeedSource {
    items: Vec<(String, NewsItem)>,
}

impl StaticFeedSource {
    pub fn new(items: Vec<(String, NewsItem)>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl FeedSource for StaticFeedSource {
    async fn fetch_items(&self, category: &str, limit: usize) -> Vec<NewsItem> {
        let mut out: Vec<NewsItem> = self
            .items
            .iter()
            .filter(|(c, _)| c == category)
            .map(|(_, i)| i.clone())
            .collect();
        sort_newest_first(&mut out);
        out.truncate(limit);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Tech Daily</title>
  <link>https://tech.example</link>
  <item>
    <title><![CDATA[Older &amp; wiser]]></title>
    <link>https://tech.example/older</link>
    <description>&lt;p&gt;Some &lt;b&gt;bold&lt;/b&gt; text&lt;/p&gt;</description>
    <pubDate>Mon, 06 Jan 2025 08:00:00 GMT</pubDate>
  </item>
  <item>
    <title>Newer</title>
    <link>https://tech.example/newer</link>
    <description><![CDATA[<p>Fresh</p>]]></description>
    <pubDate>Tue, 07 Jan 2025 08:00:00 +0000</pubDate>
  </item>
</channel></rss>"#;

    const ATOM: &str = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="text">Atom News</title>
  <entry>
    <title>Entry one</title>
    <link rel="self" href="https://atom.example/self"/>
    <link rel="alternate" href="https://atom.example/one"/>
    <summary>Hello&#32;world &#x263A;</summary>
    <updated>2025-01-08T10:00:00Z</updated>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_items_with_cdata_and_entities() {
        let p = FeedParser::new().unwrap();
        let items = p.parse(RSS).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Older & wiser");
        assert_eq!(items[0].summary, "Some bold text");
        assert_eq!(items[0].source, "Tech Daily");
        assert_eq!(items[0].link, "https://tech.example/older");
        assert!(items[0].published_at.is_some());
        assert_eq!(items[1].summary, "Fresh");
    }

    #[test]
    fn parses_atom_alternate_link() {
        let p = FeedParser::new().unwrap();
        let items = p.parse(ATOM).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].link, "https://atom.example/one");
        assert_eq!(items[0].summary, "Hello world ☺");
        assert_eq!(items[0].source, "Atom News");
    }

    #[test]
    fn escaped_angle_brackets_survive_in_text() {
        let p = FeedParser::new().unwrap();
        let xml = "<rss><channel><title>Markets</title><item><title>Rates</title>\
            <description>Inflation 3% &lt; forecast, rates &gt; 4% now</description>\
            </item></channel></rss>";
        let items = p.parse(xml).unwrap();
        assert_eq!(items[0].summary, "Inflation 3% < forecast, rates > 4% now");
    }

    #[test]
    fn long_summary_is_truncated_with_ellipsis() {
        let p = FeedParser::new().unwrap();
        let body = "x".repeat(500);
        let xml = format!(
            "<rss><channel><title>T</title><item><title>a</title><description>{body}</description></item></channel></rss>"
        );
        let items = p.parse(&xml).unwrap();
        assert_eq!(items[0].summary.chars().count(), SUMMARY_MAX_CHARS + 3);
        assert!(items[0].summary.ends_with("..."));
    }

    #[test]
    fn rejects_non_feed_documents() {
        let p = FeedParser::new().unwrap();
        assert!(p.parse("<html><body>nope</body></html>").is_err());
    }

    #[test]
    fn sorts_by_parsed_time_not_string() {
        let p = FeedParser::new().unwrap();
        let mut items = p.parse(RSS).unwrap();
        // Mixed formats: raw string order would rank the ISO timestamp last.
        items.push(NewsItem {
            title: "iso".to_string(),
            summary: String::new(),
            link: "l".to_string(),
            published: "2025-01-06T12:00:00Z".to_string(),
            published_at: parse_published("2025-01-06T12:00:00Z"),
            source: "s".to_string(),
        });
        items.push(NewsItem {
            title: "undated".to_string(),
            summary: String::new(),
            link: "l".to_string(),
            published: "zzz".to_string(),
            published_at: None,
            source: "s".to_string(),
        });
        sort_newest_first(&mut items);
        let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Newer", "iso", "Older & wiser", "undated"]);
    }

    #[tokio::test]
    async fn static_source_filters_and_limits() {
        let mk = |t: &str, ts: &str| NewsItem {
            title: t.to_string(),
            summary: String::new(),
            link: String::new(),
            published: ts.to_string(),
            published_at: parse_published(ts),
            source: "s".to_string(),
        };
        let src = StaticFeedSource::new(vec![
            ("tech".to_string(), mk("a", "2025-01-01T00:00:00Z")),
            ("tech".to_string(), mk("b", "2025-01-02T00:00:00Z")),
            ("tech".to_string(), mk("c", "2025-01-03T00:00:00Z")),
            ("general".to_string(), mk("g", "2025-01-04T00:00:00Z")),
        ]);
        let items = src.fetch_items("tech", 2).await;
        let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["c", "b"]);
        assert!(src.fetch_items("sports", 5).await.is_empty());
    }
}
