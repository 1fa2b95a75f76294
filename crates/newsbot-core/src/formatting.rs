//! Formatting utilities (Telegram HTML for news items and headers).

use crate::feeds::NewsItem;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// One news item as a standalone message: bold title, summary, source and a link.
pub fn format_news_item(icon: &str, item: &NewsItem) -> String {
    let mut out = format!("{icon} <b>{}</b>", escape_html(&item.title));
    if !item.summary.is_empty() {
        out.push_str("\n\n");
        out.push_str(&escape_html(&item.summary));
    }
    if !item.source.is_empty() {
        out.push_str(&format!("\n\n<i>{}</i>", escape_html(&item.source)));
    }
    if !item.link.is_empty() {
        out.push_str(&format!(
            "\n\n<a href=\"{}\">Read more</a>",
            escape_html(&item.link)
        ));
    }
    out
}

/// Header sent before a scheduled digest.
pub fn format_digest_header(category: &str) -> String {
    format!(
        "📰 <b>Daily {} News Update</b>",
        escape_html(&title_case(category))
    )
}

/// Icon used for on-demand news replies, per category.
pub fn category_icon(category: &str) -> &'static str {
    match category {
        "tech" => "💻",
        "business" => "💼",
        _ => "📰",
    }
}

pub fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
