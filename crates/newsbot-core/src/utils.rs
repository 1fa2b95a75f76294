use chrono::{Local, NaiveDate};

/// Truncate to `max_len` characters, appending `...` when anything was cut.
pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

/// Today's date in service-local time (stats day buckets).
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Collapse runs of whitespace (feed summaries are often pretty-printed).
pub fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
