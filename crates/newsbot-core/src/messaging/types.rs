use crate::domain::{ChatId, UserId};

/// An inbound bot command, already stripped of transport details.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    /// Parse `/name@botname arg1 arg2`. Returns `None` for non-command text.
    pub fn parse(
        chat_id: ChatId,
        user_id: UserId,
        display_name: Option<String>,
        text: &str,
    ) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let mut parts = rest.split_whitespace();
        let head = parts.next()?;
        let name = head.split('@').next().unwrap_or("").to_lowercase();
        if name.is_empty() {
            return None;
        }

        Some(Self {
            chat_id,
            user_id,
            display_name,
            name,
            args: parts.map(str::to_string).collect(),
        })
    }

    pub fn first_arg(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Arguments re-joined with single spaces (free-text payloads like announcements).
    pub fn rest(&self) -> String {
        self.args.join(" ")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    Html,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendOptions {
    pub format: TextFormat,
    pub link_preview: bool,
}

impl SendOptions {
    pub fn plain() -> Self {
        Self {
            format: TextFormat::Plain,
            link_preview: true,
        }
    }

    pub fn html() -> Self {
        Self {
            format: TextFormat::Html,
            link_preview: true,
        }
    }

    pub fn without_preview(mut self) -> Self {
        self.link_preview = false;
        self
    }
}

/// Outgoing "chat action" (typing indicator while fetching).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Option<Command> {
        Command::parse(ChatId(1), UserId(1), None, text)
    }

    #[test]
    fn parses_name_and_args() {
        let c = parse("/subscribe  tech ").unwrap();
        assert_eq!(c.name, "subscribe");
        assert_eq!(c.args, vec!["tech"]);
        assert_eq!(c.first_arg(), Some("tech"));
    }

    #[test]
    fn strips_bot_mention_and_lowercases() {
        let c = parse("/News@my_news_bot Business").unwrap();
        assert_eq!(c.name, "news");
        assert_eq!(c.args, vec!["Business"]);
    }

    #[test]
    fn rejects_plain_text() {
        assert!(parse("hello").is_none());
        assert!(parse("/").is_none());
        assert!(parse("/@bot").is_none());
    }

    #[test]
    fn rest_rejoins_free_text() {
        let c = parse("/broadcast Maintenance   at  noon").unwrap();
        assert_eq!(c.rest(), "Maintenance at noon");
    }
}
