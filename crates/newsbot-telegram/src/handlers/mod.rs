//! Telegram update handlers.
//!
//! Commands are converted into core `Command`s and handed to the command service.
//! Everything else is ignored.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{Message, User},
};
use tracing::debug;

use newsbot_core::{
    domain::{ChatId, UserId},
    messaging::types::Command,
};

use crate::router::AppState;

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(cmd) = to_command(&msg) else {
        debug!(chat_id = msg.chat.id.0, "ignoring non-command message");
        return Ok(());
    };

    state.commands.handle(cmd).await;
    Ok(())
}

fn to_command(msg: &Message) -> Option<Command> {
    let text = msg.text()?;
    let user = msg.from()?;
    Command::parse(
        ChatId(msg.chat.id.0),
        UserId(user.id.0 as i64),
        display_name(user),
        text,
    )
}

/// `@username` when set, otherwise the first name.
fn display_name(user: &User) -> Option<String> {
    user.username
        .clone()
        .or_else(|| Some(user.first_name.clone()))
        .filter(|s| !s.is_empty())
}
