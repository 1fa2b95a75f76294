use std::path::PathBuf;

/// Core error type.
///
/// Adapter crates should map their specific errors into this type so the bot
/// core can handle failures consistently (user-facing apology vs logged and skipped).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("feed fetch error: {0}")]
    Fetch(String),

    #[error("persistence error: {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    #[error("delivery error: {0}")]
    Delivery(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Mistakes in what a user typed.
///
/// The `Display` text is the corrective reply sent back to the same user. These
/// never mutate state and never reach the transport as failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("Unknown category '{given}'. Available categories: {available}")]
    UnknownCategory { given: String, available: String },

    #[error("Missing argument. Usage: {usage}")]
    MissingArgument { usage: String },

    #[error("'{0}' is not a valid user id.")]
    MalformedUserId(String),

    #[error("Unknown command /{0}. Use /help to see available commands.")]
    UnknownCommand(String),

    #[error("This command is only available to administrators.")]
    NotAdmin,
}
