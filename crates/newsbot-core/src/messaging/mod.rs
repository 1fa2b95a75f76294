//! Chat transport abstractions (Telegram today, anything with send/receive later).

pub mod paced;
pub mod port;
pub mod types;
