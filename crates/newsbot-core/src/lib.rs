//! Core domain + application logic for the news bot.
//!
//! This crate is framework-agnostic. The chat transport lives behind
//! `MessagingPort`, news sources behind `FeedSource`; adapters implement them.

pub mod broadcast;
pub mod commands;
pub mod config;
pub mod domain;
pub mod errors;
pub mod feeds;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod persist;
pub mod rate_limit;
pub mod scheduler;
pub mod stats;
pub mod users;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, InputError, Result};
