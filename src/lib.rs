pub mod checks;
pub mod commands;
pub mod config;
pub mod data;
pub mod duration;
pub mod guard;
pub mod handlers;
pub mod logging;
pub mod suspension;

// Customize these constants for your bot
pub const BOT_NAME: &str = "hushbot";
pub const COMMAND_TARGET: &str = "hushbot::command";
pub const ERROR_TARGET: &str = "hushbot::error";
pub const EVENT_TARGET: &str = "hushbot::handlers";
pub const SUSPENSION_TARGET: &str = "hushbot::suspension";
pub const CONSOLE_TARGET: &str = "hushbot";

/// Titles for embeds that report a refused invocation
pub const ERROR_REPLIES: &[&str] = &[
    "Please don't do that.",
    "You have to stop.",
    "Do you mind?",
    "In the future, don't do that.",
    "That was a mistake.",
    "You blew it.",
    "You're bad at computers.",
    "Are you trying to kill me?",
    "Noooooo!!",
    "I can't believe you've done this",
];

pub use config::Config;
pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
