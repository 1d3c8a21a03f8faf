//! Error types for the suspension engine
//!
//! Expected rejections (already suspended, not suspended, already running) are
//! reported as outcome variants instead; everything here is a real failure.

use thiserror::Error;

/// Errors that can occur while suspending or restoring a channel
#[derive(Debug, Error)]
pub enum SuspensionError {
    /// A task was scheduled for a point in time that is not in the future
    #[error("Scheduled time must be in the future")]
    InvalidDueTime,

    /// The requested duration is not usable
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// The timer primitive is unavailable (no runtime, or scheduler shut down)
    #[error("Scheduling failure: {0}")]
    SchedulingFailure(String),

    /// Reading or writing the access override failed
    #[error("Access store error: {0}")]
    AccessStore(String),

    /// Discord API error
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<poise::serenity_prelude::Error>),

    /// The notification sink could not deliver an audit event
    #[error("Notification error: {0}")]
    Notification(String),
}

impl From<poise::serenity_prelude::Error> for SuspensionError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        Self::DiscordApi(Box::new(error))
    }
}

impl SuspensionError {
    /// Short notice suitable for replying to the invoking user
    #[must_use]
    pub fn user_notice(&self) -> String {
        match self {
            Self::InvalidDuration(reason) => format!("invalid duration: {reason}"),
            Self::InvalidDueTime => "that duration has already elapsed".to_string(),
            Self::SchedulingFailure(_) => {
                "could not schedule the automatic unsilence, the channel was left untouched"
                    .to_string()
            }
            Self::AccessStore(_) | Self::DiscordApi(_) => {
                "could not update the channel permissions".to_string()
            }
            Self::Notification(_) => "could not write to the moderation log".to_string(),
        }
    }
}

/// Result type for suspension operations
pub type SuspensionResult<T> = Result<T, SuspensionError>;
