//! Suspension records and access overrides
//!
//! A record holds everything needed to put a channel back exactly the way it
//! was before it was silenced.

use chrono::{DateTime, Duration, Utc};
use poise::serenity_prelude::{ChannelId, Permissions, UserId};
use std::fmt;
use uuid::Uuid;

/// Explicit permission overwrite for the guest role on one channel
///
/// The store reports `Option<AccessOverride>`; `None` means the channel has no
/// overwrite for the role at all, which is different from an empty one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessOverride {
    pub allow: Permissions,
    pub deny: Permissions,
}

impl Default for AccessOverride {
    fn default() -> Self {
        Self {
            allow: Permissions::empty(),
            deny: Permissions::empty(),
        }
    }
}

impl AccessOverride {
    #[must_use]
    pub fn new(allow: Permissions, deny: Permissions) -> Self {
        Self { allow, deny }
    }

    /// Whether sending messages is explicitly denied
    #[must_use]
    pub fn denies_sending(&self) -> bool {
        self.deny.contains(Permissions::SEND_MESSAGES)
    }

    /// The override applied while silenced: `previous` with sending denied
    #[must_use]
    pub fn silenced(previous: Option<Self>) -> Self {
        let base = previous.unwrap_or_default();
        Self {
            allow: base.allow - Permissions::SEND_MESSAGES,
            deny: base.deny | Permissions::SEND_MESSAGES,
        }
    }

    /// This override with the sending denial lifted and everything else kept
    #[must_use]
    pub fn unsilenced(&self) -> Self {
        Self {
            allow: self.allow,
            deny: self.deny - Permissions::SEND_MESSAGES,
        }
    }
}

/// How long to suspend a channel for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuspensionLength {
    /// A whole number of minutes
    Minutes(u32),
    /// Until someone restores it
    Indefinite,
}

impl SuspensionLength {
    /// Duration of a timed suspension
    #[must_use]
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Minutes(minutes) => Some(Duration::minutes(i64::from(*minutes))),
            Self::Indefinite => None,
        }
    }
}

impl fmt::Display for SuspensionLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minutes(minutes) => write!(f, "{minutes} minute(s)"),
            Self::Indefinite => write!(f, "forever"),
        }
    }
}

/// A channel that is currently silenced
#[derive(Debug, Clone)]
pub struct SuspensionRecord {
    /// Generation of this suspension; a scheduled restore only acts on the
    /// generation it was scheduled for
    pub id: Uuid,
    pub channel_id: ChannelId,
    /// Who silenced the channel
    pub actor_id: UserId,
    /// Overwrite in place immediately before the channel was silenced
    pub previous: Option<AccessOverride>,
    pub length: SuspensionLength,
    pub suspended_at: DateTime<Utc>,
    /// `None` for indefinite suspensions
    pub expires_at: Option<DateTime<Utc>>,
}

impl SuspensionRecord {
    /// Create a record for a suspension starting at `now`
    #[must_use]
    pub fn new(
        channel_id: ChannelId,
        actor_id: UserId,
        previous: Option<AccessOverride>,
        length: SuspensionLength,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel_id,
            actor_id,
            previous,
            length,
            suspended_at: now,
            expires_at: length.as_duration().map(|duration| now + duration),
        }
    }

    #[must_use]
    pub fn is_indefinite(&self) -> bool {
        self.expires_at.is_none()
    }
}
