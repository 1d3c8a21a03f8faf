//! Moderation log notifications
//!
//! Audit events are fire-and-forget: the controller logs a failed delivery and
//! carries on, it never undoes a transition because the log was unreachable.

use crate::SUSPENSION_TARGET;
use crate::suspension::{SuspensionError, SuspensionLength, SuspensionResult};
use derive_more::Display;
use poise::serenity_prelude::{
    ChannelId, Colour, CreateEmbed, CreateMessage, Http, Mentionable, Timestamp, UserId,
};
use std::sync::Arc;
use tracing::info;

const SOFT_RED: Colour = Colour::new(0x00cd_6d6d);
const SOFT_GREEN: Colour = Colour::new(0x0068_c290);
const SOFT_ORANGE: Colour = Colour::new(0x00f9_cb54);

/// What happened to the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AuditAction {
    #[display("Channel silenced")]
    Suspended,
    #[display("Channel unsilenced")]
    Restored,
    #[display("Silence request rejected")]
    Rejected,
}

/// Extra detail attached to an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AuditDetail {
    #[display("{_0} minute(s)")]
    Minutes(u32),
    #[display("forever")]
    Indefinite,
    #[display("already silenced")]
    AlreadySuspended,
    #[display("not silenced")]
    NotFound,
    #[display("-")]
    Empty,
}

impl From<SuspensionLength> for AuditDetail {
    fn from(length: SuspensionLength) -> Self {
        match length {
            SuspensionLength::Minutes(minutes) => Self::Minutes(minutes),
            SuspensionLength::Indefinite => Self::Indefinite,
        }
    }
}

/// A single entry for the moderation log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub actor_id: UserId,
    pub channel_id: ChannelId,
    pub action: AuditAction,
    pub detail: AuditDetail,
}

impl AuditEvent {
    #[must_use]
    pub fn new(
        actor_id: UserId,
        channel_id: ChannelId,
        action: AuditAction,
        detail: AuditDetail,
    ) -> Self {
        Self {
            actor_id,
            channel_id,
            action,
            detail,
        }
    }

    /// Body of the mod-log embed
    #[must_use]
    pub fn describe(&self) -> String {
        let mut body = format!(
            "**Channel:** {} (`{}`)\n**Actor:** {} (`{}`)",
            self.channel_id.mention(),
            self.channel_id,
            self.actor_id.mention(),
            self.actor_id,
        );
        match self.detail {
            AuditDetail::Minutes(_) | AuditDetail::Indefinite => {
                body.push_str(&format!("\n**Duration:** {}", self.detail));
            }
            AuditDetail::AlreadySuspended | AuditDetail::NotFound => {
                body.push_str(&format!("\n**Reason:** {}", self.detail));
            }
            AuditDetail::Empty => {}
        }
        body
    }
}

/// Destination for audit events
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: AuditEvent) -> SuspensionResult<()>;
}

/// Posts audit events as embeds to the mod-log channel
pub struct ModLogSink {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ModLogSink {
    #[must_use]
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait::async_trait]
impl NotificationSink for ModLogSink {
    async fn notify(&self, event: AuditEvent) -> SuspensionResult<()> {
        let colour = match event.action {
            AuditAction::Suspended => SOFT_RED,
            AuditAction::Restored => SOFT_GREEN,
            AuditAction::Rejected => SOFT_ORANGE,
        };
        let embed = CreateEmbed::new()
            .title(event.action.to_string())
            .description(event.describe())
            .colour(colour)
            .timestamp(Timestamp::now());

        let http: &Http = &self.http;
        self.channel_id
            .send_message(http, CreateMessage::new().embed(embed))
            .await
            .map_err(|e| {
                SuspensionError::Notification(format!(
                    "Could not post to mod log {}: {e}",
                    self.channel_id
                ))
            })?;
        Ok(())
    }
}

/// Sink that only writes to the tracing log, used when no mod-log channel is
/// configured
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait::async_trait]
impl NotificationSink for TracingSink {
    async fn notify(&self, event: AuditEvent) -> SuspensionResult<()> {
        info!(
            target: SUSPENSION_TARGET,
            actor_id = %event.actor_id,
            channel_id = %event.channel_id,
            action = %event.action,
            detail = %event.detail,
            event = "audit",
            "Moderation event"
        );
        Ok(())
    }
}
