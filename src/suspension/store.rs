//! Access override storage
//!
//! The controller only ever talks to the permission layer through
//! [`AccessStore`], which keeps the state machine independent of Discord.

use crate::suspension::{AccessOverride, SuspensionError, SuspensionResult};
use poise::serenity_prelude::{
    ChannelId, Http, PermissionOverwrite, PermissionOverwriteType, RoleId,
};
use std::sync::Arc;
use tracing::debug;

/// Reads and writes the guest role's overwrite on a channel
#[async_trait::async_trait]
pub trait AccessStore: Send + Sync {
    /// The current overwrite, or `None` if the channel has none for the role
    async fn get_override(&self, channel_id: ChannelId) -> SuspensionResult<Option<AccessOverride>>;

    /// Replace the overwrite; `None` removes it
    async fn set_override(
        &self,
        channel_id: ChannelId,
        access: Option<AccessOverride>,
    ) -> SuspensionResult<()>;
}

/// Access store backed by Discord channel permission overwrites
pub struct DiscordAccessStore {
    http: Arc<Http>,
    role_id: RoleId,
}

impl DiscordAccessStore {
    #[must_use]
    pub fn new(http: Arc<Http>, role_id: RoleId) -> Self {
        Self { http, role_id }
    }
}

#[async_trait::async_trait]
impl AccessStore for DiscordAccessStore {
    async fn get_override(&self, channel_id: ChannelId) -> SuspensionResult<Option<AccessOverride>> {
        let http: &Http = &self.http;
        let channel = channel_id.to_channel(http).await?.guild().ok_or_else(|| {
            SuspensionError::AccessStore(format!("Channel {channel_id} is not a guild channel"))
        })?;

        let kind = PermissionOverwriteType::Role(self.role_id);
        Ok(channel
            .permission_overwrites
            .iter()
            .find(|overwrite| overwrite.kind == kind)
            .map(|overwrite| AccessOverride::new(overwrite.allow, overwrite.deny)))
    }

    async fn set_override(
        &self,
        channel_id: ChannelId,
        access: Option<AccessOverride>,
    ) -> SuspensionResult<()> {
        let http: &Http = &self.http;
        let kind = PermissionOverwriteType::Role(self.role_id);

        match access {
            Some(access) => {
                debug!("Writing overwrite {access:?} for role {} on channel {channel_id}", self.role_id);
                channel_id
                    .create_permission(
                        http,
                        PermissionOverwrite {
                            allow: access.allow,
                            deny: access.deny,
                            kind,
                        },
                    )
                    .await?;
            }
            None => {
                debug!("Removing overwrite for role {} on channel {channel_id}", self.role_id);
                channel_id.delete_permission(http, kind).await?;
            }
        }

        Ok(())
    }
}
