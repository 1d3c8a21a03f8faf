use std::{ops::Deref, sync::Arc};

use crate::{
    config::Config,
    guard::CommandGuard,
    suspension::{
        DiscordAccessStore, ModLogSink, NotificationSink, SuspensionController, SystemClock,
        TracingSink,
    },
};
use poise::serenity_prelude::Http;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared state handed to every command
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("guild", &self.config.guild.id)
            .field("suspended", &self.controller.suspended().len())
            .field("guard_entries", &self.guard.len())
            .field("shutting_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    #[must_use]
    pub fn new(config: Config, controller: Arc<SuspensionController>) -> Self {
        Self(Arc::new(DataInner::new(config, controller)))
    }

    /// Wire the controller to Discord through `http`
    ///
    /// Audit events go to the mod-log channel when one is configured and to
    /// the log otherwise.
    #[must_use]
    pub fn connect(config: Config, http: Arc<Http>) -> Self {
        let store = Arc::new(DiscordAccessStore::new(Arc::clone(&http), config.guests_role()));
        let sink: Arc<dyn NotificationSink> = match config.mod_log_channel() {
            Some(channel_id) => Arc::new(ModLogSink::new(http, channel_id)),
            None => Arc::new(TracingSink),
        };
        let controller = SuspensionController::new(store, sink, Arc::new(SystemClock));
        Self::new(config, controller)
    }

    /// Start the periodic cleanup of idle guard entries
    pub fn spawn_guard_sweeper(&self) -> JoinHandle<()> {
        Arc::clone(&self.guard).spawn_sweeper(
            self.config.guard.sweep_interval(),
            self.config.guard.max_idle(),
            self.shutdown.child_token(),
        )
    }

    /// Stop background work and cancel every pending automatic unsilence
    ///
    /// Channels that are still silenced stay silenced.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.controller.shutdown().await;
    }
}

/// Main centralized data structure for the bot
pub struct DataInner {
    pub config: Config,
    pub controller: Arc<SuspensionController>,
    pub guard: Arc<CommandGuard>,
    /// Cancelled once the bot starts shutting down
    pub shutdown: CancellationToken,
}

impl DataInner {
    #[must_use]
    pub fn new(config: Config, controller: Arc<SuspensionController>) -> Self {
        Self {
            config,
            controller,
            guard: Arc::new(CommandGuard::new()),
            shutdown: CancellationToken::new(),
        }
    }
}
