//! Channel suspension engine
//!
//! Silences channels for the guest role and lifts the silence again, either on
//! request or automatically once the requested time has passed.

pub mod clock;
mod controller;
mod error;
mod notify;
mod record;
mod scheduler;
mod store;

pub use clock::{Clock, SystemClock};
pub use controller::{RestorationOutcome, ScheduledRestore, SuspensionController, SuspensionOutcome};
pub use error::{SuspensionError, SuspensionResult};
pub use notify::{AuditAction, AuditDetail, AuditEvent, ModLogSink, NotificationSink, TracingSink};
pub use record::{AccessOverride, SuspensionLength, SuspensionRecord};
pub use scheduler::{BoxFuture, Scheduler, TaskCallback};
pub use store::{AccessStore, DiscordAccessStore};

#[cfg(test)]
pub(crate) use store::memory::MemoryAccessStore;
