use crate::{
    Context, ERROR_REPLIES, Error,
    checks::{is_moderator, is_staff},
    duration::DurationArg,
    guard::OperationOutcome,
    suspension::{
        RestorationOutcome, SuspensionError, SuspensionLength, SuspensionOutcome, SuspensionRecord,
    },
};
use poise::{
    CreateReply, command,
    serenity_prelude::{Colour, CreateEmbed},
};
use rand::seq::IndexedRandom;
use std::fmt::Write;

const CHECK_MARK: &str = "✅";
const CROSS_MARK: &str = "❌";

/// Description of the embed sent when a guarded command is already running
pub const ALREADY_RUNNING_DESCRIPTION: &str =
    "You're already using this command. Please wait until it is done before you use it again.";

/// Silence the current channel for `duration` minutes or `forever`
///
/// Duration is capped for members without a moderation role.
#[command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Moderation",
    aliases("hush", "mutechat"),
    check = "is_staff"
)]
pub async fn silence(
    ctx: Context<'_>,
    #[description = "Minutes, or `forever`"] duration: Option<String>,
) -> Result<(), Error> {
    let requested = match duration.as_deref().map(str::parse::<DurationArg>).transpose() {
        Ok(requested) => requested,
        Err(err) => {
            ctx.say(format!("{CROSS_MARK} {}.", err.user_notice())).await?;
            return Ok(());
        }
    };
    let privileged = is_moderator(ctx).await;
    let length = ctx.data().config.silence.resolve(requested, privileged);

    let data = ctx.data();
    let channel_id = ctx.channel_id();
    let actor_id = ctx.author().id;
    let operation = ctx.command().qualified_name.clone();

    let outcome = data
        .guard
        .guarded_invoke(actor_id, &operation, || async move {
            let result = data.controller.suspend(channel_id, actor_id, length).await;
            reply_with(ctx, result.map(|outcome| suspension_reply(&outcome, length))).await
        })
        .await;

    match outcome {
        OperationOutcome::Ran(result) => result,
        OperationOutcome::Rejected(_) => reply_already_running(ctx).await,
    }
}

/// Unsilence the current channel
#[command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Moderation",
    aliases("unhush", "unmutechat"),
    check = "is_staff"
)]
pub async fn unsilence(ctx: Context<'_>) -> Result<(), Error> {
    let data = ctx.data();
    let channel_id = ctx.channel_id();
    let actor_id = ctx.author().id;
    let operation = ctx.command().qualified_name.clone();

    let outcome = data
        .guard
        .guarded_invoke(actor_id, &operation, || async move {
            let result = data.controller.restore(channel_id, actor_id).await;
            reply_with(ctx, result.map(|outcome| restoration_reply(&outcome))).await
        })
        .await;

    match outcome {
        OperationOutcome::Ran(result) => result,
        OperationOutcome::Rejected(_) => reply_already_running(ctx).await,
    }
}

/// List the channels that are currently silenced
#[command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Moderation",
    check = "is_staff"
)]
pub async fn silenced(ctx: Context<'_>) -> Result<(), Error> {
    let records = ctx.data().controller.suspended();
    ctx.say(silenced_listing(&records)).await?;
    Ok(())
}

/// Send the reply text, or the error notice before handing the error on
async fn reply_with(
    ctx: Context<'_>,
    result: Result<String, SuspensionError>,
) -> Result<(), Error> {
    match result {
        Ok(reply) => {
            ctx.say(reply).await?;
            Ok(())
        }
        Err(err) => {
            ctx.say(format!("{CROSS_MARK} {}.", err.user_notice())).await?;
            Err(err.into())
        }
    }
}

async fn reply_already_running(ctx: Context<'_>) -> Result<(), Error> {
    ctx.send(CreateReply::default().embed(already_running_embed()))
        .await?;
    Ok(())
}

fn already_running_embed() -> CreateEmbed {
    let title = ERROR_REPLIES
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or("Please don't do that.");
    CreateEmbed::new()
        .title(title)
        .description(ALREADY_RUNNING_DESCRIPTION)
        .colour(Colour::RED)
}

fn suspension_reply(outcome: &SuspensionOutcome, length: SuspensionLength) -> String {
    match (outcome, length) {
        (SuspensionOutcome::AlreadySuspended, _) => {
            format!("{CROSS_MARK} current channel is already silenced.")
        }
        (SuspensionOutcome::Applied { .. }, SuspensionLength::Indefinite) => {
            format!("{CHECK_MARK} silenced current channel indefinitely.")
        }
        (SuspensionOutcome::Applied { .. }, SuspensionLength::Minutes(minutes)) => {
            format!("{CHECK_MARK} silenced current channel for {minutes} minute(s).")
        }
    }
}

fn restoration_reply(outcome: &RestorationOutcome) -> String {
    match outcome {
        RestorationOutcome::Applied => format!("{CHECK_MARK} unsilenced current channel."),
        RestorationOutcome::NotSuspended => format!("{CROSS_MARK} current channel is not silenced."),
    }
}

fn silenced_listing(records: &[SuspensionRecord]) -> String {
    if records.is_empty() {
        return "No channels are silenced.".to_string();
    }

    let mut listing = format!("**Silenced channels ({}):**", records.len());
    for record in records {
        let until = record.expires_at.map_or_else(
            || "indefinitely".to_string(),
            |expires_at| format!("until <t:{}:R>", expires_at.timestamp()),
        );
        let _ = write!(
            listing,
            "\n<#{}> by <@{}>, {until}",
            record.channel_id, record.actor_id
        );
    }
    listing
}
