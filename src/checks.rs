//! Role checks gating the silence commands

use crate::{COMMAND_TARGET, Context, Error};
use poise::serenity_prelude::RoleId;
use tracing::debug;

/// Whether any of `member_roles` is in `allowed`
#[must_use]
pub fn has_any_role(member_roles: &[RoleId], allowed: &[RoleId]) -> bool {
    member_roles.iter().any(|role| allowed.contains(role))
}

async fn author_has_any(ctx: Context<'_>, allowed: &[RoleId]) -> bool {
    let Some(member) = ctx.author_member().await else {
        return false;
    };
    has_any_role(&member.roles, allowed)
}

/// Poise check: the author holds one of the configured staff roles
///
/// # Errors
/// Never fails; a missing member counts as not staff.
pub async fn is_staff(ctx: Context<'_>) -> Result<bool, Error> {
    let allowed = ctx.data().config.staff_roles();
    let ok = author_has_any(ctx, &allowed).await;
    if !ok {
        debug!(
            target: COMMAND_TARGET,
            user_id = %ctx.author().id,
            command = %ctx.command().qualified_name,
            "Author lacks a staff role"
        );
    }
    Ok(ok)
}

/// Whether the author holds one of the configured moderation roles
pub async fn is_moderator(ctx: Context<'_>) -> bool {
    let allowed = ctx.data().config.moderation_roles();
    author_has_any(ctx, &allowed).await
}
