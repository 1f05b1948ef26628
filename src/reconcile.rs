//! The reconciliation tick: turn every pending record into a role-state
//! transition on Discord. One record at a time, partial failure tolerated
//! per record, nothing written back to the store.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::discord::cache::DirectoryCache;
use crate::discord::rest::{DiscordRest, RestError};
use crate::discord::types::{GuildId, RoleId, UserId};
use crate::store::RecordStore;

pub const REMOVE_REASON: &str = "Status 2 - Rank cleanup";
pub const ASSIGN_REASON: &str = "Status 2 - Assigned target rank";

/// A tick request sent to the reconcile worker. Manual triggers attach a
/// completion channel; timer triggers do not.
pub struct TickRequest {
    pub done: Option<oneshot::Sender<()>>,
}

/// What a tick needs from Discord, abstracted for testing.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Cache-only guild lookup.
    async fn guild_known(&self, guild: GuildId) -> bool;
    /// Cache first, remote fetch on miss. `RestError::NotFound` means the
    /// member is not in the guild.
    async fn member_roles(&self, guild: GuildId, user: UserId) -> Result<Vec<RoleId>, RestError>;
    /// Cache-only role lookup.
    async fn role_known(&self, guild: GuildId, role: RoleId) -> bool;
    /// Bulk-remove exactly `roles` from the member, as one call.
    async fn remove_roles(
        &self,
        guild: GuildId,
        user: UserId,
        roles: &[RoleId],
        reason: &str,
    ) -> Result<(), RestError>;
    async fn add_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
        reason: &str,
    ) -> Result<(), RestError>;
}

/// Gateway cache plus REST fallback.
pub struct LiveDirectory {
    cache: Arc<DirectoryCache>,
    rest: DiscordRest,
}

impl LiveDirectory {
    pub fn new(cache: Arc<DirectoryCache>, rest: DiscordRest) -> Self {
        Self { cache, rest }
    }
}

#[async_trait]
impl Directory for LiveDirectory {
    async fn guild_known(&self, guild: GuildId) -> bool {
        self.cache.guild_known(guild).await
    }

    async fn member_roles(&self, guild: GuildId, user: UserId) -> Result<Vec<RoleId>, RestError> {
        if let Some(roles) = self.cache.member_roles(guild, user).await {
            return Ok(roles);
        }
        let member = self.rest.get_guild_member(guild, user).await?;
        Ok(member.roles)
    }

    async fn role_known(&self, guild: GuildId, role: RoleId) -> bool {
        self.cache.role_known(guild, role).await
    }

    async fn remove_roles(
        &self,
        guild: GuildId,
        user: UserId,
        _roles: &[RoleId],
        reason: &str,
    ) -> Result<(), RestError> {
        // The tick always removes the member's entire non-everyone role set,
        // so the bulk update clears the list outright.
        self.rest
            .replace_member_roles(guild, user, &[], reason)
            .await
    }

    async fn add_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
        reason: &str,
    ) -> Result<(), RestError> {
        self.rest.add_member_role(guild, user, role, reason).await
    }
}

enum RecordOutcome {
    Updated { removed: usize },
    GuildNotFound,
    MemberNotFound,
    TargetRoleMissing { removed: usize },
}

/// One full reconciliation pass. A store failure aborts the tick; everything
/// per-record is logged and skipped.
pub async fn run_tick(
    store: &dyn RecordStore,
    directory: &dyn Directory,
    target_role: RoleId,
) -> Result<()> {
    let records = store
        .pending_rank_changes()
        .await
        .context("fetching pending rank changes")?;

    if records.is_empty() {
        tracing::debug!("no users with status=2 found");
        return Ok(());
    }

    tracing::info!("found {} users to update", records.len());

    for record in &records {
        match reconcile_record(directory, record.guild_id, record.user_id, target_role).await {
            Ok(RecordOutcome::Updated { removed }) => {
                if removed > 0 {
                    tracing::info!("removed {} roles from user {}", removed, record.user_id);
                }
                tracing::info!("added rank {} to user {}", target_role, record.user_id);
            }
            Ok(RecordOutcome::GuildNotFound) => {
                tracing::warn!("guild {} not found", record.guild_id);
            }
            Ok(RecordOutcome::MemberNotFound) => {
                tracing::warn!(
                    "member {} not found in guild {}",
                    record.user_id,
                    record.guild_id
                );
            }
            Ok(RecordOutcome::TargetRoleMissing { removed }) => {
                if removed > 0 {
                    tracing::info!("removed {} roles from user {}", removed, record.user_id);
                }
                tracing::warn!(
                    "target role {} not found in guild {}",
                    target_role,
                    record.guild_id
                );
            }
            Err(RestError::Forbidden) => {
                tracing::warn!(
                    "missing permissions to modify roles for user {}",
                    record.user_id
                );
            }
            Err(e) => {
                tracing::error!("error processing user {}: {}", record.user_id, e);
            }
        }
    }

    Ok(())
}

async fn reconcile_record(
    directory: &dyn Directory,
    guild: GuildId,
    user: UserId,
    target_role: RoleId,
) -> Result<RecordOutcome, RestError> {
    if !directory.guild_known(guild).await {
        return Ok(RecordOutcome::GuildNotFound);
    }

    let roles = match directory.member_roles(guild, user).await {
        Ok(roles) => roles,
        Err(RestError::NotFound) => return Ok(RecordOutcome::MemberNotFound),
        Err(e) => return Err(e),
    };

    let everyone = guild.everyone_role();
    let current: Vec<RoleId> = roles.into_iter().filter(|r| *r != everyone).collect();

    if !current.is_empty() {
        directory
            .remove_roles(guild, user, &current, REMOVE_REASON)
            .await?;
    }

    if !directory.role_known(guild, target_role).await {
        return Ok(RecordOutcome::TargetRoleMissing {
            removed: current.len(),
        });
    }

    directory
        .add_role(guild, user, target_role, ASSIGN_REASON)
        .await?;

    Ok(RecordOutcome::Updated {
        removed: current.len(),
    })
}
