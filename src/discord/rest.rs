//! Discord REST client (API v10).
//!
//! Only the handful of endpoints the reconciler and the two slash commands
//! need. No retries, no rate-limit bookkeeping; a failed call surfaces as a
//! `RestError` and the caller decides whether to skip or abort.

use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use thiserror::Error;

use super::types::{GuildId, GuildMember, RoleId, UserId};

const API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Error)]
pub enum RestError {
    #[error("resource not found")]
    NotFound,
    #[error("missing permissions")]
    Forbidden,
    #[error("discord api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct DiscordRest {
    client: Client,
    token: String,
}

#[derive(Serialize)]
struct RoleUpdate<'a> {
    roles: &'a [RoleId],
}

impl DiscordRest {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(20))
                .build()
                .expect("Failed to build HTTP client"),
            token: token.into(),
        }
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("Authorization", format!("Bot {}", self.token))
    }

    async fn check(res: Response) -> Result<Response, RestError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let message = res.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            403 => RestError::Forbidden,
            404 => RestError::NotFound,
            code => RestError::Api {
                status: code,
                message,
            },
        })
    }

    pub async fn get_guild_member(
        &self,
        guild: GuildId,
        user: UserId,
    ) -> Result<GuildMember, RestError> {
        let res = self
            .authorized(
                self.client
                    .get(format!("{API_BASE}/guilds/{guild}/members/{user}")),
            )
            .send()
            .await?;
        Ok(Self::check(res).await?.json::<GuildMember>().await?)
    }

    /// Replace a member's entire role list with `roles` in one call. This is
    /// the bulk path used for role removal.
    pub async fn replace_member_roles(
        &self,
        guild: GuildId,
        user: UserId,
        roles: &[RoleId],
        reason: &str,
    ) -> Result<(), RestError> {
        let res = self
            .authorized(
                self.client
                    .patch(format!("{API_BASE}/guilds/{guild}/members/{user}"))
                    .header("X-Audit-Log-Reason", reason)
                    .json(&RoleUpdate { roles }),
            )
            .send()
            .await?;
        Self::check(res).await?;
        Ok(())
    }

    pub async fn add_member_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
        reason: &str,
    ) -> Result<(), RestError> {
        let res = self
            .authorized(
                self.client
                    .put(format!(
                        "{API_BASE}/guilds/{guild}/members/{user}/roles/{role}"
                    ))
                    .header("X-Audit-Log-Reason", reason),
            )
            .send()
            .await?;
        Self::check(res).await?;
        Ok(())
    }

    /// Initial response to an interaction (immediate message or deferral).
    pub async fn create_interaction_response(
        &self,
        interaction_id: &str,
        token: &str,
        body: &serde_json::Value,
    ) -> Result<(), RestError> {
        let res = self
            .client
            .post(format!(
                "{API_BASE}/interactions/{interaction_id}/{token}/callback"
            ))
            .json(body)
            .send()
            .await?;
        Self::check(res).await?;
        Ok(())
    }

    /// Edit the original (deferred) interaction response.
    pub async fn edit_original_response(
        &self,
        application_id: u64,
        token: &str,
        content: &str,
    ) -> Result<(), RestError> {
        let res = self
            .client
            .patch(format!(
                "{API_BASE}/webhooks/{application_id}/{token}/messages/@original"
            ))
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await?;
        Self::check(res).await?;
        Ok(())
    }

    /// Bulk-overwrite the application's global slash commands.
    pub async fn overwrite_global_commands(
        &self,
        application_id: u64,
        commands: &serde_json::Value,
    ) -> Result<(), RestError> {
        let res = self
            .authorized(
                self.client
                    .put(format!("{API_BASE}/applications/{application_id}/commands"))
                    .json(commands),
            )
            .send()
            .await?;
        Self::check(res).await?;
        Ok(())
    }
}
