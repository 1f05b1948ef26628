//! Record Store: read-only view over the `users` table in Postgres.
//!
//! The reconciler only ever runs one query against it. Rows are owned and
//! mutated by an external system; nothing here writes back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use crate::config::Config;
use crate::discord::types::{GuildId, UserId};

/// A row marking a member as awaiting rank reconciliation (`status = 2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRecord {
    pub user_id: UserId,
    pub guild_id: GuildId,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn pending_rank_changes(&self) -> Result<Vec<PendingRecord>>;
    fn is_connected(&self) -> bool;
    async fn close(&self);
}

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub async fn connect(config: &Config) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.db_host)
            .port(config.db_port)
            .database(&config.db_name)
            .username(&config.db_user)
            .password(&config.db_password);

        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(10)
            .connect_with(options)
            .await
            .context("connecting to postgres")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn pending_rank_changes(&self) -> Result<Vec<PendingRecord>> {
        // Ids are stored as BIGINT; snowflakes fit losslessly.
        let rows: Vec<(i64, i64)> =
            sqlx::query_as("SELECT user_id, guild_id FROM users WHERE status = 2")
                .fetch_all(&self.pool)
                .await
                .context("querying pending rank changes")?;

        Ok(rows
            .into_iter()
            .map(|(user_id, guild_id)| PendingRecord {
                user_id: UserId(user_id as u64),
                guild_id: GuildId(guild_id as u64),
            })
            .collect())
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
