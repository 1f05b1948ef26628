mod commands;
mod config;
mod discord;
mod reconcile;
mod store;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::discord::cache::DirectoryCache;
use crate::discord::gateway;
use crate::discord::rest::DiscordRest;
use crate::reconcile::{LiveDirectory, TickRequest};
use crate::store::{PgRecordStore, RecordStore};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn RecordStore>,
    pub rest: DiscordRest,
    pub cache: Arc<DirectoryCache>,
    pub tick_tx: mpsc::Sender<TickRequest>,
    /// Set once on the first READY dispatch.
    pub application_id: OnceCell<u64>,
    pub timer_active: AtomicBool,
    pub ready_tx: watch::Sender<bool>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    tracing::info!("starting rankd");

    let config = Config::from_env()?;

    let store: Arc<dyn RecordStore> = Arc::new(
        PgRecordStore::connect(&config)
            .await
            .context("creating database connection pool")?,
    );
    tracing::info!("database connection pool established");

    let rest = DiscordRest::new(&config.discord_token);
    let cache = Arc::new(DirectoryCache::default());

    // Capacity 1: the worker serializes ticks; timer triggers that arrive
    // while a tick is queued or running coalesce, manual triggers wait.
    let (tick_tx, mut tick_rx) = mpsc::channel::<TickRequest>(1);
    let (ready_tx, _) = watch::channel(false);

    let state = Arc::new(AppState {
        config: config.clone(),
        store: Arc::clone(&store),
        rest: rest.clone(),
        cache: Arc::clone(&cache),
        tick_tx,
        application_id: OnceCell::new(),
        timer_active: AtomicBool::new(false),
        ready_tx,
    });

    // Reconcile worker: one tick at a time, tick failure is never fatal.
    {
        let store = Arc::clone(&store);
        let directory = LiveDirectory::new(Arc::clone(&cache), rest.clone());
        let target_role = config.target_rank_id;
        tokio::spawn(async move {
            while let Some(request) = tick_rx.recv().await {
                tracing::debug!("[reconcile] begin");
                if let Err(e) = reconcile::run_tick(store.as_ref(), &directory, target_role).await {
                    tracing::error!("[reconcile] error: {:#}", e);
                }
                tracing::debug!("[reconcile] done");
                if let Some(done) = request.done {
                    let _ = done.send(());
                }
            }
        });
    }

    // Periodic trigger, started only once the gateway reports READY.
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut ready = state.ready_tx.subscribe();
            while !*ready.borrow_and_update() {
                if ready.changed().await.is_err() {
                    return;
                }
            }

            tracing::info!(
                "rank check task started (every {} seconds)",
                state.config.check_interval_secs
            );
            state.timer_active.store(true, Ordering::SeqCst);

            let mut interval =
                tokio::time::interval(Duration::from_secs(state.config.check_interval_secs));
            loop {
                interval.tick().await;
                tracing::debug!("triggering periodic rank check");
                if state.tick_tx.try_send(TickRequest { done: None }).is_err() {
                    tracing::debug!("[reconcile] busy, skipping timer trigger");
                }
            }
        });
    }

    let gateway_task = tokio::spawn(gateway::run(Arc::clone(&state)));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
        result = gateway_task => {
            let err = match result {
                Ok(Ok(())) => anyhow::anyhow!("gateway task exited unexpectedly"),
                Ok(Err(e)) => e,
                Err(e) => anyhow::Error::from(e),
            };
            store.close().await;
            tracing::info!("database connection pool closed");
            return Err(err.context("discord gateway failed"));
        }
    }

    store.close().await;
    tracing::info!("database connection pool closed");
    Ok(())
}
