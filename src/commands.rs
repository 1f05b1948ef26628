//! Slash command handlers: `/check_ranks` and `/status`. Both reply
//! ephemerally; nothing else ever reaches end users.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::discord::rest::{DiscordRest, RestError};
use crate::discord::types::{Interaction, RoleId, INTERACTION_APPLICATION_COMMAND};
use crate::reconcile::TickRequest;
use crate::store::RecordStore;
use crate::AppState;

const EPHEMERAL: u64 = 1 << 6;

/// Sends interaction replies. Split out from the REST client so the
/// handlers can be exercised without a network.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, interaction: &Interaction, body: Value) -> Result<(), RestError>;
    async fn edit_original(&self, interaction: &Interaction, content: &str)
        -> Result<(), RestError>;
}

pub struct RestResponder<'a> {
    pub rest: &'a DiscordRest,
    pub application_id: u64,
}

#[async_trait]
impl Responder for RestResponder<'_> {
    async fn respond(&self, interaction: &Interaction, body: Value) -> Result<(), RestError> {
        self.rest
            .create_interaction_response(&interaction.id, &interaction.token, &body)
            .await
    }

    async fn edit_original(
        &self,
        interaction: &Interaction,
        content: &str,
    ) -> Result<(), RestError> {
        self.rest
            .edit_original_response(self.application_id, &interaction.token, content)
            .await
    }
}

/// The command definitions registered (bulk-overwritten) at READY.
pub fn command_definitions() -> Value {
    json!([
        {
            "name": "check_ranks",
            "description": "Manually trigger rank check",
            "type": 1
        },
        {
            "name": "status",
            "description": "Check bot status",
            "type": 1
        }
    ])
}

/// Entry point for INTERACTION_CREATE dispatches. Runs on its own task so a
/// long tick never stalls the gateway loop.
pub async fn handle_interaction(state: Arc<AppState>, interaction: Interaction) {
    if interaction.kind != INTERACTION_APPLICATION_COMMAND {
        return;
    }
    let Some(application_id) = state.application_id.get().copied() else {
        tracing::warn!("interaction received before READY, ignoring");
        return;
    };
    let responder = RestResponder {
        rest: &state.rest,
        application_id,
    };

    let name = interaction
        .data
        .as_ref()
        .map(|d| d.name.as_str())
        .unwrap_or_default();

    let result = match name {
        "check_ranks" => {
            check_ranks(
                state.store.as_ref(),
                &state.tick_tx,
                &responder,
                &interaction,
            )
            .await
        }
        "status" => {
            let snapshot = StatusSnapshot {
                store_connected: state.store.is_connected(),
                timer_active: state.timer_active.load(Ordering::SeqCst),
                check_interval_secs: state.config.check_interval_secs,
                target_rank_id: state.config.target_rank_id,
            };
            status(&snapshot, &responder, &interaction).await
        }
        other => {
            tracing::warn!("unknown command: {}", other);
            responder
                .respond(&interaction, ephemeral_message("Unknown command"))
                .await
        }
    };

    if let Err(e) = result {
        tracing::error!("failed to handle /{} interaction: {}", name, e);
    }
}

pub async fn check_ranks(
    store: &dyn RecordStore,
    tick_tx: &mpsc::Sender<TickRequest>,
    responder: &dyn Responder,
    interaction: &Interaction,
) -> Result<(), RestError> {
    if !store.is_connected() {
        return responder
            .respond(
                interaction,
                ephemeral_message("Database connection not established"),
            )
            .await;
    }

    // Defer first: a full tick can easily outlive the 3s interaction window.
    responder
        .respond(interaction, json!({ "type": 5, "data": { "flags": EPHEMERAL } }))
        .await?;

    let (done_tx, done_rx) = oneshot::channel();
    if tick_tx
        .send(TickRequest {
            done: Some(done_tx),
        })
        .await
        .is_err()
    {
        return responder
            .edit_original(interaction, "Rank check worker is not running")
            .await;
    }
    // The worker drops the sender without sending only if it shuts down
    // mid-tick; either way the tick is over.
    let _ = done_rx.await;

    responder
        .edit_original(interaction, "Rank check completed!")
        .await
}

pub struct StatusSnapshot {
    pub store_connected: bool,
    pub timer_active: bool,
    pub check_interval_secs: u64,
    pub target_rank_id: RoleId,
}

pub async fn status(
    snapshot: &StatusSnapshot,
    responder: &dyn Responder,
    interaction: &Interaction,
) -> Result<(), RestError> {
    let db_status = if snapshot.store_connected {
        "Connected"
    } else {
        "Disconnected"
    };
    let task_status = if snapshot.timer_active {
        "Running"
    } else {
        "Stopped"
    };

    responder
        .respond(
            interaction,
            json!({
                "type": 4,
                "data": {
                    "flags": EPHEMERAL,
                    "embeds": [{
                        "title": "Bot Status",
                        "color": 3447003,
                        "fields": [
                            { "name": "Database", "value": db_status, "inline": true },
                            { "name": "Rank Check Task", "value": task_status, "inline": true },
                            {
                                "name": "Check Interval",
                                "value": format!("{}s", snapshot.check_interval_secs),
                                "inline": true
                            },
                            {
                                "name": "Target Rank ID",
                                "value": snapshot.target_rank_id.to_string(),
                                "inline": true
                            }
                        ]
                    }]
                }
            }),
        )
        .await
}

fn ephemeral_message(content: &str) -> Value {
    json!({
        "type": 4,
        "data": { "content": content, "flags": EPHEMERAL }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PendingRecord;
    use anyhow::Result;
    use std::sync::Mutex;

    struct FakeStore {
        connected: bool,
    }

    #[async_trait]
    impl RecordStore for FakeStore {
        async fn pending_rank_changes(&self) -> Result<Vec<PendingRecord>> {
            Ok(vec![])
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn close(&self) {}
    }

    #[derive(Default)]
    struct RecordingResponder {
        responses: Mutex<Vec<Value>>,
        edits: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Responder for RecordingResponder {
        async fn respond(&self, _: &Interaction, body: Value) -> Result<(), RestError> {
            self.responses.lock().unwrap().push(body);
            Ok(())
        }

        async fn edit_original(&self, _: &Interaction, content: &str) -> Result<(), RestError> {
            self.edits.lock().unwrap().push(content.into());
            Ok(())
        }
    }

    fn interaction() -> Interaction {
        serde_json::from_str(
            r#"{ "id": "1", "token": "tok", "type": 2, "data": { "name": "check_ranks" } }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn check_ranks_with_disconnected_store_replies_privately_and_triggers_nothing() {
        let store = FakeStore { connected: false };
        let (tick_tx, mut tick_rx) = mpsc::channel::<TickRequest>(1);
        let responder = RecordingResponder::default();

        check_ranks(&store, &tick_tx, &responder, &interaction())
            .await
            .unwrap();

        let responses = responder.responses.lock().unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(
            responses[0]["data"]["content"],
            "Database connection not established"
        );
        assert_eq!(responses[0]["data"]["flags"], EPHEMERAL);
        assert!(tick_rx.try_recv().is_err());
        assert!(responder.edits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn check_ranks_defers_then_acknowledges_completion() {
        let store = FakeStore { connected: true };
        let (tick_tx, mut tick_rx) = mpsc::channel::<TickRequest>(1);
        let responder = RecordingResponder::default();

        // Stand-in for the reconcile worker.
        let worker = tokio::spawn(async move {
            let req = tick_rx.recv().await.unwrap();
            if let Some(done) = req.done {
                let _ = done.send(());
            }
        });

        check_ranks(&store, &tick_tx, &responder, &interaction())
            .await
            .unwrap();
        worker.await.unwrap();

        let responses = responder.responses.lock().unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["type"], 5);
        assert_eq!(
            *responder.edits.lock().unwrap(),
            vec!["Rank check completed!".to_string()]
        );
    }

    #[tokio::test]
    async fn status_reports_all_four_fields() {
        let responder = RecordingResponder::default();
        let snapshot = StatusSnapshot {
            store_connected: true,
            timer_active: false,
            check_interval_secs: 300,
            target_rank_id: RoleId(123),
        };

        status(&snapshot, &responder, &interaction())
            .await
            .unwrap();

        let responses = responder.responses.lock().unwrap();
        let fields = &responses[0]["data"]["embeds"][0]["fields"];
        assert_eq!(fields[0]["value"], "Connected");
        assert_eq!(fields[1]["value"], "Stopped");
        assert_eq!(fields[2]["value"], "300s");
        assert_eq!(fields[3]["value"], "123");
        assert_eq!(responses[0]["data"]["flags"], EPHEMERAL);
    }
}
