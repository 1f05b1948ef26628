//! Minimal Discord gateway session (API v10, JSON encoding).
//!
//! One session at a time: connect, HELLO, IDENTIFY, then a single loop that
//! multiplexes inbound frames with the heartbeat timer. Transient
//! disconnects reconnect with a fresh identify after a short sleep; close
//! codes that can never succeed (bad token, disallowed intents) bubble up
//! and take the process down. Session resume is not implemented.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use thiserror::Error;
use tokio::time::{interval_at, sleep, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::types::{
    GatewayEvent, GuildCreate, GuildDelete, GuildMemberChange, GuildMemberRemove, GuildRoleChange,
    GuildRoleDelete, Hello, Interaction, Ready, GATEWAY_INTENTS,
};
use crate::commands;
use crate::AppState;

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

#[derive(Debug, Error)]
enum GatewayError {
    #[error("fatal gateway close {code}: {reason}")]
    Fatal { code: u16, reason: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Close codes after which reconnecting with the same credentials and
/// intents can never succeed.
fn is_fatal_close(code: u16) -> bool {
    matches!(code, 4004 | 4013 | 4014)
}

pub async fn run(state: Arc<AppState>) -> Result<()> {
    let url = Url::parse(GATEWAY_URL).context("invalid gateway URL")?;

    loop {
        match session(&state, &url).await {
            Ok(()) => {
                tracing::info!("[gateway] connection closed, reconnecting");
            }
            Err(GatewayError::Fatal { code, reason }) => {
                anyhow::bail!("gateway refused the session (close {}): {}", code, reason);
            }
            Err(GatewayError::Other(e)) => {
                tracing::warn!("[gateway] session error: {:#}, reconnecting", e);
            }
        }
        sleep(Duration::from_secs(5)).await;
    }
}

async fn session(state: &Arc<AppState>, url: &Url) -> Result<(), GatewayError> {
    tracing::debug!("[gateway] connecting");
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .context("connecting to gateway")?;
    let (mut write, mut read) = ws_stream.split();

    // First frame must be HELLO.
    let hello = loop {
        let msg = read
            .next()
            .await
            .context("gateway closed before HELLO")?
            .context("reading HELLO")?;
        if let Message::Text(text) = msg {
            let event: GatewayEvent =
                serde_json::from_str(&text).context("parsing HELLO frame")?;
            if event.op != OP_HELLO {
                return Err(
                    anyhow::anyhow!("expected HELLO (op 10), got op {}", event.op).into(),
                );
            }
            let hello: Hello = serde_json::from_value(event.d).context("parsing HELLO data")?;
            break hello;
        }
    };

    write
        .send(Message::Text(
            identify_payload(&state.config.discord_token).to_string(),
        ))
        .await
        .context("sending IDENTIFY")?;

    let period = Duration::from_millis(hello.heartbeat_interval);
    let mut heartbeat = interval_at(Instant::now() + period, period);
    let mut last_seq: Option<u64> = None;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                write
                    .send(Message::Text(heartbeat_payload(last_seq).to_string()))
                    .await
                    .context("sending heartbeat")?;
            }
            frame = read.next() => {
                let msg = match frame {
                    None => return Ok(()),
                    Some(Err(e)) => return Err(anyhow::Error::from(e).context("reading frame").into()),
                    Some(Ok(msg)) => msg,
                };
                match msg {
                    Message::Text(text) => {
                        let event: GatewayEvent = match serde_json::from_str(&text) {
                            Ok(event) => event,
                            Err(e) => {
                                tracing::warn!("[gateway] unparseable frame: {}", e);
                                continue;
                            }
                        };
                        if let Some(s) = event.s {
                            last_seq = Some(s);
                        }
                        match event.op {
                            OP_DISPATCH => {
                                let name = event.t.unwrap_or_default();
                                if let Err(e) = dispatch(state, &name, event.d).await {
                                    tracing::warn!("[gateway] error handling {}: {:#}", name, e);
                                }
                            }
                            OP_HEARTBEAT => {
                                write
                                    .send(Message::Text(heartbeat_payload(last_seq).to_string()))
                                    .await
                                    .context("sending requested heartbeat")?;
                            }
                            OP_RECONNECT => {
                                tracing::debug!("[gateway] reconnect requested");
                                return Ok(());
                            }
                            OP_INVALID_SESSION => {
                                tracing::debug!("[gateway] session invalidated");
                                return Ok(());
                            }
                            OP_HELLO | OP_HEARTBEAT_ACK => {}
                            op => tracing::debug!("[gateway] ignoring op {}", op),
                        }
                    }
                    Message::Close(frame) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((1000, String::new()));
                        if is_fatal_close(code) {
                            return Err(GatewayError::Fatal { code, reason });
                        }
                        tracing::debug!("[gateway] closed by peer ({}): {}", code, reason);
                        return Ok(());
                    }
                    Message::Ping(payload) => {
                        write
                            .send(Message::Pong(payload))
                            .await
                            .context("sending pong")?;
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn dispatch(state: &Arc<AppState>, name: &str, data: serde_json::Value) -> Result<()> {
    match name {
        "READY" => {
            let ready: Ready = serde_json::from_value(data).context("parsing READY")?;
            tracing::info!("connected to Discord");
            if state.application_id.set(ready.application.id).is_ok() {
                if let Err(e) = state
                    .rest
                    .overwrite_global_commands(
                        ready.application.id,
                        &commands::command_definitions(),
                    )
                    .await
                {
                    tracing::error!("failed to register slash commands: {}", e);
                }
            }
            state.ready_tx.send_replace(true);
        }
        "GUILD_CREATE" => {
            let guild: GuildCreate = serde_json::from_value(data).context("parsing GUILD_CREATE")?;
            tracing::debug!("[gateway] guild {} available", guild.id);
            state.cache.apply_guild_create(guild).await;
        }
        "GUILD_DELETE" => {
            let guild: GuildDelete = serde_json::from_value(data).context("parsing GUILD_DELETE")?;
            // Outages mark the guild unavailable without removing the bot.
            if !guild.unavailable {
                state.cache.remove_guild(guild.id).await;
            }
        }
        "GUILD_ROLE_CREATE" | "GUILD_ROLE_UPDATE" => {
            let change: GuildRoleChange =
                serde_json::from_value(data).context("parsing role change")?;
            state.cache.upsert_role(change.guild_id, change.role.id).await;
        }
        "GUILD_ROLE_DELETE" => {
            let change: GuildRoleDelete =
                serde_json::from_value(data).context("parsing role delete")?;
            state.cache.remove_role(change.guild_id, change.role_id).await;
        }
        "GUILD_MEMBER_ADD" | "GUILD_MEMBER_UPDATE" => {
            let change: GuildMemberChange =
                serde_json::from_value(data).context("parsing member change")?;
            state
                .cache
                .upsert_member(change.guild_id, change.user.id, change.roles)
                .await;
        }
        "GUILD_MEMBER_REMOVE" => {
            let change: GuildMemberRemove =
                serde_json::from_value(data).context("parsing member remove")?;
            state.cache.remove_member(change.guild_id, change.user.id).await;
        }
        "INTERACTION_CREATE" => {
            let interaction: Interaction =
                serde_json::from_value(data).context("parsing INTERACTION_CREATE")?;
            // Command handlers may wait on a full tick; keep them off the
            // heartbeat loop.
            tokio::spawn(commands::handle_interaction(
                Arc::clone(state),
                interaction,
            ));
        }
        _ => {}
    }
    Ok(())
}

fn identify_payload(token: &str) -> serde_json::Value {
    json!({
        "op": 2,
        "d": {
            "token": token,
            "intents": GATEWAY_INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "rankd",
                "device": "rankd"
            }
        }
    })
}

fn heartbeat_payload(last_seq: Option<u64>) -> serde_json::Value {
    json!({ "op": 1, "d": last_seq })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_frame_parses() {
        let event: GatewayEvent =
            serde_json::from_str(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#).unwrap();
        assert_eq!(event.op, OP_HELLO);
        let hello: Hello = serde_json::from_value(event.d).unwrap();
        assert_eq!(hello.heartbeat_interval, 41250);
    }

    #[test]
    fn heartbeat_carries_last_sequence() {
        assert_eq!(
            heartbeat_payload(Some(12)).to_string(),
            r#"{"d":12,"op":1}"#
        );
        assert_eq!(heartbeat_payload(None).to_string(), r#"{"d":null,"op":1}"#);
    }

    #[test]
    fn identify_declares_guild_and_member_intents() {
        let payload = identify_payload("tok");
        assert_eq!(payload["op"], 2);
        assert_eq!(payload["d"]["intents"], 3);
        assert_eq!(payload["d"]["token"], "tok");
    }

    #[test]
    fn only_credential_and_intent_closes_are_fatal() {
        assert!(is_fatal_close(4004));
        assert!(is_fatal_close(4013));
        assert!(is_fatal_close(4014));
        assert!(!is_fatal_close(4000));
        assert!(!is_fatal_close(1000));
    }
}
