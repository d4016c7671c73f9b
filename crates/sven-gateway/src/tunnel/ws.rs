// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Axum upgrade handlers for the reverse-dial tunnel's two WebSocket
//! endpoints: the long-lived control channel and the one-shot data
//! connections it negotiates.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use tracing::{debug, info, warn};

use crate::session::{recover_session, AgentSessionIndex, RecoveryOutcome};

use super::{protocol::ControlFrame, DataConn, GatewayConnectionManager};

/// Trait for router state types that carry the tunnel's connection manager.
pub trait AsConnectionManager {
    fn connection_manager(&self) -> &Arc<GatewayConnectionManager>;
}

/// Trait for router state types that carry the agent session index, so the
/// tunnel's rebind point can drive restart recovery (`§4.9`).
pub trait AsSessionIndex {
    fn session_index(&self) -> &Arc<AgentSessionIndex>;
}

/// `GET /tunnel/{client_key}/control` — the sandbox dials in here and keeps
/// the resulting WebSocket open for the lifetime of its session.
pub async fn control_handler<S>(
    Path(client_key): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<S>,
) -> Response
where
    S: AsConnectionManager + AsSessionIndex + Clone + Send + Sync + 'static,
{
    let manager = state.connection_manager().clone();
    let session_index = state.session_index().clone();
    ws.on_upgrade(move |socket| handle_control_socket(socket, client_key, manager, session_index))
}

/// `client_key` is `desktop-{session_id}` (`§3`); strips that prefix to
/// recover the session id the durable store is keyed by.
fn session_id_from_client_key(client_key: &str) -> &str {
    client_key.strip_prefix("desktop-").unwrap_or(client_key)
}

async fn handle_control_socket(
    socket: WebSocket,
    client_key: String,
    manager: Arc<GatewayConnectionManager>,
    session_index: Arc<AgentSessionIndex>,
) {
    let (mut sink, mut stream) = futures::StreamExt::split(socket);
    let (control_tx, mut control_rx) = tokio::sync::mpsc::channel::<ControlFrame>(32);

    let record = manager.register(&client_key, control_tx).await;
    info!(client_key, "tunnel control channel active");

    // `§4.9` step 2: whenever a sandbox's control channel binds — whether
    // this is the very first connection after a control-plane restart (the
    // in-memory tables are empty) or a rebind within the grace window — read
    // the session's durable metadata and reinstate the in-memory routing
    // state. `recover_session` is a no-op for sessions with no metadata on
    // file, so this is safe to call unconditionally.
    let session_id = session_id_from_client_key(&client_key);
    match recover_session(&session_index, session_id, None).await {
        RecoveryOutcome::Reinstated { interaction_id } => {
            info!(client_key, session_id, interaction_id, "restart recovery: waiting interaction reinstated");
        }
        RecoveryOutcome::MarkedStale { interaction_id } => {
            info!(client_key, session_id, interaction_id, "restart recovery: waiting interaction stale, marked failed");
        }
        RecoveryOutcome::NothingToRecover => {}
    }

    let writer = tokio::spawn(async move {
        use futures::SinkExt;
        while let Some(frame) = control_rx.recv().await {
            let Ok(json) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    loop {
        use futures::StreamExt;
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ControlFrame>(&text) {
                Ok(ControlFrame::KeepAlive) => record.touch().await,
                Ok(ControlFrame::ConnReady { conn_id }) => {
                    debug!(client_key, conn_id, "sandbox acknowledged conn-request");
                    record.touch().await;
                }
                Ok(ControlFrame::ConnRequest { .. }) => {
                    warn!(client_key, "sandbox sent conn-request on its own control channel");
                }
                Err(e) => warn!(client_key, error = %e, "invalid control frame"),
            },
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => record.touch().await,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(client_key, error = %e, "control channel recv error");
                break;
            }
        }
    }

    writer.abort();
    manager.mark_lost(client_key.clone());
    info!(client_key, "tunnel control channel lost");
}

/// `GET /tunnel/{client_key}/data/{conn_id}` — the sandbox opens one of
/// these per requested data connection. Each is one-shot: it carries exactly
/// one logical request/response pair and is closed by the caller once done.
pub async fn data_handler<S>(
    Path((client_key, conn_id)): Path<(String, u64)>,
    ws: WebSocketUpgrade,
    State(state): State<S>,
) -> Response
where
    S: AsConnectionManager + Clone + Send + Sync + 'static,
{
    let manager = state.connection_manager().clone();
    ws.on_upgrade(move |socket| handle_data_socket(socket, client_key, conn_id, manager))
}

async fn handle_data_socket(
    socket: DataConn,
    client_key: String,
    conn_id: u64,
    manager: Arc<GatewayConnectionManager>,
) {
    if !manager.accept(&client_key, conn_id, socket).await {
        warn!(client_key, conn_id, "data connection arrived with no matching dial");
    }
}
