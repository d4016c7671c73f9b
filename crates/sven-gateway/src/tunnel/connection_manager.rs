// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The named-connection directory: `client_key → TunnelClientRecord`, plus
//! the grace-period reaping that lets a sandbox's WebSocket blip without
//! losing in-flight dial requests.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};

use super::{
    protocol::ControlFrame,
    record::{TunnelClientRecord, TunnelState},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionManagerStats {
    pub client_count: usize,
    pub active_count: usize,
    pub lost_count: usize,
    pub pending_dials: usize,
}

/// Owns every sandbox's tunnel record and arbitrates dials across them.
///
/// `C` is the data-connection payload handed from [`accept`] to the waiting
/// [`dial`] call. The gateway's HTTP layer instantiates this with
/// `axum::extract::ws::WebSocket`.
pub struct ConnectionManager<C> {
    records: RwLock<HashMap<String, Arc<TunnelClientRecord<C>>>>,
    grace_window: Duration,
}

impl<C: Send + 'static> ConnectionManager<C> {
    pub fn new(grace_window: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            grace_window,
        }
    }

    /// Called when a sandbox completes its control-channel WebSocket
    /// upgrade. If a record for `client_key` already exists (it reconnected
    /// within the grace window) it is rebound in place; otherwise a new
    /// record is created.
    pub async fn register(
        &self,
        client_key: &str,
        control_tx: tokio::sync::mpsc::Sender<ControlFrame>,
    ) -> Arc<TunnelClientRecord<C>> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(client_key) {
            info!(client_key, "tunnel control channel rebound");
            existing.rebind(control_tx).await;
            return existing.clone();
        }
        let record = Arc::new(TunnelClientRecord::new(client_key.to_string(), control_tx));
        records.insert(client_key.to_string(), record.clone());
        record
    }

    /// Marks `client_key`'s tunnel lost and schedules it for removal once
    /// the grace window elapses without a rebind.
    pub fn mark_lost(self: &Arc<Self>, client_key: String) {
        let this = self.clone();
        tokio::spawn(async move {
            let record = {
                let records = this.records.read().await;
                records.get(&client_key).cloned()
            };
            let Some(record) = record else { return };
            record.mark_lost().await;
            tokio::time::sleep(this.grace_window).await;

            if record.state().await == TunnelState::Lost {
                warn!(client_key, "tunnel grace window expired, reaping record");
                this.records.write().await.remove(&client_key);
                record.set_state(TunnelState::Closed).await;
            } else {
                debug!(client_key, "tunnel rebound before grace window expired");
            }
        });
    }

    /// Requests a new data connection from the sandbox behind `client_key`
    /// and waits (bounded by `timeout`, and cancellable via `cancel`) for
    /// the sandbox to actually open the matching data connection. The
    /// `conn-ready` control frame is advisory only — liveness, not the
    /// handoff itself; [`accept`](Self::accept) is what wakes this call.
    pub async fn dial(
        &self,
        client_key: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<C> {
        let record = {
            let records = self.records.read().await;
            records.get(client_key).cloned()
        };
        let Some(record) = record else {
            return Err(GatewayError::ControlChannelGone {
                client_key: client_key.to_string(),
            });
        };

        let conn_id = record.next_conn_id();
        let incoming = record.register_pending(conn_id).await;

        if !record.send_control(ControlFrame::ConnRequest { conn_id }).await {
            record.remove_pending(conn_id).await;
            return Err(GatewayError::ControlChannelLost {
                client_key: client_key.to_string(),
            });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                record.remove_pending(conn_id).await;
                Err(GatewayError::Cancelled)
            }
            result = incoming => {
                result.map_err(|_| GatewayError::DataConnTimeout { conn_id })
            }
            _ = tokio::time::sleep(timeout) => {
                record.remove_pending(conn_id).await;
                Err(GatewayError::DataConnTimeout { conn_id })
            }
        }
    }

    /// Called by the data-connection upgrade handler once the sandbox's
    /// second connection for `conn_id` has completed its handshake, waking
    /// the matching [`dial`](Self::dial) call.
    pub async fn accept(&self, client_key: &str, conn_id: u64, conn: C) -> bool {
        let record = {
            let records = self.records.read().await;
            records.get(client_key).cloned()
        };
        match record {
            Some(r) => r.complete_pending(conn_id, conn).await,
            None => false,
        }
    }

    pub async fn stats(&self) -> ConnectionManagerStats {
        let records = self.records.read().await;
        let mut stats = ConnectionManagerStats {
            client_count: records.len(),
            ..Default::default()
        };
        for record in records.values() {
            match record.state().await {
                TunnelState::Active | TunnelState::Upgrading => stats.active_count += 1,
                TunnelState::Lost => stats.lost_count += 1,
                TunnelState::Draining | TunnelState::Closed => {}
            }
            stats.pending_dials += record.pending_count().await;
        }
        stats
    }

    pub async fn get(&self, client_key: &str) -> Option<Arc<TunnelClientRecord<C>>> {
        self.records.read().await.get(client_key).cloned()
    }
}
