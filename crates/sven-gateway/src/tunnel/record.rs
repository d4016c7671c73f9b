// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The tunnel client record and its state machine.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use tokio::sync::{oneshot, Mutex};

use super::protocol::ControlFrame;

/// `Upgrading → Active → (Draining | Lost) → Closed`.
///
/// A tunnel re-entering `Active` from `Lost` (the sandbox reconnected within
/// the grace window) is a transition back along the same edge, not a new
/// state — the enum has no separate "rebound" variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Upgrading,
    Active,
    Draining,
    Lost,
    Closed,
}

/// One sandbox's reverse-dial tunnel.
///
/// `client_key` is usually `desktop-{session_id}`. The record survives a
/// dropped control channel for the grace window so in-flight dial requests
/// don't have to be abandoned the instant a WebSocket blips.
///
/// Generic over the data-connection payload type `C` so the record can be
/// exercised in tests without a real WebSocket upgrade; the gateway's HTTP
/// layer instantiates it with `axum::extract::ws::WebSocket`.
pub struct TunnelClientRecord<C> {
    pub client_key: String,
    state: Mutex<TunnelState>,
    control_tx: Mutex<Option<tokio::sync::mpsc::Sender<ControlFrame>>>,
    next_conn_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<C>>>,
    last_seen: Mutex<Instant>,
}

impl<C: Send + 'static> TunnelClientRecord<C> {
    pub fn new(client_key: String, control_tx: tokio::sync::mpsc::Sender<ControlFrame>) -> Self {
        Self {
            client_key,
            state: Mutex::new(TunnelState::Active),
            control_tx: Mutex::new(Some(control_tx)),
            next_conn_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub async fn state(&self) -> TunnelState {
        *self.state.lock().await
    }

    pub async fn set_state(&self, s: TunnelState) {
        *self.state.lock().await = s;
    }

    pub async fn touch(&self) {
        *self.last_seen.lock().await = Instant::now();
    }

    pub async fn idle_for(&self) -> std::time::Duration {
        self.last_seen.lock().await.elapsed()
    }

    /// Replaces the control-channel sender on rebind, transitioning the
    /// record back to `Active`.
    pub async fn rebind(&self, control_tx: tokio::sync::mpsc::Sender<ControlFrame>) {
        *self.control_tx.lock().await = Some(control_tx);
        self.set_state(TunnelState::Active).await;
        self.touch().await;
    }

    pub async fn mark_lost(&self) {
        *self.control_tx.lock().await = None;
        self.set_state(TunnelState::Lost).await;
    }

    /// Allocates the next dialer id for this tunnel. Ids never wrap around;
    /// a tunnel that somehow outlives `u64::MAX` dials is a bug to surface
    /// loudly, not paper over by reusing an id.
    pub fn next_conn_id(&self) -> u64 {
        let id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        assert!(id != 0, "tunnel dialer id wrapped around");
        id
    }

    pub async fn send_control(&self, frame: ControlFrame) -> bool {
        let guard = self.control_tx.lock().await;
        match guard.as_ref() {
            Some(tx) => tx.send(frame).await.is_ok(),
            None => false,
        }
    }

    pub async fn register_pending(&self, conn_id: u64) -> oneshot::Receiver<C> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(conn_id, tx);
        rx
    }

    /// Hands the freshly established data connection to whichever `dial()`
    /// call is waiting on `conn_id`. Returns `false` if there was no
    /// matching pending entry (stale or unknown handoff).
    pub async fn complete_pending(&self, conn_id: u64, conn: C) -> bool {
        if let Some(tx) = self.pending.lock().await.remove(&conn_id) {
            tx.send(conn).is_ok()
        } else {
            false
        }
    }

    pub async fn remove_pending(&self, conn_id: u64) {
        self.pending.lock().await.remove(&conn_id);
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
