// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The agent session index: the in-memory routing truth for which session
//! an agent-thread or in-flight request belongs to, backed by a durable
//! shadow copy for restart recovery (`§4.7`).

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, RwLock};

use super::{
    store::SessionStore,
    types::SessionMetadata,
};

/// One request's ephemeral, in-memory-only channels. None of this is
/// persisted — a restart always terminates any request that was streaming
/// at the time (`§4.9` point 4).
struct RequestChannels {
    response_tx: Option<mpsc::Sender<String>>,
    done_tx: Option<oneshot::Sender<()>>,
    error_tx: Option<oneshot::Sender<String>>,
}

/// The three routing tables from `§4.7`, plus the ephemeral per-request
/// channel set, plus a handle to the durable store they shadow.
pub struct AgentSessionIndex {
    context_mappings: RwLock<HashMap<String, String>>,
    session_to_waiting: RwLock<HashMap<String, String>>,
    request_to_session: RwLock<HashMap<String, String>>,
    channels: RwLock<HashMap<String, RequestChannels>>,
    store: Arc<dyn SessionStore>,
}

impl AgentSessionIndex {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            context_mappings: RwLock::new(HashMap::new()),
            session_to_waiting: RwLock::new(HashMap::new()),
            request_to_session: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            store,
        }
    }

    pub async fn bind_context(&self, agent_thread_id: &str, session_id: &str) {
        self.context_mappings
            .write()
            .await
            .insert(agent_thread_id.to_string(), session_id.to_string());
    }

    pub async fn resolve_context(&self, agent_thread_id: &str) -> Option<String> {
        self.context_mappings.read().await.get(agent_thread_id).cloned()
    }

    /// Records `request_id → session_id`, mirroring the assignment into
    /// durable metadata *before* the in-memory insert, per the durability
    /// invariant (`§4.7`: metadata must be written through before a mutation
    /// is acknowledged externally — the same ordering `set_waiting` uses).
    pub async fn bind_request(&self, request_id: &str, session_id: &str) {
        let mut metadata = self.store.load_metadata(session_id).await.unwrap_or_default();
        metadata.last_request_id = Some(request_id.to_string());
        metadata.request_started_at = Some(Utc::now());
        self.store.update_metadata(session_id, metadata).await;

        self.request_to_session
            .write()
            .await
            .insert(request_id.to_string(), session_id.to_string());
    }

    pub async fn resolve_request(&self, request_id: &str) -> Option<String> {
        self.request_to_session.read().await.get(request_id).cloned()
    }

    /// Reinstates `request_id → session_id` into memory only, without
    /// rewriting durable metadata — used by restart recovery (`§4.9`), where
    /// the store is already the source of truth for `last_request_id` and
    /// should not be re-stamped with a fresh `request_started_at`.
    pub async fn reinstate_request_mapping(&self, request_id: &str, session_id: &str) {
        self.request_to_session
            .write()
            .await
            .insert(request_id.to_string(), session_id.to_string());
    }

    /// Records that `session_id` is waiting on `interaction_id`, mirroring
    /// to durable metadata before acknowledging (`§4.7` durability
    /// invariant).
    pub async fn set_waiting(&self, session_id: &str, interaction_id: &str) {
        let mut metadata = self.store.load_metadata(session_id).await.unwrap_or_default();
        metadata.waiting_interaction_id = Some(interaction_id.to_string());
        self.store.update_metadata(session_id, metadata).await;

        self.session_to_waiting
            .write()
            .await
            .insert(session_id.to_string(), interaction_id.to_string());
    }

    pub async fn waiting_interaction(&self, session_id: &str) -> Option<String> {
        self.session_to_waiting.read().await.get(session_id).cloned()
    }

    /// Clears `session_id`'s waiting interaction from memory and durable
    /// metadata together, per the cleanup invariant.
    pub async fn clear_waiting(&self, session_id: &str) {
        self.session_to_waiting.write().await.remove(session_id);

        if let Some(mut metadata) = self.store.load_metadata(session_id).await {
            metadata.waiting_interaction_id = None;
            self.store.update_metadata(session_id, metadata).await;
        }
    }

    pub async fn register_response_channel(&self, request_id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(64);
        let mut channels = self.channels.write().await;
        let entry = channels
            .entry(request_id.to_string())
            .or_insert_with(|| RequestChannels {
                response_tx: None,
                done_tx: None,
                error_tx: None,
            });
        entry.response_tx = Some(tx);
        rx
    }

    pub async fn register_done_channel(&self, request_id: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut channels = self.channels.write().await;
        let entry = channels
            .entry(request_id.to_string())
            .or_insert_with(|| RequestChannels {
                response_tx: None,
                done_tx: None,
                error_tx: None,
            });
        entry.done_tx = Some(tx);
        rx
    }

    pub async fn register_error_channel(&self, request_id: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        let mut channels = self.channels.write().await;
        let entry = channels
            .entry(request_id.to_string())
            .or_insert_with(|| RequestChannels {
                response_tx: None,
                done_tx: None,
                error_tx: None,
            });
        entry.error_tx = Some(tx);
        rx
    }

    pub async fn send_chunk(&self, request_id: &str, chunk: String) -> bool {
        let channels = self.channels.read().await;
        match channels.get(request_id).and_then(|c| c.response_tx.clone()) {
            Some(tx) => tx.send(chunk).await.is_ok(),
            None => false,
        }
    }

    pub async fn signal_done(&self, request_id: &str) {
        let mut channels = self.channels.write().await;
        if let Some(c) = channels.get_mut(request_id) {
            if let Some(tx) = c.done_tx.take() {
                let _ = tx.send(());
            }
        }
    }

    pub async fn signal_error(&self, request_id: &str, message: String) {
        let mut channels = self.channels.write().await;
        if let Some(c) = channels.get_mut(request_id) {
            if let Some(tx) = c.error_tx.take() {
                let _ = tx.send(message);
            }
        }
    }

    /// Clears all three routing tables and the metadata mirror for
    /// `session_id`, and drops any ephemeral channels for `request_id`. From
    /// the perspective of any reader that acquires a lock after this
    /// returns, the interaction is gone everywhere at once.
    pub async fn complete_interaction(&self, session_id: &str, request_id: &str) {
        self.session_to_waiting.write().await.remove(session_id);
        self.request_to_session.write().await.remove(request_id);
        self.channels.write().await.remove(request_id);
        self.store.clear_metadata(session_id).await;
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }
}
