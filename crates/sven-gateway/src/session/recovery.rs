// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Restart recovery (`§4.9`): rebuilding the in-memory routing tables from
//! durable session metadata when a sandbox rebinds its tunnel after the
//! orchestrator process restarted.

use chrono::{Duration, Utc};

use super::index::AgentSessionIndex;

/// No in-memory index entry survives an orchestrator restart. A
/// `waiting_interaction_id` older than this is treated as abandoned rather
/// than reinstated.
pub const STALE_THRESHOLD_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Nothing to recover: the session had no metadata, or no agent thread
    /// id and no waiting interaction.
    NothingToRecover,
    /// The waiting interaction was reinstated into memory.
    Reinstated { interaction_id: String },
    /// The waiting interaction was older than the stale threshold and has
    /// been marked failed; its metadata fields were cleared.
    MarkedStale { interaction_id: String },
}

/// Runs when a sandbox rebinds its tunnel for `session_id`. Reads the
/// session's durable metadata and reinstates all three in-memory routing
/// tables: `context_mappings`, `request_to_session` (from
/// `metadata.last_request_id`), and `session_to_waiting`.
pub async fn recover_session(
    index: &AgentSessionIndex,
    session_id: &str,
    agent_thread_id: Option<&str>,
) -> RecoveryOutcome {
    let Some(metadata) = index.store().load_metadata(session_id).await else {
        return RecoveryOutcome::NothingToRecover;
    };

    if let Some(thread_id) = agent_thread_id.or(metadata.external_agent_thread_id.as_deref()) {
        index.bind_context(thread_id, session_id).await;
    }

    if let Some(request_id) = metadata.last_request_id.as_deref() {
        index.reinstate_request_mapping(request_id, session_id).await;
    }

    let Some(interaction_id) = metadata.waiting_interaction_id.clone() else {
        return RecoveryOutcome::NothingToRecover;
    };

    let is_stale = match metadata.request_started_at {
        Some(started_at) => Utc::now() - started_at > Duration::seconds(STALE_THRESHOLD_SECS),
        // No timestamp recorded alongside a waiting interaction is itself
        // an anomaly; treat conservatively as stale rather than reinstating
        // indefinitely.
        None => true,
    };

    if is_stale {
        index.clear_waiting(session_id).await;
        RecoveryOutcome::MarkedStale { interaction_id }
    } else {
        index.set_waiting(session_id, &interaction_id).await;
        RecoveryOutcome::Reinstated { interaction_id }
    }
}
