// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// The gateway's error taxonomy, grouped by kind rather than by call site
/// (`SPEC_FULL.md` §7). None of these are process-level faults: a scheduler
/// or tunnel error is confined to the offending request and logged with
/// `slot_id`/`session_id`/`request_id` context by the caller.
#[derive(Debug, Error)]
pub enum GatewayError {
    // ── Admission errors — surfaced to the client ──────────────────────────
    #[error("no capacity for model {model_id}")]
    NoCapacity { model_id: String },

    #[error("model {model_id} is not known to any runner")]
    ModelUnknown { model_id: String },

    #[error("cancelled")]
    Cancelled,

    // ── Transport errors ────────────────────────────────────────────────────
    #[error("control channel for {client_key} lost, within grace window")]
    ControlChannelLost { client_key: String },

    #[error("control channel for {client_key} lost past the grace window")]
    ControlChannelGone { client_key: String },

    #[error("data connection {conn_id} timed out waiting for conn-ready")]
    DataConnTimeout { conn_id: u64 },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("HTTP server error: {0}")]
    Http(#[from] std::io::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("peer not authorized: {0}")]
    NotAuthorized(String),

    #[error("rate limited")]
    RateLimited,

    // ── State errors — never fatal to the process ───────────────────────────
    #[error("interaction {interaction_id} marked stale after restart")]
    StaleOnRestart { interaction_id: String },

    // ── Policy errors ────────────────────────────────────────────────────────
    #[error("push rejected: ref {ref_name} is not in the allowed set {allowed:?}")]
    PushRejected {
        ref_name: String,
        allowed: Vec<String>,
    },

    #[error("force-push rejected: {ref_name} is not force-pushable")]
    ForcePushRejected { ref_name: String },

    // ── Generic ──────────────────────────────────────────────────────────────
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serde(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
