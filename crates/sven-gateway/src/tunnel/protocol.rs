// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Control-channel wire format for the reverse-dial tunnel.
//!
//! Frames are JSON text messages, matching the rest of the gateway's HTTP
//! surface rather than introducing a second binary codec for one channel.

use serde::{Deserialize, Serialize};

/// A message exchanged on a tunnel's control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlFrame {
    /// Bidirectional heartbeat; either side may send one at any time.
    KeepAlive,
    /// Orchestrator → sandbox: open a new data connection for `conn_id`.
    ConnRequest { conn_id: u64 },
    /// Sandbox → orchestrator: the dial attempt for `conn_id` is underway.
    ConnReady { conn_id: u64 },
}
