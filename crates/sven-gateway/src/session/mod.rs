// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The agent session index: in-memory routing state for agent threads,
//! waiting interactions, and in-flight requests, shadowed by durable
//! metadata so it can be rebuilt after a restart.

pub mod index;
pub mod recovery;
pub mod store;
pub mod types;

pub use index::AgentSessionIndex;
pub use recovery::{recover_session, RecoveryOutcome, STALE_THRESHOLD_SECS};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use types::{Entry, Interaction, Session, SessionMetadata, TerminatorReason, ToolCallStatus};
