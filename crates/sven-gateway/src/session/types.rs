// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Session, interaction, and durable-metadata types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A long-lived conversation between a user and an external agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub owner_user_id: String,
    pub external_agent_thread_id: Option<String>,
    pub metadata: SessionMetadata,
}

/// The durability substrate for restart recovery (`§4.7`, `§4.9`). This is
/// the *only* state that survives an orchestrator restart; everything else
/// is rebuilt from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub external_agent_thread_id: Option<String>,
    pub waiting_interaction_id: Option<String>,
    pub last_request_id: Option<String>,
    #[serde(default)]
    pub request_started_at: Option<DateTime<Utc>>,
}

/// One turn in a session. The full rendered content of an interaction is an
/// idempotent function of its entries — replaying the same entries always
/// renders the same thing, which is what makes the boundary protocol safe to
/// republish wholesale instead of diffing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub interaction_id: String,
    pub session_id: String,
    pub entries: Vec<Entry>,
    pub version: u64,
}

impl Interaction {
    pub fn new(interaction_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            interaction_id: interaction_id.into(),
            session_id: session_id.into(),
            entries: Vec::new(),
            version: 0,
        }
    }

    /// Appends an entry and advances the version. Appending is always a
    /// boundary event (`§4.8`): a new entry is never coalesced away.
    pub fn push_entry(&mut self, entry: Entry) {
        self.entries.push(entry);
        self.version += 1;
    }

    /// Updates the status of the most recent tool call named `name`, if any
    /// is still pending. Returns whether a transition happened.
    pub fn transition_tool_call(&mut self, name: &str, status: ToolCallStatus) -> bool {
        for entry in self.entries.iter_mut().rev() {
            if let Entry::ToolCall {
                name: entry_name,
                status: entry_status,
                ..
            } = entry
            {
                if entry_name == name && *entry_status != status {
                    *entry_status = status;
                    self.version += 1;
                    return true;
                }
            }
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entry {
    UserMessage { text: String },
    AssistantTextChunk { text: String },
    ToolCall {
        id: String,
        name: String,
        status: ToolCallStatus,
    },
    /// Turn terminator: `stopped | error | refusal` (`§4.8`).
    Terminator { reason: TerminatorReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminatorReason {
    Stopped,
    Error,
    Refusal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_entry_advances_version() {
        let mut interaction = Interaction::new("i1", "s1");
        assert_eq!(interaction.version, 0);
        interaction.push_entry(Entry::UserMessage {
            text: "hi".to_string(),
        });
        assert_eq!(interaction.version, 1);
    }

    #[test]
    fn transition_tool_call_updates_only_pending_matching_call() {
        let mut interaction = Interaction::new("i1", "s1");
        interaction.push_entry(Entry::ToolCall {
            id: "t1".to_string(),
            name: "grep".to_string(),
            status: ToolCallStatus::Pending,
        });
        let v0 = interaction.version;
        assert!(interaction.transition_tool_call("grep", ToolCallStatus::Completed));
        assert_eq!(interaction.version, v0 + 1);
        assert!(!interaction.transition_tool_call("grep", ToolCallStatus::Completed));
    }
}
