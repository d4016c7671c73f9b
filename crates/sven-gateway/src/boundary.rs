// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The boundary update protocol (`§4.8`).
//!
//! An external agent emits many token-granularity events per turn.
//! Forwarding every one of them to the client, each carrying the full
//! cumulative render, is O(n²) in the number of tokens. This module
//! identifies which events are *boundaries* — points where the client's view
//! actually needs to change — and coalesces everything else, so a turn
//! publishes O(boundaries) updates regardless of how many tokens it streamed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::session::{Entry, Interaction, ToolCallStatus};

/// One event an external agent reports during a turn. This is a routing-
/// layer view of agent activity, not the entry model itself: `TextDelta`
/// carries streamed content that is folded into the current entry without
/// ever itself becoming a published update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionEvent {
    NewEntry(Entry),
    TextDelta { entry_index: usize, text: String },
    ToolCallStatusChanged { call_id: String, status: ToolCallStatus },
    TurnTerminated,
}

/// Boundary events are exactly: a new entry, a tool-call status transition,
/// and the turn terminator. Token streaming within an already-open entry is
/// the only non-boundary case.
pub fn is_boundary(event: &InteractionEvent) -> bool {
    !matches!(event, InteractionEvent::TextDelta { .. })
}

/// The payload published to the client stream. It is always the full
/// interaction — never a delta — so a receiver can rerender idempotently no
/// matter how many boundary events it missed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Update {
    InteractionUpdate { interaction: Interaction },
    SessionUpdate { session_id: String, interaction_ids: Vec<String> },
}

/// Coalesces a stream of [`InteractionEvent`]s for one session into boundary
/// publications, maintaining the per-entry accumulation state needed to
/// fold `TextDelta`s into their entry before a boundary fires.
///
/// Ordering: updates for a single interaction are totally ordered (the
/// coalescer only ever appends or mutates in place, never reorders);
/// updates across distinct interactions of the same session are ordered by
/// interaction creation, which callers get for free by calling
/// [`BoundaryCoalescer::apply`] in arrival order per interaction and
/// creating interactions in [`BoundaryCoalescer::open_interaction`] order.
pub struct BoundaryCoalescer {
    session_id: String,
    interactions: HashMap<String, Interaction>,
    order: Vec<String>,
}

impl BoundaryCoalescer {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            interactions: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn open_interaction(&mut self, interaction_id: &str) {
        if !self.interactions.contains_key(interaction_id) {
            self.interactions.insert(
                interaction_id.to_string(),
                Interaction::new(interaction_id, self.session_id.clone()),
            );
            self.order.push(interaction_id.to_string());
        }
    }

    /// Applies `event` to `interaction_id`'s state. Returns `Some(Update)`
    /// only when `event` is a boundary; non-boundary events still mutate
    /// the accumulated entry so the next boundary's render is correct, but
    /// produce no output of their own.
    pub fn apply(&mut self, interaction_id: &str, event: InteractionEvent) -> Option<Update> {
        self.open_interaction(interaction_id);
        let boundary = is_boundary(&event);
        let interaction = self.interactions.get_mut(interaction_id)?;

        match event {
            InteractionEvent::NewEntry(entry) => interaction.push_entry(entry),
            InteractionEvent::TextDelta { entry_index, text } => {
                if let Some(Entry::AssistantTextChunk { text: existing }) =
                    interaction.entries.get_mut(entry_index)
                {
                    existing.push_str(&text);
                }
            }
            InteractionEvent::ToolCallStatusChanged { call_id, status } => {
                for entry in interaction.entries.iter_mut().rev() {
                    if let Entry::ToolCall { id, status: s, .. } = entry {
                        if *id == call_id {
                            *s = status;
                            interaction.version += 1;
                            break;
                        }
                    }
                }
            }
            InteractionEvent::TurnTerminated => {
                interaction.version += 1;
            }
        }

        if boundary {
            Some(Update::InteractionUpdate {
                interaction: interaction.clone(),
            })
        } else {
            None
        }
    }

    /// A full-session refresh for a client that just reconnected, supplied
    /// from in-memory state (callers needing durable recovery should read
    /// through [`crate::session::SessionStore`] instead).
    pub fn session_refresh(&self) -> Update {
        Update::SessionUpdate {
            session_id: self.session_id.clone(),
            interaction_ids: self.order.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::TerminatorReason;

    #[test]
    fn text_delta_is_not_a_boundary() {
        assert!(!is_boundary(&InteractionEvent::TextDelta {
            entry_index: 0,
            text: "x".to_string()
        }));
    }

    #[test]
    fn new_entry_and_tool_status_and_terminator_are_boundaries() {
        assert!(is_boundary(&InteractionEvent::NewEntry(Entry::UserMessage {
            text: "hi".to_string()
        })));
        assert!(is_boundary(&InteractionEvent::ToolCallStatusChanged {
            call_id: "c1".to_string(),
            status: ToolCallStatus::Completed,
        }));
        assert!(is_boundary(&InteractionEvent::TurnTerminated));
    }

    #[test]
    fn many_text_deltas_produce_one_boundary_on_new_entry() {
        let mut coalescer = BoundaryCoalescer::new("s1");
        coalescer.apply(
            "i1",
            InteractionEvent::NewEntry(Entry::AssistantTextChunk {
                text: String::new(),
            }),
        );

        let mut updates = 0;
        for chunk in ["The ", "quick ", "brown ", "fox"] {
            let update = coalescer.apply(
                "i1",
                InteractionEvent::TextDelta {
                    entry_index: 0,
                    text: chunk.to_string(),
                },
            );
            if update.is_some() {
                updates += 1;
            }
        }
        assert_eq!(updates, 0, "token streaming must not publish per-token updates");

        let terminator = coalescer.apply("i1", InteractionEvent::TurnTerminated);
        assert!(terminator.is_some());

        if let Some(Update::InteractionUpdate { interaction }) = terminator {
            match &interaction.entries[0] {
                Entry::AssistantTextChunk { text } => {
                    assert_eq!(text, "The quick brown fox");
                }
                other => panic!("unexpected entry {other:?}"),
            }
        } else {
            panic!("expected interaction update");
        }
    }

    #[test]
    fn tool_call_status_transition_is_published_and_reflected() {
        let mut coalescer = BoundaryCoalescer::new("s1");
        coalescer.apply(
            "i1",
            InteractionEvent::NewEntry(Entry::ToolCall {
                id: "c1".to_string(),
                name: "grep".to_string(),
                status: ToolCallStatus::Pending,
            }),
        );
        let update = coalescer.apply(
            "i1",
            InteractionEvent::ToolCallStatusChanged {
                call_id: "c1".to_string(),
                status: ToolCallStatus::Completed,
            },
        );
        let Some(Update::InteractionUpdate { interaction }) = update else {
            panic!("expected interaction update");
        };
        match &interaction.entries[0] {
            Entry::ToolCall { status, .. } => assert_eq!(*status, ToolCallStatus::Completed),
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn session_refresh_lists_interactions_in_creation_order() {
        let mut coalescer = BoundaryCoalescer::new("s1");
        coalescer.open_interaction("i1");
        coalescer.open_interaction("i2");
        coalescer.open_interaction("i1"); // reopening does not reorder

        let Update::SessionUpdate { interaction_ids, .. } = coalescer.session_refresh() else {
            panic!("expected session update");
        };
        assert_eq!(interaction_ids, vec!["i1".to_string(), "i2".to_string()]);
    }

    #[test]
    fn s3_user_chunk_two_tool_calls_and_terminator_publish_seven_updates() {
        let mut coalescer = BoundaryCoalescer::new("s1");
        let mut updates = 0;
        let mut count = |u: Option<Update>| {
            if u.is_some() {
                updates += 1;
            }
        };

        // user message: 1 boundary
        count(coalescer.apply(
            "i1",
            InteractionEvent::NewEntry(Entry::UserMessage {
                text: "hi".to_string(),
            }),
        ));

        // assistant chunk: only the opening entry is a boundary, the other
        // 499 token deltas are folded in silently.
        count(coalescer.apply(
            "i1",
            InteractionEvent::NewEntry(Entry::AssistantTextChunk {
                text: String::new(),
            }),
        ));
        for _ in 0..499 {
            count(coalescer.apply(
                "i1",
                InteractionEvent::TextDelta {
                    entry_index: 1,
                    text: "x".to_string(),
                },
            ));
        }

        // two tool calls, each pending -> completed: 2 boundaries apiece.
        for call_id in ["c1", "c2"] {
            count(coalescer.apply(
                "i1",
                InteractionEvent::NewEntry(Entry::ToolCall {
                    id: call_id.to_string(),
                    name: "grep".to_string(),
                    status: ToolCallStatus::Pending,
                }),
            ));
            count(coalescer.apply(
                "i1",
                InteractionEvent::ToolCallStatusChanged {
                    call_id: call_id.to_string(),
                    status: ToolCallStatus::Completed,
                },
            ));
        }

        // terminator: 1 boundary
        count(coalescer.apply("i1", InteractionEvent::TurnTerminated));

        assert_eq!(updates, 7);
    }

    #[test]
    fn terminator_reason_variant_round_trips_in_an_entry() {
        let mut coalescer = BoundaryCoalescer::new("s1");
        let update = coalescer.apply(
            "i1",
            InteractionEvent::NewEntry(Entry::Terminator {
                reason: TerminatorReason::Stopped,
            }),
        );
        assert!(update.is_some());
    }
}
