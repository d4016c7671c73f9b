// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! A `Slot` is one loaded model instance on one runner. Its concurrency
//! counter is the single admission point for requests targeting that
//! instance, and must stay linearizable without taking a lock — placement
//! reads `load()`/`has_capacity()` on candidate slots while scoring them,
//! which would deadlock-prone or simply slow under a mutex held across the
//! whole decision.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::RuntimeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotId(pub Uuid);

impl SlotId {
    pub fn new() -> Self {
        SlotId(Uuid::new_v4())
    }
}

impl Default for SlotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One loaded model instance on one runner.
///
/// `max_concurrency` is fixed at construction; `active_requests` and
/// `last_activity` are the only mutable state, and both are plain atomics —
/// no lock is needed to keep `start`/`release`/`has_capacity`/`is_active`/
/// `load` linearizable with respect to each other.
#[derive(Debug)]
pub struct Slot {
    pub id: SlotId,
    pub runner_id: String,
    pub model_id: String,
    pub runtime_kind: RuntimeKind,
    pub max_concurrency: u32,
    pub estimated_vram_bytes: u64,
    active_requests: AtomicU32,
    last_activity_millis: AtomicI64,
}

impl Slot {
    pub fn new(
        runner_id: impl Into<String>,
        model_id: impl Into<String>,
        runtime_kind: RuntimeKind,
        max_concurrency: u32,
        estimated_vram_bytes: u64,
    ) -> Self {
        Slot {
            id: SlotId::new(),
            runner_id: runner_id.into(),
            model_id: model_id.into(),
            runtime_kind,
            max_concurrency: max_concurrency.max(1),
            estimated_vram_bytes,
            active_requests: AtomicU32::new(0),
            last_activity_millis: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    /// Attempt to admit one request. Combines the capacity check and the
    /// increment in a single compare-and-swap loop so that a caller never
    /// observes `active_requests` exceed `max_concurrency`, even under
    /// concurrent admitters racing on the same slot.
    pub fn start(&self) -> bool {
        let admitted = self
            .active_requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current < self.max_concurrency {
                    Some(current + 1)
                } else {
                    None
                }
            })
            .is_ok();
        if admitted {
            self.touch();
        }
        admitted
    }

    /// Release one admitted request. Clamps at zero defensively: a
    /// double-release is a caller bug, but it must never be observable as a
    /// negative counter.
    pub fn release(&self) {
        let prev = self
            .active_requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(1))
            });
        if let Ok(0) = prev {
            tracing::warn!(slot_id = %self.id, "slot released while already at zero active requests");
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.active_requests.load(Ordering::SeqCst) < self.max_concurrency
    }

    pub fn is_active(&self) -> bool {
        self.active_requests.load(Ordering::SeqCst) > 0
    }

    pub fn load(&self) -> u32 {
        self.active_requests.load(Ordering::SeqCst)
    }

    pub fn last_activity_millis(&self) -> i64 {
        self.last_activity_millis.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.last_activity_millis
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }
}

/// RAII guard for a successful [`Slot::start`]. Releasing on `Drop` means a
/// panicking or early-returning request handler cannot leak an admitted
/// slot the way a bare `start`/`release` pair could.
pub struct SlotGuard {
    slot: std::sync::Arc<Slot>,
}

impl SlotGuard {
    /// Attempt admission; returns `None` if the slot has no capacity.
    pub fn acquire(slot: std::sync::Arc<Slot>) -> Option<Self> {
        if slot.start() {
            Some(SlotGuard { slot })
        } else {
            None
        }
    }

    pub fn slot(&self) -> &Slot {
        &self.slot
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slot.release();
    }
}
