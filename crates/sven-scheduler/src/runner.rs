// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The runner registry: the catalog of connected compute hosts and the
//! slots they carry. Reads (used constantly during placement) must not
//! block on slot-state mutations, so the registry hands out `Arc<Slot>`
//! handles that remain independently consultable after the registry's read
//! guard is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{Result, SchedulerError};
use crate::slot::{Slot, SlotId};

/// A compute host with one or more GPUs, identified by `runner_id`.
pub struct Runner {
    pub runner_id: String,
    pub total_vram_bytes: u64,
    slots: Vec<Arc<Slot>>,
}

impl Runner {
    pub fn new(runner_id: impl Into<String>, total_vram_bytes: u64) -> Self {
        Runner {
            runner_id: runner_id.into(),
            total_vram_bytes,
            slots: Vec::new(),
        }
    }

    /// VRAM already committed to this runner's slots. Authoritative for
    /// admission decisions in [`crate::PlacementEngine`]; recomputed, never
    /// cached, so it can never drift from the slot set.
    pub fn used_vram_bytes(&self) -> u64 {
        self.slots.iter().map(|s| s.estimated_vram_bytes).sum()
    }

    pub fn free_vram_bytes(&self) -> u64 {
        self.total_vram_bytes.saturating_sub(self.used_vram_bytes())
    }

    pub fn total_load(&self) -> u64 {
        self.slots.iter().map(|s| s.load() as u64).sum()
    }

    pub fn slots(&self) -> &[Arc<Slot>] {
        &self.slots
    }

    pub fn slots_for_model(&self, model_id: &str) -> impl Iterator<Item = &Arc<Slot>> {
        self.slots.iter().filter(move |s| s.model_id == model_id)
    }
}

/// Read-only snapshot of a runner's accounting, returned from the registry
/// for callers (e.g. the `connectivity-probe` CLI, metrics) that should not
/// hold a registry guard.
#[derive(Debug, Clone)]
pub struct RunnerSnapshot {
    pub runner_id: String,
    pub total_vram_bytes: u64,
    pub used_vram_bytes: u64,
    pub slot_count: usize,
}

/// Indexed by `runner_id`, with a secondary `model_id -> slots` index
/// rebuilt alongside every mutation under the same write guard — the
/// `AgentHandle`/connected-peer registries elsewhere in the gateway follow
/// the same `RwLock<HashMap<...>>` shape for the same reason: many
/// concurrent readers, infrequent structural writers.
#[derive(Default)]
pub struct RunnerRegistry {
    runners: RwLock<HashMap<String, Runner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        RunnerRegistry {
            runners: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_runner(&self, runner: Runner) {
        let mut guard = self.runners.write().await;
        guard.insert(runner.runner_id.clone(), runner);
    }

    /// Remove a runner and every slot it carried — the cascade a runner
    /// disconnect triggers for in-flight requests happens at the caller,
    /// once this returns the removed slots.
    pub async fn remove_runner(&self, runner_id: &str) -> Option<Vec<Arc<Slot>>> {
        let mut guard = self.runners.write().await;
        guard.remove(runner_id).map(|r| r.slots)
    }

    /// Create and register a new slot on `runner_id`, returning the handle.
    pub async fn create_slot(
        &self,
        runner_id: &str,
        model_id: &str,
        runtime_kind: crate::model::RuntimeKind,
        max_concurrency: u32,
        estimated_vram_bytes: u64,
    ) -> Result<Arc<Slot>> {
        let mut guard = self.runners.write().await;
        let runner = guard
            .get_mut(runner_id)
            .ok_or_else(|| SchedulerError::RunnerUnknown {
                runner_id: runner_id.to_string(),
            })?;
        let slot = Arc::new(Slot::new(
            runner_id,
            model_id,
            runtime_kind,
            max_concurrency,
            estimated_vram_bytes,
        ));
        runner.slots.push(Arc::clone(&slot));
        Ok(slot)
    }

    /// All warm slots across all runners that serve `model_id`, as
    /// independently-consultable handles. The caller scores/filters/sorts
    /// these without holding the registry lock.
    pub async fn warm_slots_for_model(&self, model_id: &str) -> Vec<Arc<Slot>> {
        let guard = self.runners.read().await;
        guard
            .values()
            .flat_map(|r| r.slots_for_model(model_id).cloned())
            .collect()
    }

    /// Runners ordered by free VRAM descending, for slot-creation fallback
    /// (§4.4 step 5).
    pub async fn runners_by_free_vram_desc(&self) -> Vec<RunnerSnapshot> {
        let guard = self.runners.read().await;
        let mut snapshots: Vec<RunnerSnapshot> = guard
            .values()
            .map(|r| RunnerSnapshot {
                runner_id: r.runner_id.clone(),
                total_vram_bytes: r.total_vram_bytes,
                used_vram_bytes: r.used_vram_bytes(),
                slot_count: r.slots.len(),
            })
            .collect();
        snapshots.sort_by(|a, b| {
            let free_a = a.total_vram_bytes.saturating_sub(a.used_vram_bytes);
            let free_b = b.total_vram_bytes.saturating_sub(b.used_vram_bytes);
            free_b.cmp(&free_a)
        });
        snapshots
    }

    pub async fn total_load_for_runner(&self, runner_id: &str) -> u64 {
        let guard = self.runners.read().await;
        guard.get(runner_id).map(|r| r.total_load()).unwrap_or(0)
    }

    pub async fn snapshot(&self, runner_id: &str) -> Option<RunnerSnapshot> {
        let guard = self.runners.read().await;
        guard.get(runner_id).map(|r| RunnerSnapshot {
            runner_id: r.runner_id.clone(),
            total_vram_bytes: r.total_vram_bytes,
            used_vram_bytes: r.used_vram_bytes(),
            slot_count: r.slots.len(),
        })
    }
}
