// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Wires [`GatewayConfig::fleet`] into a live [`RunnerRegistry`] and
//! [`PlacementEngine`] (`§4.1`-`§4.4`, `§6`).
//!
//! This is the only place config-level model/runner descriptions are turned
//! into the scheduler's runtime types; everything downstream of [`build`]
//! talks to `sven_scheduler` directly.

use std::{collections::HashMap, sync::Arc};

use sven_scheduler::{ModelProfile, PlacementEngine, Runner, RunnerRegistry, Slot};

use crate::config::FleetConfig;

/// A fully assembled fleet: the runner pool plus the model catalog that can
/// be placed onto it.
pub struct Fleet {
    pub registry: Arc<RunnerRegistry>,
    pub placement: PlacementEngine,
}

/// Builds a [`Fleet`] from configuration. Runners are registered with no
/// slots — slots are created lazily by the placement engine on first demand
/// for a model (`§4.3`, S2).
pub async fn build(config: &FleetConfig) -> Fleet {
    let registry = Arc::new(RunnerRegistry::new());
    for runner in &config.runners {
        registry
            .register_runner(Runner::new(runner.runner_id.clone(), runner.total_vram_bytes))
            .await;
    }

    let models: HashMap<String, ModelProfile> = config
        .models
        .iter()
        .map(|(model_id, entry)| {
            let profile = ModelProfile {
                model_id: model_id.clone(),
                runtime_kind: entry.runtime_kind.into(),
                weight_bytes_per_gpu: entry.weight_bytes_per_gpu,
                kv_bytes_per_token: entry.kv_bytes_per_token,
                configured_concurrency: entry.concurrency,
            };
            (model_id.clone(), profile)
        })
        .collect();

    let placement = PlacementEngine::new(registry.clone(), models);

    Fleet { registry, placement }
}

/// RAII release for a slot handed back by [`PlacementEngine::place`], which
/// admits (`Slot::start`) before returning. Unlike `SlotGuard::acquire`,
/// this never re-attempts admission — the slot is already admitted by the
/// time [`AdmittedSlot::new`] wraps it.
pub struct AdmittedSlot(Arc<Slot>);

impl AdmittedSlot {
    pub fn new(slot: Arc<Slot>) -> Self {
        AdmittedSlot(slot)
    }

    pub fn slot(&self) -> &Slot {
        &self.0
    }
}

impl Drop for AdmittedSlot {
    fn drop(&mut self) {
        self.0.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KvCacheKindConfig, ModelConfigEntry, RunnerConfigEntry, RuntimeKindConfig};

    fn sample_config() -> FleetConfig {
        let mut models = HashMap::new();
        models.insert(
            "llama-70b".to_string(),
            ModelConfigEntry {
                runtime_kind: RuntimeKindConfig::ModerateBatched,
                weight_bytes_per_gpu: 140_000_000_000,
                kv_bytes_per_token: 524_288,
                concurrency: None,
                kv_cache_kind: KvCacheKindConfig::Mha,
            },
        );
        FleetConfig {
            runners: vec![RunnerConfigEntry {
                runner_id: "gpu-0".to_string(),
                total_vram_bytes: 85_899_345_920,
            }],
            models,
        }
    }

    #[tokio::test]
    async fn builds_registry_with_configured_runners() {
        let fleet = build(&sample_config()).await;
        let snapshot = fleet.registry.snapshot("gpu-0").await.unwrap();
        assert_eq!(snapshot.runner_id, "gpu-0");
        assert_eq!(snapshot.total_vram_bytes, 85_899_345_920);
    }

    #[tokio::test]
    async fn placement_engine_can_place_onto_configured_model() {
        let fleet = build(&sample_config()).await;
        let request = sven_scheduler::PlacementRequest {
            request_id: "r1".to_string(),
            model_id: "llama-70b".to_string(),
            estimator_opts: sven_scheduler::EstimatorOpts {
                context_length: 4096,
                parallel: 1,
                gpu_count: 1,
                kv_cache_kind: sven_scheduler::KvCacheKind::Mha,
            },
        };
        let slot = fleet.placement.place(request).await.unwrap();
        assert_eq!(slot.runner_id, "gpu-0");
        assert!(slot.is_active());
    }

    #[tokio::test]
    async fn admitted_slot_releases_on_drop() {
        let fleet = build(&sample_config()).await;
        let request = sven_scheduler::PlacementRequest {
            request_id: "r2".to_string(),
            model_id: "llama-70b".to_string(),
            estimator_opts: sven_scheduler::EstimatorOpts {
                context_length: 4096,
                parallel: 1,
                gpu_count: 1,
                kv_cache_kind: sven_scheduler::KvCacheKind::Mha,
            },
        };
        let slot = fleet.placement.place(request).await.unwrap();
        assert!(slot.is_active());
        {
            let admitted = AdmittedSlot::new(slot.clone());
            assert!(admitted.slot().is_active());
        }
        assert!(!slot.is_active());
    }

    #[tokio::test]
    async fn empty_config_builds_empty_fleet() {
        let fleet = build(&FleetConfig::default()).await;
        assert!(fleet.registry.snapshot("anything").await.is_none());
    }
}
