// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Placement: choosing (or creating) the slot that serves an incoming
//! request.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Result, SchedulerError};
use crate::estimator::estimate;
use crate::model::{EstimatorOpts, ModelProfile};
use crate::runner::RunnerRegistry;
use crate::slot::Slot;

/// One placement decision's inputs.
#[derive(Debug, Clone)]
pub struct PlacementRequest {
    pub request_id: String,
    pub model_id: String,
    pub estimator_opts: EstimatorOpts,
}

/// Chooses a slot for each incoming request, creating one when no warm
/// slot has capacity and a runner has room for it.
pub struct PlacementEngine {
    registry: Arc<RunnerRegistry>,
    models: HashMap<String, ModelProfile>,
}

impl PlacementEngine {
    pub fn new(registry: Arc<RunnerRegistry>, models: HashMap<String, ModelProfile>) -> Self {
        PlacementEngine { registry, models }
    }

    /// Run the full placement algorithm (`SPEC_FULL.md` §4.4): enumerate
    /// warm slots, filter by capacity, sort by load/runner-load/recency/
    /// fairness tiebreak, admit onto the best candidate, retrying onto the
    /// next-best candidate if admission loses a race; failing that, create
    /// a new slot on the runner with the most free VRAM that can fit it.
    pub async fn place(&self, request: PlacementRequest) -> Result<Arc<Slot>> {
        let model = self
            .models
            .get(&request.model_id)
            .ok_or_else(|| SchedulerError::ModelUnknown {
                model_id: request.model_id.clone(),
            })?;

        let mut candidates = self.registry.warm_slots_for_model(&request.model_id).await;
        candidates.retain(|slot| slot.has_capacity());
        self.sort_candidates(&mut candidates, &request.request_id).await;

        for slot in &candidates {
            if slot.start() {
                info!(
                    slot_id = %slot.id,
                    runner_id = %slot.runner_id,
                    model_id = %request.model_id,
                    request_id = %request.request_id,
                    "admitted request onto warm slot",
                );
                return Ok(Arc::clone(slot));
            }
            // Lost the admission race to a concurrent placement: the slot
            // filled up between our filter pass and our start() call. Move
            // on to the next-best already-sorted candidate rather than
            // re-enumerating from scratch.
            warn!(slot_id = %slot.id, "lost admission race, trying next candidate");
        }

        self.create_and_admit(model, &request).await
    }

    async fn sort_candidates(&self, candidates: &mut [Arc<Slot>], request_id: &str) {
        let mut runner_loads: HashMap<String, u64> = HashMap::new();
        for slot in candidates.iter() {
            if !runner_loads.contains_key(&slot.runner_id) {
                let load = self.registry.total_load_for_runner(&slot.runner_id).await;
                runner_loads.insert(slot.runner_id.clone(), load);
            }
        }

        candidates.sort_by(|a, b| {
            a.load()
                .cmp(&b.load())
                .then_with(|| {
                    let la = runner_loads.get(&a.runner_id).copied().unwrap_or(0);
                    let lb = runner_loads.get(&b.runner_id).copied().unwrap_or(0);
                    la.cmp(&lb)
                })
                .then_with(|| b.last_activity_millis().cmp(&a.last_activity_millis()))
                .then_with(|| tiebreak_key(request_id, a.id).cmp(&tiebreak_key(request_id, b.id)))
        });
    }

    async fn create_and_admit(
        &self,
        model: &ModelProfile,
        request: &PlacementRequest,
    ) -> Result<Arc<Slot>> {
        let max_concurrency = model
            .configured_concurrency
            .unwrap_or_else(|| model.runtime_kind.default_max_concurrency());

        let opts = EstimatorOpts {
            parallel: max_concurrency,
            ..request.estimator_opts
        };
        let required_bytes = estimate(model, opts);

        for runner in self.registry.runners_by_free_vram_desc().await {
            if runner.total_vram_bytes.saturating_sub(runner.used_vram_bytes) < required_bytes {
                continue;
            }
            let slot = self
                .registry
                .create_slot(
                    &runner.runner_id,
                    &model.model_id,
                    model.runtime_kind,
                    max_concurrency,
                    required_bytes,
                )
                .await?;
            if slot.start() {
                info!(
                    slot_id = %slot.id,
                    runner_id = %runner.runner_id,
                    model_id = %model.model_id,
                    request_id = %request.request_id,
                    estimated_vram_bytes = required_bytes,
                    "created new slot for request",
                );
                return Ok(slot);
            }
        }

        Err(SchedulerError::NoCapacity {
            model_id: model.model_id.clone(),
        })
    }
}

/// Stable pseudo-random tiebreak key: a request id hashed together with a
/// candidate's slot id, so ties among otherwise-identical candidates are
/// broken consistently for a given request but not biased toward slot
/// creation order across different requests.
fn tiebreak_key(request_id: &str, slot_id: crate::slot::SlotId) -> u64 {
    let mut hasher = DefaultHasher::new();
    request_id.hash(&mut hasher);
    slot_id.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{KvCacheKind, RuntimeKind};
    use crate::runner::Runner;

    fn model(model_id: &str, runtime_kind: RuntimeKind, configured_concurrency: Option<u32>) -> ModelProfile {
        ModelProfile {
            model_id: model_id.into(),
            runtime_kind,
            weight_bytes_per_gpu: 16_000_000_000,
            kv_bytes_per_token: 524_288,
            configured_concurrency,
        }
    }

    fn opts() -> EstimatorOpts {
        EstimatorOpts {
            context_length: 4096,
            parallel: 1,
            gpu_count: 1,
            kv_cache_kind: KvCacheKind::Mha,
        }
    }

    async fn engine_with_two_slots() -> (PlacementEngine, Arc<Slot>, Arc<Slot>) {
        let registry = Arc::new(RunnerRegistry::new());
        registry.register_runner(Runner::new("gpu-0", 100_000_000_000)).await;

        let slot_a = registry
            .create_slot("gpu-0", "m", RuntimeKind::ModerateBatched, 4, 1_000)
            .await
            .unwrap();
        let slot_b = registry
            .create_slot("gpu-0", "m", RuntimeKind::ModerateBatched, 4, 1_000)
            .await
            .unwrap();

        // Slot A: active=3, Slot B: active=1 (scenario S1).
        assert!(slot_a.start() && slot_a.start() && slot_a.start());
        assert!(slot_b.start());

        let mut models = HashMap::new();
        models.insert("m".to_string(), model("m", RuntimeKind::ModerateBatched, None));
        let engine = PlacementEngine::new(registry, models);
        (engine, slot_a, slot_b)
    }

    #[tokio::test]
    async fn s1_picks_least_busy_slot() {
        let (engine, slot_a, slot_b) = engine_with_two_slots().await;

        let chosen = engine
            .place(PlacementRequest {
                request_id: "req-1".into(),
                model_id: "m".into(),
                estimator_opts: opts(),
            })
            .await
            .unwrap();

        assert_eq!(chosen.id, slot_b.id);
        assert_eq!(slot_b.load(), 2);
        assert_eq!(slot_a.load(), 3);
    }

    #[tokio::test]
    async fn s2_creates_slot_when_no_warm_capacity() {
        let registry = Arc::new(RunnerRegistry::new());
        registry.register_runner(Runner::new("gpu-0", 24_000_000_000)).await;

        let mut models = HashMap::new();
        models.insert(
            "m".to_string(),
            ModelProfile {
                model_id: "m".into(),
                runtime_kind: RuntimeKind::ModerateBatched,
                weight_bytes_per_gpu: 4_000_000_000,
                kv_bytes_per_token: 262_144,
                configured_concurrency: Some(4),
            },
        );
        let engine = PlacementEngine::new(Arc::clone(&registry), models);

        let slot = engine
            .place(PlacementRequest {
                request_id: "req-2".into(),
                model_id: "m".into(),
                estimator_opts: opts(),
            })
            .await
            .unwrap();

        assert_eq!(slot.max_concurrency, 4);
        assert_eq!(slot.load(), 1);
        let snap = registry.snapshot("gpu-0").await.unwrap();
        assert_eq!(snap.used_vram_bytes, slot.estimated_vram_bytes);
    }

    #[tokio::test]
    async fn fails_with_no_capacity_when_nothing_fits() {
        let registry = Arc::new(RunnerRegistry::new());
        registry.register_runner(Runner::new("gpu-0", 1_000)).await;

        let mut models = HashMap::new();
        models.insert("m".to_string(), model("m", RuntimeKind::FastBatched, None));
        let engine = PlacementEngine::new(registry, models);

        let err = engine
            .place(PlacementRequest {
                request_id: "req-3".into(),
                model_id: "m".into(),
                estimator_opts: opts(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NoCapacity { .. }));
    }

    #[tokio::test]
    async fn fails_with_model_unknown() {
        let registry = Arc::new(RunnerRegistry::new());
        let engine = PlacementEngine::new(registry, HashMap::new());
        let err = engine
            .place(PlacementRequest {
                request_id: "req-4".into(),
                model_id: "missing".into(),
                estimator_opts: opts(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ModelUnknown { .. }));
    }

    #[tokio::test]
    async fn concurrent_placement_admits_exactly_capacity_requests() {
        // VRAM is deliberately too small to create a second slot, so every
        // loser of the single-slot admission race must fail NoCapacity
        // rather than fall through to slot creation.
        let registry = Arc::new(RunnerRegistry::new());
        registry.register_runner(Runner::new("gpu-0", 2_000)).await;
        registry
            .create_slot("gpu-0", "m", RuntimeKind::SingleRequest, 1, 1_000)
            .await
            .unwrap();

        let mut models = HashMap::new();
        models.insert("m".to_string(), model("m", RuntimeKind::SingleRequest, None));
        let engine = Arc::new(PlacementEngine::new(registry, models));

        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine
                    .place(PlacementRequest {
                        request_id: format!("req-{i}"),
                        model_id: "m".into(),
                        estimator_opts: opts(),
                    })
                    .await
            }));
        }

        let mut ok = 0;
        let mut no_capacity = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(SchedulerError::NoCapacity { .. }) => no_capacity += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(no_capacity, 7);
    }
}
