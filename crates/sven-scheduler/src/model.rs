// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Model and runtime descriptors used for placement and memory estimation.

use serde::{Deserialize, Serialize};

/// The batching behavior of the inference runtime hosting a model.
///
/// New runtimes are added by extending this enum, not by introducing a
/// trait hierarchy — the capability differences between runtimes are a
/// handful of scalar knobs (default concurrency, argument injection
/// style), not distinct behavior worth dynamic dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeKind {
    /// Native continuous batching (e.g. vLLM-style engines). Many
    /// concurrent sequences share one forward pass.
    FastBatched,
    /// Limited parallel decode slots (e.g. llama.cpp-style engines).
    ModerateBatched,
    /// One request in flight at a time.
    SingleRequest,
}

impl RuntimeKind {
    /// The default `max_concurrency` used when a model's configuration does
    /// not pin an explicit value. These are protocol values: they also
    /// determine the memory estimate and the runtime argument injected at
    /// launch (see [`crate::inject_runtime_args`]).
    pub fn default_max_concurrency(self) -> u32 {
        match self {
            RuntimeKind::FastBatched => 256,
            RuntimeKind::ModerateBatched => 4,
            RuntimeKind::SingleRequest => 1,
        }
    }
}

/// KV-cache layout, as it affects per-sequence memory scaling.
///
/// Modeled as an enum rather than a free-form string so that the
/// "pure function of its arguments" invariant in [`crate::estimate`] is
/// enforced by the type system: a caller cannot pass an unrecognized cache
/// kind and silently fall back to some default scaling factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KvCacheKind {
    /// Multi-head attention: one KV head per query head.
    Mha,
    /// Multi-query attention: a single shared KV head.
    Mqa,
    /// Grouped-query attention: `groups` shared KV heads.
    Gqa { groups: u8 },
}

/// Static properties of a model, independent of how it is currently
/// deployed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelProfile {
    pub model_id: String,
    pub runtime_kind: RuntimeKind,
    /// Base weight footprint for one full (unsharded) copy of the model.
    pub weight_bytes_per_gpu: u64,
    /// Per-token, per-sequence KV-cache footprint for one attention head
    /// pair at `Mha` density; `Gqa`/`Mqa` scale this down per §4.1.
    pub kv_bytes_per_token: u64,
    /// Explicit concurrency override. When set, takes precedence over
    /// [`RuntimeKind::default_max_concurrency`].
    pub configured_concurrency: Option<u32>,
}

/// Inputs to [`crate::estimate`] that vary per placement decision rather
/// than per model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EstimatorOpts {
    pub context_length: u32,
    /// Number of concurrent sequences the slot must budget memory for.
    /// This is the `parallel` input from the spec — the estimator's cache
    /// key and monotonicity property are both defined in terms of it.
    pub parallel: u32,
    pub gpu_count: u32,
    pub kv_cache_kind: KvCacheKind,
}
