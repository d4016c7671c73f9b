// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! GPU memory estimation.
//!
//! `estimate` is a pure function of its arguments: no ambient configuration,
//! no global state, no I/O. Two calls with identical `(ModelProfile,
//! EstimatorOpts)` always return the same value, and the result is
//! non-decreasing in `opts.parallel` for a fixed model — both are asserted
//! directly in the test suite below rather than left as documentation.

use crate::model::{EstimatorOpts, KvCacheKind, ModelProfile};

/// Estimate total GPU memory, in bytes, required to serve `model` at the
/// concurrency and context length described by `opts`.
///
/// Weight memory scales with `gpu_count` only through sharding (one
/// `weight_bytes_per_gpu`-sized shard per GPU); KV-cache memory scales
/// linearly with `parallel` and `context_length`, discounted by the
/// attention head-sharing implied by `kv_cache_kind`.
pub fn estimate(model: &ModelProfile, opts: EstimatorOpts) -> u64 {
    let weight_bytes = model
        .weight_bytes_per_gpu
        .saturating_mul(opts.gpu_count.max(1) as u64);

    let per_token_per_seq = kv_bytes_per_token_per_seq(model.kv_bytes_per_token, opts.kv_cache_kind);

    let kv_bytes = per_token_per_seq
        .saturating_mul(opts.context_length as u64)
        .saturating_mul(opts.parallel.max(1) as u64);

    weight_bytes.saturating_add(kv_bytes)
}

/// Discount the per-token KV footprint for head-sharing attention variants.
fn kv_bytes_per_token_per_seq(mha_bytes_per_token: u64, kind: KvCacheKind) -> u64 {
    match kind {
        KvCacheKind::Mha => mha_bytes_per_token,
        KvCacheKind::Mqa => {
            // A single shared KV head: divide by a representative head
            // count (8) used across the model family's published configs.
            (mha_bytes_per_token / 8).max(1)
        }
        KvCacheKind::Gqa { groups } => {
            let groups = groups.max(1) as u64;
            (mha_bytes_per_token / groups).max(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RuntimeKind;

    fn profile() -> ModelProfile {
        ModelProfile {
            model_id: "llama-3-8b".into(),
            runtime_kind: RuntimeKind::ModerateBatched,
            weight_bytes_per_gpu: 16_000_000_000,
            kv_bytes_per_token: 524_288,
            configured_concurrency: None,
        }
    }

    fn opts(parallel: u32) -> EstimatorOpts {
        EstimatorOpts {
            context_length: 8192,
            parallel,
            gpu_count: 1,
            kv_cache_kind: KvCacheKind::Mha,
        }
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let m = profile();
        let a = estimate(&m, opts(4));
        let b = estimate(&m, opts(4));
        assert_eq!(a, b);
    }

    #[test]
    fn monotonic_in_parallel() {
        let m = profile();
        let mut last = estimate(&m, opts(1));
        for parallel in 2..=16 {
            let next = estimate(&m, opts(parallel));
            assert!(next >= last, "estimate decreased at parallel={parallel}");
            last = next;
        }
    }

    #[test]
    fn distinct_parallel_yields_distinct_estimates() {
        let m = profile();
        assert_ne!(estimate(&m, opts(1)), estimate(&m, opts(4)));
    }

    #[test]
    fn gqa_and_mqa_reduce_kv_footprint_relative_to_mha() {
        let m = profile();
        let mha = estimate(&m, opts(8));
        let gqa = estimate(
            &m,
            EstimatorOpts {
                kv_cache_kind: KvCacheKind::Gqa { groups: 4 },
                ..opts(8)
            },
        );
        let mqa = estimate(
            &m,
            EstimatorOpts {
                kv_cache_kind: KvCacheKind::Mqa,
                ..opts(8)
            },
        );
        assert!(gqa < mha);
        assert!(mqa < gqa);
    }

    #[test]
    fn weight_memory_scales_with_gpu_count() {
        let m = profile();
        let one_gpu = estimate(&m, opts(1));
        let two_gpu = estimate(
            &m,
            EstimatorOpts {
                gpu_count: 2,
                ..opts(1)
            },
        );
        assert!(two_gpu > one_gpu);
    }
}
