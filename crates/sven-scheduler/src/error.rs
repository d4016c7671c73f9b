// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Placement error taxonomy.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No runner has a warm slot with capacity, and no runner has enough
    /// free VRAM to host a new one.
    #[error("no capacity available for model {model_id}")]
    NoCapacity { model_id: String },

    /// The requested model has no known profile.
    #[error("model {model_id} is not known to the registry")]
    ModelUnknown { model_id: String },

    /// The caller's context was cancelled while awaiting placement.
    #[error("placement for request {request_id} was cancelled")]
    Cancelled { request_id: String },

    /// A runner id referenced a runner that is not (or no longer) registered.
    #[error("runner {runner_id} is not registered")]
    RunnerUnknown { runner_id: String },
}
