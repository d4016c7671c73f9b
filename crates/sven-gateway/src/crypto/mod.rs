// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Token generation and storage for the HTTP bearer-auth layer.

pub mod token;

pub use token::{RawToken, StoredToken, StoredTokenFile};
