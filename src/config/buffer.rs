// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Sample buffer configuration
//!
//! This module defines the flush policy for the in-memory sample buffer.

use serde::{Deserialize, Serialize};

/// Configuration for the sample buffer flush policy.
///
/// A flush is triggered by whichever threshold fires first. Boundary-aligned
/// deployments that want one durable write per boundary set
/// `flush_max_records` to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Flush when the buffer reaches this many records.
    pub flush_max_records: usize,

    /// Flush when the oldest unflushed record is this old, in seconds.
    pub flush_max_age_seconds: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_max_records: 6,
            flush_max_age_seconds: 300,
        }
    }
}
