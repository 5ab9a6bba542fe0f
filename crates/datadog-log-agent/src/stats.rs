// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

/// Internal counters for the node-side engine. These back the exported
/// metrics; registration with a metrics backend happens outside this crate.
#[derive(Debug, Default)]
pub struct AgentStats {
    /// Lines accepted into the buffer queue.
    pub entries_enqueued: AtomicU64,
    /// Lines shed because the buffer queue was full.
    pub entries_dropped: AtomicU64,
    /// Entries delivered to the ingestion service.
    pub entries_forwarded: AtomicU64,
    /// Sub-batches abandoned after retry exhaustion or a 4xx response.
    pub batches_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub entries_enqueued: u64,
    pub entries_dropped: u64,
    pub entries_forwarded: u64,
    pub batches_dropped: u64,
}

impl AgentStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            entries_enqueued: self.entries_enqueued.load(Ordering::Relaxed),
            entries_dropped: self.entries_dropped.load(Ordering::Relaxed),
            entries_forwarded: self.entries_forwarded.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
        }
    }
}
