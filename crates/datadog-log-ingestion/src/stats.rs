// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

/// Internal counters for the ingestion service. Registration with a metrics
/// backend happens outside this crate.
#[derive(Debug, Default)]
pub struct IngestStats {
    /// Entries persisted to the vector store.
    pub entries_stored: AtomicU64,
    /// Batches that failed to embed or insert.
    pub batches_failed: AtomicU64,
    /// Streaming lines skipped as unparseable or invalid.
    pub stream_lines_skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    pub entries_stored: u64,
    pub batches_failed: u64,
    pub stream_lines_skipped: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            entries_stored: self.entries_stored.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            stream_lines_skipped: self.stream_lines_skipped.load(Ordering::Relaxed),
        }
    }
}
