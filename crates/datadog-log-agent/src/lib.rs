// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Node-side half of the log pipeline: tails container log files, filters
//! and enriches the lines, batches them, and forwards the batches to the
//! ingestion service over HTTP.
//!
//! One task per tailed file plus one directory-watch loop and one
//! batch/flush loop, all feeding a single bounded queue. Overload sheds at
//! the queue (entries are dropped and counted) so tailers never stall on a
//! slow downstream.

pub mod buffer;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod pod_meta;
pub mod processor;
pub mod registry;
pub mod stats;
pub mod tailer;
pub mod watcher;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::{Batcher, LogBuffer};
use crate::config::Config;
use crate::error::AgentError;
use crate::forwarder::{Forwarder, HttpForwarder};
use crate::pod_meta::KubernetesMetadataProvider;
use crate::processor::LineProcessor;
use crate::registry::TailRegistry;
use crate::stats::{AgentStats, StatsSnapshot};
use crate::watcher::PathWatcher;

/// Running handle for the node agent. Dropping it does not stop anything;
/// call [`AgentHandle::shutdown`] for a bounded drain.
pub struct AgentHandle {
    cancel: CancellationToken,
    registry: Arc<TailRegistry>,
    stats: Arc<AgentStats>,
    batcher_handle: JoinHandle<()>,
    watcher_handle: JoinHandle<()>,
}

/// Wires up and starts every agent task: discovery/watching, per-file
/// tailers, and the batcher with its HTTP forwarder.
pub async fn start(config: Config) -> Result<AgentHandle, AgentError> {
    let config = Arc::new(config);
    let stats = Arc::new(AgentStats::default());
    let registry = Arc::new(TailRegistry::new());
    let cancel = CancellationToken::new();

    let metadata_provider = Arc::new(KubernetesMetadataProvider::new(
        config.node_name.clone(),
        config.pod_meta_ttl,
        config.pod_meta_max_entries,
    ));
    let processor = Arc::new(LineProcessor::new(
        config.allowed_levels.clone(),
        Some(metadata_provider),
    ));

    let (tx, rx) = mpsc::channel(config.buffer_size);
    let buffer = LogBuffer::new(tx, Arc::clone(&stats));

    let forwarder: Arc<dyn Forwarder> =
        Arc::new(HttpForwarder::new(&config, Arc::clone(&stats)));
    let batcher = Batcher::new(
        rx,
        forwarder,
        config.buffer_size,
        config.flush_interval,
        cancel.clone(),
    );
    let batcher_handle = tokio::spawn(batcher.run());

    let watcher = PathWatcher::new(
        config.log_paths.clone(),
        Arc::clone(&registry),
        processor,
        buffer,
        config.poll_interval,
        cancel.clone(),
    )?;
    let watcher_handle = watcher.start().await?;

    info!(
        "Log agent started: {} pattern(s), forwarding to {}",
        config.log_paths.len(),
        config.forward_url
    );

    Ok(AgentHandle {
        cancel,
        registry,
        stats,
        batcher_handle,
        watcher_handle,
    })
}

impl AgentHandle {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn tailed_files(&self) -> usize {
        self.registry.len().await
    }

    /// Stops all tasks and drains buffered entries, waiting at most `grace`
    /// for the final flush before proceeding unconditionally.
    pub async fn shutdown(self, grace: std::time::Duration) {
        debug!("Agent shutting down");
        self.registry.cancel_all().await;
        self.cancel.cancel();
        self.watcher_handle.abort();
        if tokio::time::timeout(grace, self.batcher_handle)
            .await
            .is_err()
        {
            warn!("Final flush did not complete within {grace:?}, proceeding");
        }
        let snapshot = self.stats.snapshot();
        info!(
            "Agent stopped: {} forwarded, {} shed, {} batches dropped",
            snapshot.entries_forwarded, snapshot.entries_dropped, snapshot.batches_dropped
        );
    }
}
