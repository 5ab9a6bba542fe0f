// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Registry of currently tailed files.
///
/// The only shared mutable state outside the buffer queue. Lookups vastly
/// outnumber mutations (add on discovery, remove on file disappearance), so
/// it sits behind a reader/writer lock.
#[derive(Default)]
pub struct TailRegistry {
    inner: RwLock<HashMap<PathBuf, CancellationToken>>,
}

impl TailRegistry {
    pub fn new() -> Self {
        TailRegistry {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a path and returns the cancellation token its tailer task
    /// should watch. Returns None if the path is already tailed.
    pub async fn register(&self, path: &Path) -> Option<CancellationToken> {
        let mut map = self.inner.write().await;
        if map.contains_key(path) {
            return None;
        }
        let token = CancellationToken::new();
        map.insert(path.to_path_buf(), token.clone());
        debug!("Registered tailer for {}", path.display());
        Some(token)
    }

    /// Removes a path, cancelling its tailer if one is still running.
    pub async fn remove(&self, path: &Path) {
        if let Some(token) = self.inner.write().await.remove(path) {
            token.cancel();
            debug!("Removed tailer for {}", path.display());
        }
    }

    pub async fn contains(&self, path: &Path) -> bool {
        self.inner.read().await.contains_key(path)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Cancels every tailer. Used on shutdown.
    pub async fn cancel_all(&self) {
        for token in self.inner.read().await.values() {
            token.cancel();
        }
    }
}
