// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use glob::Pattern;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buffer::LogBuffer;
use crate::error::AgentError;
use crate::processor::LineProcessor;
use crate::registry::TailRegistry;
use crate::tailer::Tailer;

/// Expands the configured glob patterns, starts a tailer per existing match,
/// and watches each pattern's root directory so files created later get
/// tailers too. Remove events tear the matching tailer down; the tailer's
/// own stat-failure path covers removals the watch misses.
pub struct PathWatcher {
    raw_patterns: Vec<String>,
    patterns: Vec<Pattern>,
    registry: Arc<TailRegistry>,
    processor: Arc<LineProcessor>,
    buffer: LogBuffer,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl PathWatcher {
    pub fn new(
        raw_patterns: Vec<String>,
        registry: Arc<TailRegistry>,
        processor: Arc<LineProcessor>,
        buffer: LogBuffer,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, AgentError> {
        let patterns = raw_patterns
            .iter()
            .map(|raw| Pattern::new(raw))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PathWatcher {
            raw_patterns,
            patterns,
            registry,
            processor,
            buffer,
            poll_interval,
            cancel,
        })
    }

    /// Performs the startup expansion and registers the directory watches,
    /// then moves into a background task that reacts to create/remove
    /// events. Setup failures are fatal; everything after is not.
    pub async fn start(self) -> Result<JoinHandle<()>, AgentError> {
        for raw in &self.raw_patterns {
            for path in glob::glob(raw)?.flatten() {
                if path.is_file() {
                    self.spawn_tailer(path).await;
                }
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |result| {
                let _ = tx.send(result);
            })?;
        for raw in &self.raw_patterns {
            let (root, mode) = watch_root(raw);
            debug!("Watching {} for new files", root.display());
            watcher.watch(&root, mode)?;
        }

        Ok(tokio::spawn(async move {
            // The watcher must outlive the loop or events stop flowing.
            let _watcher = watcher;
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(Ok(event)) => self.handle_event(event).await,
                        Some(Err(err)) => warn!("Watch error: {err}"),
                        None => break,
                    }
                }
            }
            debug!("Path watcher stopped");
        }))
    }

    async fn handle_event(&self, event: notify::Event) {
        match event.kind {
            EventKind::Create(_) => {
                for path in event.paths {
                    if self.matches(&path) {
                        self.spawn_tailer(path).await;
                    }
                }
            }
            EventKind::Remove(_) => {
                for path in event.paths {
                    self.registry.remove(&path).await;
                }
            }
            _ => {}
        }
    }

    fn matches(&self, path: &Path) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }

    async fn spawn_tailer(&self, path: PathBuf) {
        if let Some(token) = self.registry.register(&path).await {
            let tailer = Tailer::new(
                path,
                Arc::clone(&self.registry),
                Arc::clone(&self.processor),
                self.buffer.clone(),
                self.poll_interval,
                token,
            );
            tokio::spawn(tailer.run());
        }
    }
}

/// The deepest glob-free ancestor of a pattern. A pattern whose only
/// wildcard sits in the basename needs just that directory; wildcard
/// directory components force a recursive watch.
fn watch_root(raw: &str) -> (PathBuf, RecursiveMode) {
    let path = Path::new(raw);
    let components: Vec<_> = path.components().collect();
    let glob_idx = components.iter().position(|component| {
        component
            .as_os_str()
            .to_string_lossy()
            .contains(['*', '?', '['])
    });

    match glob_idx {
        None => (
            path.parent().unwrap_or(Path::new("/")).to_path_buf(),
            RecursiveMode::NonRecursive,
        ),
        Some(idx) => {
            let root: PathBuf = components[..idx].iter().collect();
            let mode = if idx == components.len() - 1 {
                RecursiveMode::NonRecursive
            } else {
                RecursiveMode::Recursive
            };
            (root, mode)
        }
    }
}
