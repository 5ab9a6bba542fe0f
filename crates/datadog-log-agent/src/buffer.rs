// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use datadog_log_core::LogEntry;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::forwarder::Forwarder;
use crate::stats::AgentStats;

/// Producer side of the bounded entry queue.
///
/// Pushes never block: when the queue is full the entry is shed and the drop
/// counter incremented, so a slow downstream can never stall a tailer.
#[derive(Clone)]
pub struct LogBuffer {
    tx: mpsc::Sender<LogEntry>,
    stats: Arc<AgentStats>,
}

impl LogBuffer {
    pub fn new(tx: mpsc::Sender<LogEntry>, stats: Arc<AgentStats>) -> Self {
        LogBuffer { tx, stats }
    }

    pub fn push(&self, entry: LogEntry) {
        match self.tx.try_send(entry) {
            Ok(()) => {
                self.stats.entries_enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.stats.entries_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 1000 == 1 {
                    warn!("Buffer full, shedding entries ({dropped} dropped so far)");
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Buffer closed, dropping entry");
            }
        }
    }
}

/// Consumer side: accumulates entries and flushes when the batch reaches the
/// configured size or the flush interval fires, whichever happens first. An
/// empty batch is never flushed.
///
/// The forward call runs synchronously inside the flush step, so a slow
/// downstream delays the next tick rather than piling up concurrent sends.
pub struct Batcher {
    rx: mpsc::Receiver<LogEntry>,
    forwarder: Arc<dyn Forwarder>,
    batch_size: usize,
    flush_interval: Duration,
    cancel: CancellationToken,
}

impl Batcher {
    pub fn new(
        rx: mpsc::Receiver<LogEntry>,
        forwarder: Arc<dyn Forwarder>,
        batch_size: usize,
        flush_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Batcher {
            rx,
            forwarder,
            batch_size: batch_size.max(1),
            flush_interval,
            cancel,
        }
    }

    pub async fn run(mut self) {
        let mut pending: Vec<LogEntry> = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.flush(&mut pending).await;
                }
                received = self.rx.recv() => match received {
                    Some(entry) => {
                        pending.push(entry);
                        if pending.len() >= self.batch_size {
                            self.flush(&mut pending).await;
                        }
                    }
                    None => break,
                }
            }
        }

        // Shutdown: drain whatever is already queued without waiting for
        // more, then flush the remainder.
        while let Ok(entry) = self.rx.try_recv() {
            pending.push(entry);
        }
        self.flush(&mut pending).await;
        debug!("Batcher stopped");
    }

    async fn flush(&self, pending: &mut Vec<LogEntry>) {
        if pending.is_empty() {
            return;
        }
        let batch = std::mem::take(pending);
        debug!("Flushing {} entries", batch.len());
        self.forwarder.forward(batch).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingForwarder {
        batches: Mutex<Vec<Vec<LogEntry>>>,
    }

    #[async_trait]
    impl Forwarder for RecordingForwarder {
        async fn forward(&self, logs: Vec<LogEntry>) {
            self.batches.lock().unwrap().push(logs);
        }
    }

    fn entry(i: i64) -> LogEntry {
        LogEntry::new(i, format!("m{i}"), "s")
    }

    #[tokio::test]
    async fn test_push_sheds_on_overflow() {
        let stats = Arc::new(AgentStats::default());
        let (tx, _rx) = mpsc::channel(2);
        let buffer = LogBuffer::new(tx, Arc::clone(&stats));
        for i in 0..5 {
            buffer.push(entry(i));
        }
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.entries_enqueued, 2);
        assert_eq!(snapshot.entries_dropped, 3);
    }

    #[tokio::test]
    async fn test_flush_on_batch_size() {
        let forwarder = Arc::new(RecordingForwarder::default());
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let batcher = Batcher::new(
            rx,
            Arc::clone(&forwarder) as Arc<dyn Forwarder>,
            3,
            Duration::from_secs(3600),
            cancel.clone(),
        );
        let handle = tokio::spawn(batcher.run());

        for i in 0..3 {
            tx.send(entry(i)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let batches = forwarder.batches.lock().unwrap();
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0].len(), 3);
        }
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_on_interval() {
        let forwarder = Arc::new(RecordingForwarder::default());
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let batcher = Batcher::new(
            rx,
            Arc::clone(&forwarder) as Arc<dyn Forwarder>,
            100,
            Duration::from_millis(50),
            cancel.clone(),
        );
        let handle = tokio::spawn(batcher.run());

        tx.send(entry(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        {
            let batches = forwarder.batches.lock().unwrap();
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0].len(), 1);
        }
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_batch_never_flushed() {
        let forwarder = Arc::new(RecordingForwarder::default());
        let (_tx, rx) = mpsc::channel::<LogEntry>(16);
        let cancel = CancellationToken::new();
        let batcher = Batcher::new(
            rx,
            Arc::clone(&forwarder) as Arc<dyn Forwarder>,
            100,
            Duration::from_millis(20),
            cancel.clone(),
        );
        let handle = tokio::spawn(batcher.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(forwarder.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_drains_remainder() {
        let forwarder = Arc::new(RecordingForwarder::default());
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let batcher = Batcher::new(
            rx,
            Arc::clone(&forwarder) as Arc<dyn Forwarder>,
            100,
            Duration::from_secs(3600),
            cancel.clone(),
        );
        for i in 0..4 {
            tx.send(entry(i)).await.unwrap();
        }
        cancel.cancel();
        batcher.run().await;
        let batches = forwarder.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 4);
    }
}
