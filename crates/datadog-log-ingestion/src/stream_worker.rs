// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::Ordering;
use std::sync::Arc;

use datadog_log_core::LogEntry;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::stats::IngestStats;
use crate::vector_store::VectorStoreWriter;

/// Handle the streaming endpoint uses to enqueue parsed batches.
///
/// The streaming path acknowledges the HTTP request once its lines are
/// parsed and enqueued here, before storage commit. A batch that later
/// fails to embed or insert is logged and dropped; consumers of the
/// streaming endpoint get at-most-once delivery.
#[derive(Clone)]
pub struct StreamQueue {
    tx: mpsc::Sender<Vec<LogEntry>>,
}

impl StreamQueue {
    /// Enqueues one batch for background persistence. Waits while the queue
    /// is at capacity; fails only when the workers are gone.
    pub async fn enqueue(&self, logs: Vec<LogEntry>) -> Result<(), ()> {
        self.tx.send(logs).await.map_err(|_| ())
    }
}

/// Starts the fixed worker pool that drains the stream queue into the
/// vector store. Workers exit once every queue handle is dropped and the
/// queue is drained.
pub fn start_stream_workers(
    workers: usize,
    queue_size: usize,
    store: Arc<VectorStoreWriter>,
    stats: Arc<IngestStats>,
) -> (StreamQueue, Vec<JoinHandle<()>>) {
    let (tx, rx) = mpsc::channel::<Vec<LogEntry>>(queue_size.max(1));
    let rx = Arc::new(Mutex::new(rx));

    let handles = (0..workers.max(1))
        .map(|worker_id| {
            let rx = Arc::clone(&rx);
            let store = Arc::clone(&store);
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                loop {
                    let batch = { rx.lock().await.recv().await };
                    match batch {
                        Some(logs) => match store.store_batch(&logs).await {
                            Ok(stored) => {
                                stats
                                    .entries_stored
                                    .fetch_add(stored as u64, Ordering::Relaxed);
                            }
                            Err(err) => {
                                stats.batches_failed.fetch_add(1, Ordering::Relaxed);
                                error!(
                                    "Stream worker {worker_id} dropping {} entries: {err}",
                                    logs.len()
                                );
                            }
                        },
                        None => break,
                    }
                }
                debug!("Stream worker {worker_id} stopped");
            })
        })
        .collect();

    (StreamQueue { tx }, handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;

    fn test_config(base: &str) -> Config {
        Config {
            port: 8888,
            max_batch_size: 500,
            max_request_content_length: 10 * 1024 * 1024,
            embedding_url: format!("{base}/v1/embeddings"),
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            embedding_dimension: 2,
            embedding_timeout: Duration::from_secs(5),
            vector_db_url: base.to_string(),
            collection: "container_logs".to_string(),
            vector_db_timeout: Duration::from_secs(5),
            stream_queue_size: 8,
            stream_workers: 2,
            index_type: "HNSW".to_string(),
            index_metric: "COSINE".to_string(),
        }
    }

    #[tokio::test]
    async fn test_workers_drain_queue_into_store() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/vectordb/collections/has")
            .with_body(r#"{"code":0,"data":{"has":true}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/v2/vectordb/indexes/create")
            .with_body(r#"{"code":0,"data":{}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/v1/embeddings")
            .with_body(r#"{"data":[{"index":0,"embedding":[0.5,0.5]}]}"#)
            .create_async()
            .await;
        let insert = server
            .mock("POST", "/v2/vectordb/entities/insert")
            .with_body(r#"{"code":0,"data":{}}"#)
            .expect(2)
            .create_async()
            .await;

        let store = Arc::new(VectorStoreWriter::new(&test_config(&server.url())));
        let stats = Arc::new(IngestStats::default());
        let (queue, handles) = start_stream_workers(2, 8, store, Arc::clone(&stats));

        let entry = LogEntry::new(1_700_000_000_000, "m", "s");
        queue.enqueue(vec![entry.clone()]).await.unwrap();
        queue.enqueue(vec![entry]).await.unwrap();

        drop(queue);
        for handle in handles {
            handle.await.unwrap();
        }
        insert.assert_async().await;
        assert_eq!(stats.snapshot().entries_stored, 2);
    }

    #[tokio::test]
    async fn test_failed_batch_is_dropped_not_retried() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/vectordb/collections/has")
            .with_body(r#"{"code":0,"data":{"has":true}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/v2/vectordb/indexes/create")
            .with_body(r#"{"code":0,"data":{}}"#)
            .create_async()
            .await;
        let embed = server
            .mock("POST", "/v1/embeddings")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(VectorStoreWriter::new(&test_config(&server.url())));
        let stats = Arc::new(IngestStats::default());
        let (queue, handles) = start_stream_workers(1, 8, store, Arc::clone(&stats));

        queue
            .enqueue(vec![LogEntry::new(1_700_000_000_000, "m", "s")])
            .await
            .unwrap();
        drop(queue);
        for handle in handles {
            handle.await.unwrap();
        }
        embed.assert_async().await;
        assert_eq!(stats.snapshot().batches_failed, 1);
        assert_eq!(stats.snapshot().entries_stored, 0);
    }
}
