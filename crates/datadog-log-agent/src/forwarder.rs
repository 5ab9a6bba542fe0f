// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use datadog_log_core::{LogBatch, LogEntry};
use tracing::{debug, error};

use crate::config::Config;
use crate::stats::AgentStats;

#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Ships a flushed batch downstream. Delivery is best-effort; entries
    /// that cannot be delivered are dropped, never re-queued.
    async fn forward(&self, logs: Vec<LogEntry>);
}

/// POSTs batches to the ingestion service as JSON, splitting anything larger
/// than the wire limit into sub-batches.
///
/// Retry policy: 5xx and transport errors are retried with doubling backoff
/// up to the configured bound (R retries = R+1 attempts); a 4xx means the
/// payload itself is bad and is dropped immediately. A sub-batch that
/// exhausts its retries is logged with full context and dropped; there is
/// no durable replay queue.
pub struct HttpForwarder {
    client: reqwest::Client,
    url: String,
    max_batch_size: usize,
    max_retries: u32,
    retry_base: Duration,
    request_timeout: Duration,
    stats: Arc<AgentStats>,
}

impl HttpForwarder {
    pub fn new(config: &Config, stats: Arc<AgentStats>) -> Self {
        HttpForwarder {
            client: reqwest::Client::new(),
            url: config.forward_url.clone(),
            max_batch_size: config.max_batch_size,
            max_retries: config.forward_max_retries,
            retry_base: config.forward_retry_base,
            request_timeout: config.forward_timeout,
            stats,
        }
    }

    /// Sends one sub-batch, retrying transient failures. Returns true if the
    /// ingestion service accepted it.
    async fn send_sub_batch(&self, logs: &[LogEntry]) -> bool {
        let batch = LogBatch::new(logs.to_vec());
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let response = self
                .client
                .post(&self.url)
                .timeout(self.request_timeout)
                .json(&batch)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        debug!(
                            "Forwarded {} entries on attempt {attempts}",
                            batch.len()
                        );
                        return true;
                    }
                    let body = resp.text().await.unwrap_or_default();
                    if status.is_client_error() {
                        // The payload is malformed as far as the server is
                        // concerned; retrying cannot help.
                        error!(
                            "Ingestion rejected batch of {} entries with {status}: {body}. Dropping.",
                            batch.len()
                        );
                        return false;
                    }
                    error!(
                        "Forward attempt {attempts} failed with {status}: {body}"
                    );
                }
                Err(err) => {
                    error!("Forward attempt {attempts} failed: {err}");
                }
            }

            if attempts > self.max_retries {
                error!(
                    "Dropping batch of {} entries for {} after {attempts} attempts",
                    batch.len(),
                    self.url
                );
                return false;
            }

            let backoff = self.retry_base * 2u32.saturating_pow(attempts - 1);
            tokio::time::sleep(backoff).await;
        }
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, logs: Vec<LogEntry>) {
        if logs.is_empty() {
            return;
        }
        for sub_batch in split_batch(&logs, self.max_batch_size) {
            if self.send_sub_batch(sub_batch).await {
                self.stats
                    .entries_forwarded
                    .fetch_add(sub_batch.len() as u64, Ordering::Relaxed);
            } else {
                self.stats.batches_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Splits a batch into sub-batches of at most `max` entries, preserving
/// order. N entries at size M yield ceil(N/M) sub-batches covering every
/// entry exactly once.
pub fn split_batch(logs: &[LogEntry], max: usize) -> impl Iterator<Item = &[LogEntry]> {
    logs.chunks(max.max(1))
}
