// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8888;
const DEFAULT_MAX_BATCH_SIZE: usize = 500;
const DEFAULT_MAX_REQUEST_CONTENT_LENGTH: usize = 10 * 1024 * 1024; // 10MB in Bytes
const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 30;
const DEFAULT_COLLECTION: &str = "container_logs";
const DEFAULT_VECTOR_DB_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STREAM_QUEUE_SIZE: usize = 64;
const DEFAULT_STREAM_WORKERS: usize = 4;
const DEFAULT_INDEX_TYPE: &str = "HNSW";
const DEFAULT_INDEX_METRIC: &str = "COSINE";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Upper bound on entries per batch request.
    pub max_batch_size: usize,
    pub max_request_content_length: usize,
    pub embedding_url: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub embedding_timeout: Duration,
    pub vector_db_url: String,
    pub collection: String,
    pub vector_db_timeout: Duration,
    /// Capacity of the streaming endpoint's work queue.
    pub stream_queue_size: usize,
    /// Fixed number of workers draining the stream queue.
    pub stream_workers: usize,
    pub index_type: String,
    pub index_metric: String,
}

impl Config {
    pub fn from_env() -> Result<Config, anyhow::Error> {
        let embedding_url = env::var("DD_EMBEDDING_URL")
            .map_err(|_| anyhow::anyhow!("DD_EMBEDDING_URL environment variable is not set"))?;
        let embedding_model = env::var("DD_EMBEDDING_MODEL")
            .map_err(|_| anyhow::anyhow!("DD_EMBEDDING_MODEL environment variable is not set"))?;
        let vector_db_url = env::var("DD_VECTOR_DB_URL")
            .map_err(|_| anyhow::anyhow!("DD_VECTOR_DB_URL environment variable is not set"))?;

        Ok(Config {
            port: env::var("DD_LOG_INGEST_PORT")
                .ok()
                .and_then(|port| port.parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT),
            max_batch_size: env_usize("DD_LOG_MAX_BATCH_SIZE", DEFAULT_MAX_BATCH_SIZE).max(1),
            max_request_content_length: env_usize(
                "DD_LOG_MAX_REQUEST_CONTENT_LENGTH",
                DEFAULT_MAX_REQUEST_CONTENT_LENGTH,
            ),
            embedding_url,
            embedding_model,
            embedding_dimension: env_usize(
                "DD_EMBEDDING_DIMENSION",
                DEFAULT_EMBEDDING_DIMENSION,
            )
            .max(1),
            embedding_timeout: Duration::from_secs(env_u64(
                "DD_EMBEDDING_TIMEOUT_SECS",
                DEFAULT_EMBEDDING_TIMEOUT_SECS,
            )),
            vector_db_url,
            collection: env::var("DD_VECTOR_DB_COLLECTION")
                .unwrap_or_else(|_| DEFAULT_COLLECTION.to_string()),
            vector_db_timeout: Duration::from_secs(env_u64(
                "DD_VECTOR_DB_TIMEOUT_SECS",
                DEFAULT_VECTOR_DB_TIMEOUT_SECS,
            )),
            stream_queue_size: env_usize("DD_LOG_STREAM_QUEUE_SIZE", DEFAULT_STREAM_QUEUE_SIZE)
                .max(1),
            stream_workers: env_usize("DD_LOG_STREAM_WORKERS", DEFAULT_STREAM_WORKERS).max(1),
            index_type: env::var("DD_VECTOR_INDEX_TYPE")
                .unwrap_or_else(|_| DEFAULT_INDEX_TYPE.to_string()),
            index_metric: env::var("DD_VECTOR_INDEX_METRIC")
                .unwrap_or_else(|_| DEFAULT_INDEX_METRIC.to_string()),
        })
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|val| val.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(default)
}
