// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

const DEFAULT_BUFFER_SIZE: usize = 1000;
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 10;
const DEFAULT_MAX_BATCH_SIZE: usize = 500;
const DEFAULT_FORWARD_MAX_RETRIES: u32 = 3;
const DEFAULT_FORWARD_RETRY_BASE_MS: u64 = 100;
const DEFAULT_FORWARD_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_POD_META_TTL_SECS: u64 = 300;
const DEFAULT_POD_META_MAX_ENTRIES: usize = 1024;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

#[derive(Debug)]
pub struct Config {
    /// Glob patterns for log files to tail.
    pub log_paths: Vec<String>,
    /// Levels to retain. Empty means retain everything.
    pub allowed_levels: Vec<String>,
    /// Queue capacity and target batch size for the batcher.
    pub buffer_size: usize,
    pub flush_interval: Duration,
    /// Ingestion batch endpoint the forwarder POSTs to.
    pub forward_url: String,
    /// Upper bound on entries per forwarded sub-batch.
    pub max_batch_size: usize,
    /// Retries after the first attempt; R retries = R+1 attempts total.
    pub forward_max_retries: u32,
    pub forward_retry_base: Duration,
    pub forward_timeout: Duration,
    pub poll_interval: Duration,
    pub pod_meta_ttl: Duration,
    pub pod_meta_max_entries: usize,
    pub shutdown_grace: Duration,
    pub node_name: String,
}

impl Config {
    pub fn from_env() -> Result<Config, anyhow::Error> {
        let log_paths = env::var("DD_LOG_PATHS")
            .map_err(|_| anyhow::anyhow!("DD_LOG_PATHS environment variable is not set"))?;
        let log_paths = parse_list(&log_paths);
        if log_paths.is_empty() {
            return Err(anyhow::anyhow!("DD_LOG_PATHS contains no patterns"));
        }

        let forward_url = env::var("DD_LOG_FORWARD_URL")
            .map_err(|_| anyhow::anyhow!("DD_LOG_FORWARD_URL environment variable is not set"))?;

        let allowed_levels = env::var("DD_LOG_ALLOWED_LEVELS")
            .map(|raw| {
                parse_list(&raw)
                    .into_iter()
                    .map(|level| level.to_uppercase())
                    .collect()
            })
            .unwrap_or_default();

        let node_name = env::var("DD_NODE_NAME").unwrap_or_default();

        Ok(Config {
            log_paths,
            allowed_levels,
            buffer_size: env_usize("DD_LOG_BUFFER_SIZE", DEFAULT_BUFFER_SIZE),
            flush_interval: Duration::from_secs(env_u64(
                "DD_LOG_FLUSH_INTERVAL_SECS",
                DEFAULT_FLUSH_INTERVAL_SECS,
            )),
            forward_url,
            max_batch_size: env_usize("DD_LOG_MAX_BATCH_SIZE", DEFAULT_MAX_BATCH_SIZE).max(1),
            forward_max_retries: env_u32("DD_LOG_FORWARD_MAX_RETRIES", DEFAULT_FORWARD_MAX_RETRIES),
            forward_retry_base: Duration::from_millis(env_u64(
                "DD_LOG_FORWARD_RETRY_BASE_MS",
                DEFAULT_FORWARD_RETRY_BASE_MS,
            )),
            forward_timeout: Duration::from_secs(env_u64(
                "DD_LOG_FORWARD_TIMEOUT_SECS",
                DEFAULT_FORWARD_TIMEOUT_SECS,
            )),
            poll_interval: Duration::from_millis(env_u64(
                "DD_LOG_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )),
            pod_meta_ttl: Duration::from_secs(env_u64(
                "DD_LOG_POD_META_TTL_SECS",
                DEFAULT_POD_META_TTL_SECS,
            )),
            pod_meta_max_entries: env_usize(
                "DD_LOG_POD_META_MAX_ENTRIES",
                DEFAULT_POD_META_MAX_ENTRIES,
            ),
            shutdown_grace: Duration::from_secs(env_u64(
                "DD_LOG_SHUTDOWN_GRACE_SECS",
                DEFAULT_SHUTDOWN_GRACE_SECS,
            )),
            node_name,
        })
    }
}

/// Splits comma- or space-separated values, trimming empties. Both separators
/// are accepted for the same compatibility reasons as tag parsing.
fn parse_list(raw: &str) -> Vec<String> {
    raw.replace(',', " ")
        .split_whitespace()
        .map(|item| item.to_string())
        .collect()
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

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|val| val.parse::<u32>().ok())
        .unwrap_or(default)
}
