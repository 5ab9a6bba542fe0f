// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use datadog_log_core::LogEntry;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::error::IngestError;

const EMBEDDING_FIELD: &str = "embedding";
const MESSAGE_MAX_LENGTH: &str = "65535";
const SOURCE_MAX_LENGTH: &str = "1024";

/// Thin client for the vector database's HTTP API: collection management,
/// index creation, columnar batch insert, and a version probe.
pub struct VectorDbClient {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl VectorDbClient {
    pub fn new(base_url: String, request_timeout: Duration) -> Self {
        VectorDbClient {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, IngestError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|err| IngestError::VectorStore(err.to_string()))?;

        let status = response.status();
        let payload: Value = if status.is_success() {
            response
                .json()
                .await
                .map_err(|err| IngestError::VectorStore(err.to_string()))?
        } else {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::VectorStore(format!("{path}: {status}: {body}")));
        };

        // The API reports request-level failures through a non-zero code
        // even on HTTP 200.
        if let Some(code) = payload.get("code").and_then(Value::as_i64) {
            if code != 0 {
                let message = payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(IngestError::VectorStore(format!(
                    "{path}: code {code}: {message}"
                )));
            }
        }
        Ok(payload)
    }

    pub async fn version(&self) -> Result<String, IngestError> {
        let response = self
            .client
            .get(format!("{}/v2/vectordb/version", self.base_url))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|err| IngestError::VectorStore(err.to_string()))?;
        if !response.status().is_success() {
            return Err(IngestError::VectorStore(format!(
                "version probe failed: {}",
                response.status()
            )));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|err| IngestError::VectorStore(err.to_string()))?;
        Ok(payload
            .pointer("/data/version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }

    pub async fn has_collection(&self, name: &str) -> Result<bool, IngestError> {
        let payload = self
            .post(
                "/v2/vectordb/collections/has",
                json!({ "collectionName": name }),
            )
            .await?;
        Ok(payload
            .pointer("/data/has")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Creates the log collection: auto-id Int64 primary key, Int64
    /// timestamp, variable-length message/source, JSON metadata blob, and a
    /// fixed-dimension float vector for the embedding.
    pub async fn create_collection(&self, name: &str, dimension: usize) -> Result<(), IngestError> {
        self.post(
            "/v2/vectordb/collections/create",
            json!({
                "collectionName": name,
                "schema": {
                    "autoId": true,
                    "fields": [
                        { "fieldName": "id", "dataType": "Int64", "isPrimary": true },
                        { "fieldName": "timestamp", "dataType": "Int64" },
                        {
                            "fieldName": "message",
                            "dataType": "VarChar",
                            "elementTypeParams": { "max_length": MESSAGE_MAX_LENGTH }
                        },
                        {
                            "fieldName": "source",
                            "dataType": "VarChar",
                            "elementTypeParams": { "max_length": SOURCE_MAX_LENGTH }
                        },
                        { "fieldName": "metadata", "dataType": "JSON" },
                        {
                            "fieldName": EMBEDDING_FIELD,
                            "dataType": "FloatVector",
                            "elementTypeParams": { "dim": dimension.to_string() }
                        }
                    ]
                }
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn create_index(
        &self,
        name: &str,
        index_type: &str,
        metric: &str,
    ) -> Result<(), IngestError> {
        self.post(
            "/v2/vectordb/indexes/create",
            json!({
                "collectionName": name,
                "indexParams": [{
                    "fieldName": EMBEDDING_FIELD,
                    "indexName": format!("{EMBEDDING_FIELD}_idx"),
                    "indexType": index_type,
                    "metricType": metric,
                }]
            }),
        )
        .await?;
        Ok(())
    }

    /// Single columnar insert call for a whole batch.
    pub async fn insert(
        &self,
        name: &str,
        fields_data: Value,
        num_rows: usize,
    ) -> Result<(), IngestError> {
        self.post(
            "/v2/vectordb/entities/insert",
            json!({
                "collectionName": name,
                "numRows": num_rows,
                "fieldsData": fields_data,
            }),
        )
        .await?;
        Ok(())
    }
}

/// Terminal stage of the ingestion path: embeds a validated batch and writes
/// it to the vector collection.
///
/// Collection and index creation are lazy, performed once on the first
/// write that needs them. Index creation is best-effort: a failure costs
/// search quality, not availability. The insert itself is atomic from the
/// caller's perspective: any embedding or insert failure fails the whole
/// batch and nothing is written.
pub struct VectorStoreWriter {
    db: VectorDbClient,
    embeddings: EmbeddingClient,
    collection: String,
    dimension: usize,
    index_type: String,
    index_metric: String,
    ensured: OnceCell<()>,
}

impl VectorStoreWriter {
    pub fn new(config: &Config) -> Self {
        VectorStoreWriter {
            db: VectorDbClient::new(config.vector_db_url.clone(), config.vector_db_timeout),
            embeddings: EmbeddingClient::new(config),
            collection: config.collection.clone(),
            dimension: config.embedding_dimension,
            index_type: config.index_type.clone(),
            index_metric: config.index_metric.clone(),
            ensured: OnceCell::new(),
        }
    }

    /// Creates the collection (and, best-effort, its index) if absent.
    /// Success is remembered; failures are retried on the next call.
    pub async fn ensure_collection(&self) -> Result<(), IngestError> {
        self.ensured
            .get_or_try_init(|| async {
                if !self.db.has_collection(&self.collection).await? {
                    self.db
                        .create_collection(&self.collection, self.dimension)
                        .await?;
                    info!("Created vector collection {}", self.collection);
                }
                if let Err(err) = self
                    .db
                    .create_index(&self.collection, &self.index_type, &self.index_metric)
                    .await
                {
                    warn!(
                        "Index creation on {} failed, continuing without: {err}",
                        self.collection
                    );
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Embeds and persists one batch. All-or-nothing: no insert happens
    /// unless every message embedded at the configured dimension.
    pub async fn store_batch(&self, logs: &[LogEntry]) -> Result<usize, IngestError> {
        if logs.is_empty() {
            return Ok(0);
        }
        self.ensure_collection().await?;

        let texts: Vec<String> = logs.iter().map(|entry| entry.message.clone()).collect();
        let embeddings = self.embeddings.embed(&texts).await?;

        let timestamps: Vec<i64> = logs.iter().map(|entry| entry.timestamp).collect();
        let messages: Vec<&str> = logs.iter().map(|entry| entry.message.as_str()).collect();
        let sources: Vec<&str> = logs.iter().map(|entry| entry.source.as_str()).collect();
        let metadata: Vec<String> = logs
            .iter()
            .map(|entry| serde_json::to_string(&entry.metadata).unwrap_or_else(|_| "{}".into()))
            .collect();

        let fields_data = json!([
            { "fieldName": "timestamp", "type": "Int64", "values": timestamps },
            { "fieldName": "message", "type": "VarChar", "values": messages },
            { "fieldName": "source", "type": "VarChar", "values": sources },
            { "fieldName": "metadata", "type": "JSON", "values": metadata },
            { "fieldName": EMBEDDING_FIELD, "type": "FloatVector", "values": embeddings },
        ]);

        self.db
            .insert(&self.collection, fields_data, logs.len())
            .await?;
        debug!("Stored {} entries in {}", logs.len(), self.collection);
        Ok(logs.len())
    }

    /// Lightweight dependency probe: version/connectivity plus collection
    /// existence. Does not confirm the collection is loaded for query.
    pub async fn health(&self) -> Result<(), IngestError> {
        let version = self.db.version().await?;
        debug!("Vector store version {version}");
        if !self.db.has_collection(&self.collection).await? {
            return Err(IngestError::Unhealthy(format!(
                "collection {} does not exist",
                self.collection
            )));
        }
        Ok(())
    }
}
