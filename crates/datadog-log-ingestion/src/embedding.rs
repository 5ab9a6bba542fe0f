// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::IngestError;

/// Client for the embedding provider.
///
/// Sends one batched request per call and insists on an exact answer: the
/// provider must return one vector per input text, each of the configured
/// dimension, or the whole call fails. There is no partial acceptance.
pub struct EmbeddingClient {
    client: reqwest::Client,
    url: String,
    model: String,
    dimension: usize,
    request_timeout: Duration,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Bare indexed array shape: `[{"index":0,"embedding":[...]}, ...]`.
#[derive(Deserialize)]
struct IndexedEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-style envelope: `{"data":[{"embedding":[...]}, ...]}`.
#[derive(Deserialize)]
struct EmbeddingEnvelope {
    data: Vec<EnvelopeItem>,
}

#[derive(Deserialize)]
struct EnvelopeItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(config: &Config) -> Self {
        EmbeddingClient {
            client: reqwest::Client::new(),
            url: config.embedding_url.clone(),
            model: config.embedding_model.clone(),
            dimension: config.embedding_dimension,
            request_timeout: config.embedding_timeout,
        }
    }

    /// Embeds the given texts, preserving order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response = self
            .client
            .post(&self.url)
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|err| IngestError::Embedding(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Embedding(format!("{status}: {body}")));
        }

        let raw = response
            .bytes()
            .await
            .map_err(|err| IngestError::Embedding(err.to_string()))?;
        let vectors = decode_embedding_response(&raw)?;

        if vectors.len() != texts.len() {
            return Err(IngestError::EmbeddingCountMismatch {
                requested: texts.len(),
                returned: vectors.len(),
            });
        }
        for vector in &vectors {
            if vector.len() != self.dimension {
                return Err(IngestError::EmbeddingDimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
        }

        debug!("Embedded {} texts", texts.len());
        Ok(vectors)
    }
}

/// The provider's response shape is auto-detected: decode attempts run in a
/// fixed order against the raw bytes and the first structurally valid match
/// wins.
fn decode_embedding_response(raw: &[u8]) -> Result<Vec<Vec<f32>>, IngestError> {
    if let Ok(mut items) = serde_json::from_slice::<Vec<IndexedEmbedding>>(raw) {
        items.sort_by_key(|item| item.index);
        return Ok(items.into_iter().map(|item| item.embedding).collect());
    }

    if let Ok(envelope) = serde_json::from_slice::<EmbeddingEnvelope>(raw) {
        let mut items = envelope.data;
        items.sort_by_key(|item| item.index.unwrap_or(0));
        return Ok(items.into_iter().map(|item| item.embedding).collect());
    }

    Err(IngestError::Embedding(
        "Unrecognized embedding response shape".to_string(),
    ))
}
