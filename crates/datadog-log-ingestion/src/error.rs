// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors on the ingestion write path. All of them degrade a request (4xx,
/// 5xx, or unhealthy probe); none of them terminate the service.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Embedding request failed: {0}")]
    Embedding(String),

    #[error("Embedding returned {returned} vectors for {requested} texts")]
    EmbeddingCountMismatch { requested: usize, returned: usize },

    #[error("Embedding dimension {actual} does not match configured {expected}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error("Vector store request failed: {0}")]
    VectorStore(String),

    #[error("Vector store unhealthy: {0}")]
    Unhealthy(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = IngestError::EmbeddingCountMismatch {
            requested: 3,
            returned: 2,
        };
        assert_eq!(
            error.to_string(),
            "Embedding returned 2 vectors for 3 texts"
        );
    }
}
