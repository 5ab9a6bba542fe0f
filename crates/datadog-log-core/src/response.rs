// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Body returned by both ingestion endpoints.
///
/// `processed_count` reflects accepted entries only; on the streaming
/// endpoint a partially bad payload still succeeds with the skipped lines
/// missing from the count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    pub processed_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl IngestResponse {
    pub fn ok(processed_count: usize) -> Self {
        IngestResponse {
            success: true,
            processed_count,
            errors: None,
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        IngestResponse {
            success: false,
            processed_count: 0,
            errors: Some(errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_response_has_no_errors_field() {
        let encoded = serde_json::to_string(&IngestResponse::ok(3)).unwrap();
        assert_eq!(encoded, r#"{"success":true,"processed_count":3}"#);
    }

    #[test]
    fn test_failed_response_round_trip() {
        let resp = IngestResponse::failed(vec!["Batch cannot be empty".to_string()]);
        let encoded = serde_json::to_string(&resp).unwrap();
        let decoded: IngestResponse = serde_json::from_str(&encoded).unwrap();
        assert_eq!(resp, decoded);
        assert!(!decoded.success);
    }
}
