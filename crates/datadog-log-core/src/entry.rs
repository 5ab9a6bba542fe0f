// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single processed log line.
///
/// `timestamp` is epoch milliseconds. `metadata` is an open string-keyed map;
/// values are carried verbatim from the producing side (pod labels, extra
/// JSON fields from structured lines, the detected level).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogEntry {
    pub timestamp: i64,
    pub message: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl LogEntry {
    pub fn new(timestamp: i64, message: impl Into<String>, source: impl Into<String>) -> Self {
        LogEntry {
            timestamp,
            message: message.into(),
            source: source.into(),
            metadata: HashMap::new(),
        }
    }
}

/// An ordered group of entries transmitted together.
///
/// Invariant on the wire: non-empty and no longer than the configured max
/// batch size. Both ends enforce this; the batch endpoint rejects violations,
/// the forwarder never produces them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogBatch {
    pub logs: Vec<LogEntry>,
}

impl LogBatch {
    pub fn new(logs: Vec<LogEntry>) -> Self {
        LogBatch { logs }
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}
