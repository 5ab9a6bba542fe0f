// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use datadog_log_core::{LogBatch, LogEntry};
use serde::Deserialize;
use serde_json::Value;

/// Source assigned to shipper-shaped lines that carry none themselves.
pub const SHIPPER_SOURCE: &str = "shipper";

/// Strict whole-body decode for the batch endpoint. Unknown fields are
/// rejected by the wire types.
pub fn decode_batch(raw: &[u8]) -> Result<LogBatch, String> {
    serde_json::from_slice(raw).map_err(|err| format!("Invalid batch payload: {err}"))
}

/// Alternate ingress shape produced by shipper agents: fractional-second
/// epoch timestamp, raw text under `log`, optional nested metadata object,
/// optional source.
#[derive(Debug, Deserialize)]
struct ShipperLine {
    date: f64,
    log: String,
    #[serde(default)]
    metadata: Option<HashMap<String, Value>>,
    #[serde(default)]
    source: Option<String>,
}

impl ShipperLine {
    fn normalize(self) -> LogEntry {
        let mut entry = LogEntry::new(
            (self.date * 1000.0) as i64,
            self.log,
            self.source.unwrap_or_else(|| SHIPPER_SOURCE.to_string()),
        );
        if let Some(metadata) = self.metadata {
            entry.metadata = metadata;
        }
        entry
    }
}

/// Tolerant per-line decode for the streaming endpoint: the canonical entry
/// shape first, the shipper shape as fallback, both normalized into
/// [`LogEntry`] before any validation runs. Downstream code never branches
/// on which shape arrived.
pub fn decode_stream_line(line: &str) -> Result<LogEntry, String> {
    match serde_json::from_str::<LogEntry>(line) {
        Ok(entry) => Ok(entry),
        Err(canonical_err) => match serde_json::from_str::<ShipperLine>(line) {
            Ok(shipper) => Ok(shipper.normalize()),
            Err(_) => Err(format!("Unparseable line: {canonical_err}")),
        },
    }
}
