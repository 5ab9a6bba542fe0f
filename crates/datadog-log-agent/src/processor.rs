// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use datadog_log_core::LogEntry;
use regex::Regex;
use serde_json::Value;

use crate::pod_meta::PodMetadataProvider;

/// Levels recognized in unstructured lines, highest priority first. WARNING
/// sits after WARN for completeness; a line containing it already matches
/// WARN.
const LEVEL_PRIORITY: [&str; 7] = [
    "FATAL", "ERROR", "WARN", "WARNING", "INFO", "DEBUG", "TRACE",
];

const DEFAULT_LEVEL: &str = "INFO";

/// Turns raw tailed lines into [`LogEntry`] values: parse, level-filter,
/// derive a source id, enrich with pod metadata.
pub struct LineProcessor {
    /// Uppercased allow-list; empty accepts every level.
    allowed_levels: Vec<String>,
    metadata_provider: Option<Arc<dyn PodMetadataProvider>>,
    pod_suffix: Regex,
}

impl LineProcessor {
    pub fn new(
        allowed_levels: Vec<String>,
        metadata_provider: Option<Arc<dyn PodMetadataProvider>>,
    ) -> Self {
        LineProcessor {
            allowed_levels,
            metadata_provider,
            // ReplicaSet hash and pod suffix, e.g. api-server-7d9c6b5b-x2v4q
            #[allow(clippy::unwrap_used)]
            pod_suffix: Regex::new(r"-(?:[0-9a-f]{6,10}|[a-z0-9]{5})$").unwrap(),
        }
    }

    /// Processes one raw line. Returns None for empty lines and entries the
    /// level filter rejects.
    pub fn process(&self, path: &Path, raw: &str) -> Option<LogEntry> {
        let line = raw.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            return None;
        }

        let (level, timestamp, message, mut metadata) = match parse_structured(line) {
            Some(parsed) => parsed,
            None => (
                scan_level(line).to_string(),
                Utc::now().timestamp_millis(),
                line.to_string(),
                HashMap::new(),
            ),
        };

        if !self.level_allowed(&level) {
            return None;
        }

        let mut entry = LogEntry::new(timestamp, message, self.derive_source(path));

        if let Some(provider) = &self.metadata_provider {
            if let Some(info) = provider.pod_info(path) {
                metadata.insert("pod_name".to_string(), Value::String(info.pod_name));
                metadata.insert("namespace".to_string(), Value::String(info.namespace));
                metadata.insert("node_name".to_string(), Value::String(info.node_name));
                if !info.labels.is_empty() {
                    metadata.insert(
                        "labels".to_string(),
                        Value::Object(
                            info.labels
                                .into_iter()
                                .map(|(k, v)| (k, Value::String(v)))
                                .collect(),
                        ),
                    );
                }
            }
        }

        entry.metadata = metadata;
        Some(entry)
    }

    fn level_allowed(&self, level: &str) -> bool {
        self.allowed_levels.is_empty()
            || self
                .allowed_levels
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(level))
    }

    /// Kubernetes pod-log paths use the pod-name segment after `pods/`, with
    /// the generated hash suffixes stripped; anything else falls back to the
    /// basename without extension.
    fn derive_source(&self, path: &Path) -> String {
        let components: Vec<&str> = path
            .iter()
            .filter_map(|component| component.to_str())
            .collect();

        if let Some(idx) = components.iter().position(|c| *c == "pods") {
            if let Some(segment) = components.get(idx + 1) {
                let fields: Vec<&str> = segment.split('_').collect();
                let name = if fields.len() == 3 { fields[1] } else { *segment };
                return self.strip_pod_suffix(name);
            }
        }

        path.file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("unknown")
            .to_string()
    }

    fn strip_pod_suffix(&self, name: &str) -> String {
        let mut out = name;
        // Deployment pods carry two generated suffixes, bare ReplicaSet or
        // StatefulSet pods fewer.
        for _ in 0..2 {
            match self.pod_suffix.find(out) {
                Some(found) if found.start() > 0 => out = &out[..found.start()],
                _ => break,
            }
        }
        out.to_string()
    }
}

/// Attempts the structured path: a JSON object with optional level/severity
/// and timestamp keys. Every other top-level key is folded into metadata
/// verbatim.
fn parse_structured(line: &str) -> Option<(String, i64, String, HashMap<String, Value>)> {
    let parsed: Value = serde_json::from_str(line).ok()?;
    let object = match parsed {
        Value::Object(object) => object,
        _ => return None,
    };

    let mut level = DEFAULT_LEVEL.to_string();
    let mut timestamp = Utc::now().timestamp_millis();
    let mut message = None;
    let mut metadata = HashMap::new();

    for (key, value) in object {
        match key.as_str() {
            "level" | "severity" => {
                if let Value::String(text) = &value {
                    level = text.to_uppercase();
                }
            }
            "timestamp" => {
                if let Some(millis) = value.as_str().and_then(parse_rfc3339_millis) {
                    timestamp = millis;
                }
            }
            "message" if value.is_string() && message.is_none() => {
                message = value.as_str().map(str::to_string);
            }
            _ => {
                metadata.insert(key, value);
            }
        }
    }

    let message = message.unwrap_or_else(|| line.to_string());
    Some((level, timestamp, message, metadata))
}

fn parse_rfc3339_millis(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc).timestamp_millis())
}

/// Scans the uppercased line for the first level in priority order.
fn scan_level(line: &str) -> &'static str {
    let upper = line.to_uppercase();
    for level in LEVEL_PRIORITY {
        if upper.contains(level) {
            return level;
        }
    }
    DEFAULT_LEVEL
}
