// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::Utc;
use datadog_log_core::{LogBatch, LogEntry};

/// Oldest acceptable timestamp: ten years before now, in milliseconds.
const MAX_AGE_MS: i64 = 10 * 365 * 24 * 60 * 60 * 1000;
/// Furthest acceptable future timestamp: one hour of clock drift.
const MAX_DRIFT_MS: i64 = 60 * 60 * 1000;

/// Structural and range checks for one entry. An entry is valid iff its
/// timestamp lies in `[now - 10y, now + 1h]` and message and source are
/// non-empty.
pub fn validate_entry(entry: &LogEntry, now_ms: i64) -> Result<(), String> {
    if entry.message.is_empty() {
        return Err("Log message cannot be empty".to_string());
    }
    if entry.source.is_empty() {
        return Err("Log source cannot be empty".to_string());
    }
    if entry.timestamp < now_ms - MAX_AGE_MS || entry.timestamp > now_ms + MAX_DRIFT_MS {
        return Err(format!(
            "Timestamp {} outside acceptable range",
            entry.timestamp
        ));
    }
    Ok(())
}

/// Whole-batch validation for the strict endpoint: any invalid entry fails
/// the entire batch with no partial acceptance.
pub fn validate_batch(batch: &LogBatch, max_batch_size: usize) -> Result<(), Vec<String>> {
    if batch.is_empty() {
        return Err(vec!["Batch cannot be empty".to_string()]);
    }
    if batch.len() > max_batch_size {
        return Err(vec![format!(
            "Batch of {} entries exceeds maximum size {max_batch_size}",
            batch.len()
        )]);
    }

    let now_ms = Utc::now().timestamp_millis();
    let errors: Vec<String> = batch
        .logs
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            validate_entry(entry, now_ms)
                .err()
                .map(|reason| format!("Entry {index}: {reason}"))
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn entry(timestamp: i64) -> LogEntry {
        LogEntry::new(timestamp, "message", "source")
    }

    #[test]
    fn test_valid_entry() {
        assert!(validate_entry(&entry(NOW), NOW).is_ok());
        assert!(validate_entry(&entry(NOW - 1000), NOW).is_ok());
    }

    #[test]
    fn test_boundary_timestamps() {
        assert!(validate_entry(&entry(NOW - MAX_AGE_MS), NOW).is_ok());
        assert!(validate_entry(&entry(NOW + MAX_DRIFT_MS), NOW).is_ok());
        assert!(validate_entry(&entry(NOW - MAX_AGE_MS - 1), NOW).is_err());
        assert!(validate_entry(&entry(NOW + MAX_DRIFT_MS + 1), NOW).is_err());
    }

    #[test]
    fn test_zero_timestamp_rejected() {
        assert!(validate_entry(&entry(0), NOW).is_err());
    }

    #[test]
    fn test_empty_message_rejected() {
        let mut e = entry(NOW);
        e.message = String::new();
        assert_eq!(
            validate_entry(&e, NOW).unwrap_err(),
            "Log message cannot be empty"
        );
    }

    #[test]
    fn test_empty_source_rejected() {
        let mut e = entry(NOW);
        e.source = String::new();
        assert_eq!(
            validate_entry(&e, NOW).unwrap_err(),
            "Log source cannot be empty"
        );
    }

    #[test]
    fn test_empty_batch_rejected() {
        let errors = validate_batch(&LogBatch::new(Vec::new()), 500).unwrap_err();
        assert_eq!(errors, vec!["Batch cannot be empty".to_string()]);
    }

    #[test]
    fn test_oversized_batch_rejected() {
        let now = Utc::now().timestamp_millis();
        let batch = LogBatch::new((0..3).map(|_| entry(now)).collect());
        assert!(validate_batch(&batch, 2).is_err());
        assert!(validate_batch(&batch, 3).is_ok());
    }

    #[test]
    fn test_one_bad_entry_fails_whole_batch() {
        let now = Utc::now().timestamp_millis();
        let mut bad = entry(now);
        bad.message = String::new();
        let batch = LogBatch::new(vec![entry(now), bad, entry(now)]);
        let errors = validate_batch(&batch, 500).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Entry 1:"));
    }
}
