// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Startup errors for the node-side engine. Anything that happens after
/// startup degrades (drop, log, mark unhealthy) instead of surfacing here.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Invalid log path pattern: {0}")]
    InvalidPattern(#[from] glob::PatternError),

    #[error("Failed to set up directory watch: {0}")]
    Watch(#[from] notify::Error),
}
