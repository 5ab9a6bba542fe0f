// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared wire model for the log pipeline.
//!
//! Both halves of the pipeline, the node-side tailing agent and the
//! ingestion service, speak exactly one contract, defined here. Entry order
//! within a batch is meaningful (it reflects the order lines were read from a
//! single file); nothing else about batch composition is guaranteed.

pub mod entry;
pub mod response;

pub use entry::{LogBatch, LogEntry};
pub use response::IngestResponse;
