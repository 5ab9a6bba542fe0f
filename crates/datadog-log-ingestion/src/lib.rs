// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Service-side half of the log pipeline: accepts log batches over HTTP,
//! validates them, embeds the message texts, and persists the result in a
//! vector collection for semantic retrieval.
//!
//! The batch endpoint is strict and synchronous; the streaming endpoint is
//! tolerant and acknowledges before storage commit. Both normalize into the
//! shared wire model before validation, so nothing downstream branches on
//! ingress shape.

pub mod config;
pub mod embedding;
pub mod error;
pub mod http_utils;
pub mod log_processor;
pub mod server;
pub mod stats;
pub mod stream_worker;
pub mod validator;
pub mod vector_store;

pub use config::Config;
pub use error::IngestError;
pub use server::IngestionServer;
pub use vector_store::VectorStoreWriter;
