// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use datadog_log_ingestion::{IngestionServer, VectorStoreWriter};

const MODE_ENV_VAR: &str = "DD_LOG_PIPELINE_MODE";

#[derive(Debug, PartialEq, Eq)]
enum Mode {
    Agent,
    Ingestion,
    All,
}

fn parse_mode(raw: Option<&str>) -> Option<Mode> {
    match raw.map(|val| val.to_lowercase()).as_deref() {
        Some("agent") => Some(Mode::Agent),
        Some("ingestion") => Some(Mode::Ingestion),
        Some("all") | None => Some(Mode::All),
        Some(_) => None,
    }
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var("DD_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let mode = match parse_mode(env::var(MODE_ENV_VAR).ok().as_deref()) {
        Some(mode) => mode,
        None => {
            error!("Unrecognized {MODE_ENV_VAR}; expected agent, ingestion, or all. Shutting down.");
            return;
        }
    };
    info!("Starting log pipeline in {mode:?} mode");

    let cancel = CancellationToken::new();

    let ingestion_handle = if matches!(mode, Mode::Ingestion | Mode::All) {
        let config = match datadog_log_ingestion::Config::from_env() {
            Ok(config) => Arc::new(config),
            Err(e) => {
                error!("Error creating ingestion config on startup: {e}");
                return;
            }
        };
        let store = Arc::new(VectorStoreWriter::new(&config));
        let server = IngestionServer::new(config, store);
        let server_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server.start(server_cancel).await {
                error!("Error when starting the ingestion server: {e:?}");
            }
        }))
    } else {
        None
    };

    let agent_handle = if matches!(mode, Mode::Agent | Mode::All) {
        let config = match datadog_log_agent::config::Config::from_env() {
            Ok(config) => config,
            Err(e) => {
                error!("Error creating agent config on startup: {e}");
                return;
            }
        };
        let grace = config.shutdown_grace;
        match datadog_log_agent::start(config).await {
            Ok(handle) => Some((handle, grace)),
            Err(e) => {
                error!("Error when starting the log agent: {e}");
                return;
            }
        }
    } else {
        None
    };

    if tokio::signal::ctrl_c().await.is_err() {
        error!("Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received, draining");

    if let Some((handle, grace)) = agent_handle {
        handle.shutdown(grace).await;
    }
    cancel.cancel();
    if let Some(handle) = ingestion_handle {
        let _ = handle.await;
    }
    info!("Log pipeline stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode_defaults_to_all() {
        assert_eq!(parse_mode(None), Some(Mode::All));
    }

    #[test]
    fn test_parse_mode_known_values() {
        assert_eq!(parse_mode(Some("agent")), Some(Mode::Agent));
        assert_eq!(parse_mode(Some("Ingestion")), Some(Mode::Ingestion));
        assert_eq!(parse_mode(Some("ALL")), Some(Mode::All));
    }

    #[test]
    fn test_parse_mode_rejects_unknown() {
        assert_eq!(parse_mode(Some("proxy")), None);
    }
}
