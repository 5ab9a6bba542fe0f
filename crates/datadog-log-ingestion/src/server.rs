// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use http_body_util::BodyExt;
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode};
use serde_json::json;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chrono::Utc;
use datadog_log_core::IngestResponse;

use crate::config::Config;
use crate::http_utils::{
    create_ingest_response, log_and_create_error_response, verify_request_content_length,
    ResponseBody,
};
use crate::log_processor::{decode_batch, decode_stream_line};
use crate::stats::IngestStats;
use crate::stream_worker::{start_stream_workers, StreamQueue};
use crate::validator::{validate_batch, validate_entry};
use crate::vector_store::VectorStoreWriter;

pub const BATCH_ENDPOINT_PATH: &str = "/api/v1/logs";
pub const STREAM_ENDPOINT_PATH: &str = "/api/v1/logs/stream";
pub const HEALTH_ENDPOINT_PATH: &str = "/healthz";
pub const INFO_ENDPOINT_PATH: &str = "/info";

const WORKER_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// HTTP front of the ingestion service.
///
/// Two ingress shapes with deliberately different failure semantics: the
/// batch endpoint validates and commits the whole request synchronously
/// before responding; the streaming endpoint acknowledges once lines are
/// parsed and enqueued, leaving persistence to a fixed worker pool.
pub struct IngestionServer {
    pub config: Arc<Config>,
    pub store: Arc<VectorStoreWriter>,
    pub stats: Arc<IngestStats>,
}

impl IngestionServer {
    pub fn new(config: Arc<Config>, store: Arc<VectorStoreWriter>) -> Self {
        IngestionServer {
            config,
            store,
            stats: Arc::new(IngestStats::default()),
        }
    }

    /// Binds the configured port and serves until cancelled. A bind failure
    /// is fatal and propagates to the caller.
    pub async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = TcpListener::bind(&addr).await?;
        self.run_with_listener(listener, cancel).await
    }

    pub async fn run_with_listener(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Warm the collection so the first request doesn't pay for setup.
        // Failure is not fatal: the write path retries lazily and the health
        // endpoint reports the dependency as unhealthy meanwhile.
        if let Err(err) = self.store.ensure_collection().await {
            warn!("Vector collection not ready at startup: {err}");
        }

        let (queue, worker_handles) = start_stream_workers(
            self.config.stream_workers,
            self.config.stream_queue_size,
            Arc::clone(&self.store),
            Arc::clone(&self.stats),
        );

        let config = Arc::clone(&self.config);
        let store = Arc::clone(&self.store);
        let stats = Arc::clone(&self.stats);
        let service = service_fn(move |req| {
            // called for each http request
            let config = Arc::clone(&config);
            let store = Arc::clone(&store);
            let stats = Arc::clone(&stats);
            let queue = queue.clone();
            endpoint_handler(config, store, stats, queue, req)
        });

        info!(
            "Ingestion server listening on {}",
            listener.local_addr().map(|a| a.to_string()).unwrap_or_default()
        );
        let result = Self::serve_tcp(listener, service, cancel).await;

        // serve_tcp consumed the last queue handle; workers finish whatever
        // is already enqueued, bounded by the drain grace.
        for handle in worker_handles {
            if tokio::time::timeout(WORKER_DRAIN_GRACE, handle).await.is_err() {
                warn!("Stream worker did not drain within {WORKER_DRAIN_GRACE:?}, proceeding");
            }
        }
        result
    }

    async fn serve_tcp<S>(
        listener: TcpListener,
        service: S,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        S: hyper::service::Service<
                Request<hyper::body::Incoming>,
                Response = Response<ResponseBody>,
            > + Clone
            + Send
            + 'static,
        S::Future: Send,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Ingestion server stopping");
                    return Ok(());
                }
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill server on panic - log and continue
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }
    }
}

pub(crate) async fn endpoint_handler<B>(
    config: Arc<Config>,
    store: Arc<VectorStoreWriter>,
    stats: Arc<IngestStats>,
    queue: StreamQueue,
    req: Request<B>,
) -> http::Result<Response<ResponseBody>>
where
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    match (req.method(), req.uri().path()) {
        (&Method::POST, BATCH_ENDPOINT_PATH) => {
            batch_handler(config, store, stats, req).await
        }
        (&Method::POST, STREAM_ENDPOINT_PATH) => {
            stream_handler(config, stats, queue, req).await
        }
        (&Method::GET, HEALTH_ENDPOINT_PATH) => health_handler(store).await,
        (_, INFO_ENDPOINT_PATH) => info_handler(&config),
        (_, BATCH_ENDPOINT_PATH | STREAM_ENDPOINT_PATH | HEALTH_ENDPOINT_PATH) => {
            log_and_create_error_response("Method not allowed", StatusCode::METHOD_NOT_ALLOWED)
        }
        _ => {
            let mut not_found = Response::default();
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Ok(not_found)
        }
    }
}

/// Strict whole-batch ingestion: unknown fields rejected, any invalid entry
/// fails the entire request, and storage commits before the response goes
/// out.
async fn batch_handler<B>(
    config: Arc<Config>,
    store: Arc<VectorStoreWriter>,
    stats: Arc<IngestStats>,
    req: Request<B>,
) -> http::Result<Response<ResponseBody>>
where
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    debug!("Received batch request");
    let (parts, body) = req.into_parts();

    if let Some(response) = verify_request_content_length(
        &parts.headers,
        config.max_request_content_length,
        "Error processing batch",
    ) {
        return response;
    }

    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return log_and_create_error_response(
                &format!("Error reading batch request body: {e}"),
                StatusCode::BAD_REQUEST,
            );
        }
    };

    // double check body size in case transfer encoding is used
    if body_bytes.len() > config.max_request_content_length {
        return log_and_create_error_response(
            "Error processing batch: Payload too large",
            StatusCode::PAYLOAD_TOO_LARGE,
        );
    }

    let batch = match decode_batch(&body_bytes) {
        Ok(batch) => batch,
        Err(reason) => {
            return log_and_create_error_response(&reason, StatusCode::BAD_REQUEST);
        }
    };

    if let Err(errors) = validate_batch(&batch, config.max_batch_size) {
        debug!("Rejecting batch: {errors:?}");
        return create_ingest_response(StatusCode::BAD_REQUEST, &IngestResponse::failed(errors));
    }

    match store.store_batch(&batch.logs).await {
        Ok(stored) => {
            stats
                .entries_stored
                .fetch_add(stored as u64, Ordering::Relaxed);
            create_ingest_response(StatusCode::OK, &IngestResponse::ok(stored))
        }
        Err(err) => {
            stats.batches_failed.fetch_add(1, Ordering::Relaxed);
            log_and_create_error_response(
                &format!("Error storing batch: {err}"),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    }
}

/// Tolerant newline-delimited ingestion: bad lines are counted and skipped,
/// good lines are enqueued for background persistence, and the response
/// reflects only what was accepted. The acknowledgement intentionally
/// precedes storage commit.
async fn stream_handler<B>(
    config: Arc<Config>,
    stats: Arc<IngestStats>,
    queue: StreamQueue,
    req: Request<B>,
) -> http::Result<Response<ResponseBody>>
where
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    debug!("Received stream request");
    let (parts, body) = req.into_parts();

    if let Some(response) = verify_request_content_length(
        &parts.headers,
        config.max_request_content_length,
        "Error processing stream",
    ) {
        return response;
    }

    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return log_and_create_error_response(
                &format!("Error reading stream request body: {e}"),
                StatusCode::BAD_REQUEST,
            );
        }
    };

    let text = String::from_utf8_lossy(&body_bytes);
    let now_ms = Utc::now().timestamp_millis();
    let mut accepted = Vec::new();
    let mut skipped: u64 = 0;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match decode_stream_line(line) {
            Ok(entry) => match validate_entry(&entry, now_ms) {
                Ok(()) => accepted.push(entry),
                Err(reason) => {
                    skipped += 1;
                    debug!("Skipping invalid line: {reason}");
                }
            },
            Err(reason) => {
                skipped += 1;
                debug!("Skipping line: {reason}");
            }
        }
    }

    if skipped > 0 {
        stats
            .stream_lines_skipped
            .fetch_add(skipped, Ordering::Relaxed);
    }

    let processed = accepted.len();
    while !accepted.is_empty() {
        let take = accepted.len().min(config.max_batch_size);
        let chunk: Vec<_> = accepted.drain(..take).collect();
        if queue.enqueue(chunk).await.is_err() {
            return log_and_create_error_response(
                "Stream workers unavailable",
                StatusCode::INTERNAL_SERVER_ERROR,
            );
        }
    }

    debug!("Stream request accepted {processed} lines, skipped {skipped}");
    create_ingest_response(StatusCode::OK, &IngestResponse::ok(processed))
}

async fn health_handler(store: Arc<VectorStoreWriter>) -> http::Result<Response<ResponseBody>> {
    match store.health().await {
        Ok(()) => Response::builder()
            .status(StatusCode::OK)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(json_body(json!({ "status": "ok" }))),
        Err(err) => {
            error!("Health check failed: {err}");
            Response::builder()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .header(hyper::header::CONTENT_TYPE, "application/json")
                .body(json_body(json!({
                    "status": "unavailable",
                    "errors": [err.to_string()]
                })))
        }
    }
}

fn info_handler(config: &Config) -> http::Result<Response<ResponseBody>> {
    let response_json = json!({
        "endpoints": [
            BATCH_ENDPOINT_PATH,
            STREAM_ENDPOINT_PATH,
            HEALTH_ENDPOINT_PATH,
            INFO_ENDPOINT_PATH
        ],
        "config": {
            "port": config.port,
            "max_batch_size": config.max_batch_size,
            "collection": config.collection,
            "embedding_model": config.embedding_model,
            "embedding_dimension": config.embedding_dimension,
        }
    });
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(json_body(response_json))
}

fn json_body(value: serde_json::Value) -> ResponseBody {
    http_body_util::Full::new(hyper::body::Bytes::from(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use hyper::body::Bytes;

    fn test_config(base: &str) -> Arc<Config> {
        Arc::new(Config {
            port: 0,
            max_batch_size: 500,
            max_request_content_length: 10 * 1024 * 1024,
            embedding_url: format!("{base}/v1/embeddings"),
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            embedding_dimension: 2,
            embedding_timeout: Duration::from_secs(5),
            vector_db_url: base.to_string(),
            collection: "container_logs".to_string(),
            vector_db_timeout: Duration::from_secs(5),
            stream_queue_size: 8,
            stream_workers: 1,
            index_type: "HNSW".to_string(),
            index_metric: "COSINE".to_string(),
        })
    }

    struct TestContext {
        config: Arc<Config>,
        store: Arc<VectorStoreWriter>,
        stats: Arc<IngestStats>,
        queue: StreamQueue,
        workers: Vec<tokio::task::JoinHandle<()>>,
    }

    fn context(base: &str) -> TestContext {
        let config = test_config(base);
        let store = Arc::new(VectorStoreWriter::new(&config));
        let stats = Arc::new(IngestStats::default());
        let (queue, workers) = start_stream_workers(
            config.stream_workers,
            config.stream_queue_size,
            Arc::clone(&store),
            Arc::clone(&stats),
        );
        TestContext {
            config,
            store,
            stats,
            queue,
            workers,
        }
    }

    impl TestContext {
        async fn request(
            &self,
            method: &str,
            path: &str,
            body: &str,
        ) -> Response<ResponseBody> {
            let request = Request::builder()
                .method(method)
                .uri(path)
                .header("content-length", body.len())
                .body(Full::new(Bytes::from(body.to_string())))
                .unwrap();
            endpoint_handler(
                Arc::clone(&self.config),
                Arc::clone(&self.store),
                Arc::clone(&self.stats),
                self.queue.clone(),
                request,
            )
            .await
            .unwrap()
        }

        async fn drain(self) {
            drop(self.queue);
            for handle in self.workers {
                handle.await.unwrap();
            }
        }
    }

    async fn body_string(response: Response<ResponseBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn mock_healthy_backend(server: &mut mockito::Server, embed_count: usize) {
        server
            .mock("POST", "/v2/vectordb/collections/has")
            .with_body(r#"{"code":0,"data":{"has":true}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/v2/vectordb/indexes/create")
            .with_body(r#"{"code":0,"data":{}}"#)
            .create_async()
            .await;
        let data: Vec<String> = (0..embed_count)
            .map(|i| format!(r#"{{"index":{i},"embedding":[0.5,0.5]}}"#))
            .collect();
        server
            .mock("POST", "/v1/embeddings")
            .with_body(format!(r#"{{"data":[{}]}}"#, data.join(",")))
            .create_async()
            .await;
    }

    #[tokio::test]
    async fn test_empty_batch_returns_400() {
        let server = mockito::Server::new_async().await;
        let ctx = context(&server.url());
        let response = ctx.request("POST", BATCH_ENDPOINT_PATH, r#"{"logs":[]}"#).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_string(response).await,
            r#"{"success":false,"processed_count":0,"errors":["Batch cannot be empty"]}"#
        );
        drop(server);
        ctx.drain().await;
    }

    #[tokio::test]
    async fn test_batch_happy_path_commits_before_response() {
        let mut server = mockito::Server::new_async().await;
        mock_healthy_backend(&mut server, 2).await;
        let insert = server
            .mock("POST", "/v2/vectordb/entities/insert")
            .with_body(r#"{"code":0,"data":{}}"#)
            .expect(1)
            .create_async()
            .await;

        let ctx = context(&server.url());
        let now = Utc::now().timestamp_millis();
        let body = format!(
            r#"{{"logs":[{{"timestamp":{now},"message":"a","source":"s"}},{{"timestamp":{now},"message":"b","source":"s"}}]}}"#
        );
        let response = ctx.request("POST", BATCH_ENDPOINT_PATH, &body).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            r#"{"success":true,"processed_count":2}"#
        );
        // The insert already happened by the time the response was returned.
        insert.assert_async().await;
        assert_eq!(ctx.stats.snapshot().entries_stored, 2);
        ctx.drain().await;
    }

    #[tokio::test]
    async fn test_batch_with_unknown_field_rejected() {
        let server = mockito::Server::new_async().await;
        let ctx = context(&server.url());
        let now = Utc::now().timestamp_millis();
        let body = format!(
            r#"{{"logs":[{{"timestamp":{now},"message":"a","source":"s","rogue":1}}]}}"#
        );
        let response = ctx.request("POST", BATCH_ENDPOINT_PATH, &body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        drop(server);
        ctx.drain().await;
    }

    #[tokio::test]
    async fn test_batch_atomic_validation_no_partial_acceptance() {
        let mut server = mockito::Server::new_async().await;
        let insert = server
            .mock("POST", "/v2/vectordb/entities/insert")
            .expect(0)
            .create_async()
            .await;
        let ctx = context(&server.url());
        let now = Utc::now().timestamp_millis();
        // Second entry is invalid: the whole request must fail with no
        // storage call.
        let body = format!(
            r#"{{"logs":[{{"timestamp":{now},"message":"ok","source":"s"}},{{"timestamp":{now},"message":"","source":"s"}}]}}"#
        );
        let response = ctx.request("POST", BATCH_ENDPOINT_PATH, &body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert!(body.contains("Entry 1"));
        insert.assert_async().await;
        ctx.drain().await;
    }

    #[tokio::test]
    async fn test_batch_store_failure_returns_500() {
        let mut server = mockito::Server::new_async().await;
        mock_healthy_backend(&mut server, 1).await;
        server
            .mock("POST", "/v2/vectordb/entities/insert")
            .with_status(503)
            .create_async()
            .await;

        let ctx = context(&server.url());
        let now = Utc::now().timestamp_millis();
        let body =
            format!(r#"{{"logs":[{{"timestamp":{now},"message":"a","source":"s"}}]}}"#);
        let response = ctx.request("POST", BATCH_ENDPOINT_PATH, &body).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ctx.stats.snapshot().batches_failed, 1);
        ctx.drain().await;
    }

    #[tokio::test]
    async fn test_stream_partial_acceptance() {
        let mut server = mockito::Server::new_async().await;
        mock_healthy_backend(&mut server, 1).await;
        let insert = server
            .mock("POST", "/v2/vectordb/entities/insert")
            .with_body(r#"{"code":0,"data":{}}"#)
            .expect(1)
            .create_async()
            .await;

        let ctx = context(&server.url());
        let now = Utc::now().timestamp_millis();
        let body = format!(
            "{{\"timestamp\":{now},\"message\":\"ok\",\"source\":\"s\"}}\nnot json\n"
        );
        let response = ctx.request("POST", STREAM_ENDPOINT_PATH, &body).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            r#"{"success":true,"processed_count":1}"#
        );
        assert_eq!(ctx.stats.snapshot().stream_lines_skipped, 1);

        ctx.drain().await;
        insert.assert_async().await;
    }

    #[tokio::test]
    async fn test_stream_accepts_shipper_shape() {
        let mut server = mockito::Server::new_async().await;
        mock_healthy_backend(&mut server, 1).await;
        let insert = server
            .mock("POST", "/v2/vectordb/entities/insert")
            .with_body(r#"{"code":0,"data":{}}"#)
            .expect(1)
            .create_async()
            .await;

        let ctx = context(&server.url());
        let now_secs = Utc::now().timestamp();
        let body = format!("{{\"date\":{now_secs}.5,\"log\":\"raw line\"}}\n");
        let response = ctx.request("POST", STREAM_ENDPOINT_PATH, &body).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            r#"{"success":true,"processed_count":1}"#
        );
        ctx.drain().await;
        insert.assert_async().await;
    }

    #[tokio::test]
    async fn test_stream_all_invalid_still_succeeds() {
        let server = mockito::Server::new_async().await;
        let ctx = context(&server.url());
        let response = ctx
            .request("POST", STREAM_ENDPOINT_PATH, "garbage\nmore garbage\n")
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            r#"{"success":true,"processed_count":0}"#
        );
        drop(server);
        ctx.drain().await;
    }

    #[tokio::test]
    async fn test_unknown_path_returns_404() {
        let server = mockito::Server::new_async().await;
        let ctx = context(&server.url());
        let response = ctx.request("POST", "/api/v1/nope", "{}").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        drop(server);
        ctx.drain().await;
    }

    #[tokio::test]
    async fn test_wrong_method_returns_405() {
        let server = mockito::Server::new_async().await;
        let ctx = context(&server.url());
        let response = ctx.request("GET", BATCH_ENDPOINT_PATH, "").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        drop(server);
        ctx.drain().await;
    }

    #[tokio::test]
    async fn test_health_endpoint_reflects_backend() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/vectordb/version")
            .with_body(r#"{"code":0,"data":{"version":"v2.4.1"}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/v2/vectordb/collections/has")
            .with_body(r#"{"code":0,"data":{"has":true}}"#)
            .create_async()
            .await;

        let ctx = context(&server.url());
        let response = ctx.request("GET", HEALTH_ENDPOINT_PATH, "").await;
        assert_eq!(response.status(), StatusCode::OK);
        ctx.drain().await;
    }

    #[tokio::test]
    async fn test_health_endpoint_unavailable_when_db_down() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/vectordb/version")
            .with_status(500)
            .create_async()
            .await;

        let ctx = context(&server.url());
        let response = ctx.request("GET", HEALTH_ENDPOINT_PATH, "").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        ctx.drain().await;
    }

    #[tokio::test]
    async fn test_info_endpoint() {
        let server = mockito::Server::new_async().await;
        let ctx = context(&server.url());
        let response = ctx.request("GET", INFO_ENDPOINT_PATH, "").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains(BATCH_ENDPOINT_PATH));
        assert!(body.contains("container_logs"));
        drop(server);
        ctx.drain().await;
    }
}
