// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use datadog_log_core::IngestResponse;
use http_body_util::Full;
use hyper::{
    body::Bytes,
    header,
    http::{self, HeaderMap},
    Response, StatusCode,
};
use tracing::{debug, error};

pub type ResponseBody = Full<Bytes>;

/// Serializes an [`IngestResponse`] into an HTTP response with the given
/// status.
pub fn create_ingest_response(
    status: StatusCode,
    response: &IngestResponse,
) -> http::Result<Response<ResponseBody>> {
    let body = serde_json::to_string(response).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
}

/// Does two things:
/// 1. Logs the given message. A success status code (within 200-299) will
///    cause a debug log to be written, otherwise error will be written.
/// 2. Returns the message as the single element of the response `errors`
///    array, with the given status code.
pub fn log_and_create_error_response(
    message: &str,
    status: StatusCode,
) -> http::Result<Response<ResponseBody>> {
    if status.is_success() {
        debug!("{message}");
    } else {
        error!("{message}");
    }
    create_ingest_response(status, &IngestResponse::failed(vec![message.to_string()]))
}

/// Takes a request's header map, and verifies that the "content-length"
/// and/or "Transfer-Encoding" header is present, valid, and less than the
/// given max_content_length.
///
/// Will return None if no issues are found. Otherwise logs an error (with
/// the given prefix) and returns an HTTP Response with the appropriate error
/// status code.
pub fn verify_request_content_length(
    header_map: &HeaderMap,
    max_content_length: usize,
    error_message_prefix: &str,
) -> Option<http::Result<Response<ResponseBody>>> {
    let content_length_header = match header_map.get(header::CONTENT_LENGTH) {
        Some(res) => res,
        None => {
            if let Some(transfer_encoding_header) = header_map.get(header::TRANSFER_ENCODING) {
                debug!(
                    "Transfer-Encoding header is present: {:?}",
                    transfer_encoding_header
                );
                return None;
            }
            return Some(log_and_create_error_response(
                &format!(
                    "{error_message_prefix}: Missing Content-Length and Transfer-Encoding header"
                ),
                StatusCode::LENGTH_REQUIRED,
            ));
        }
    };
    let header_as_string = match content_length_header.to_str() {
        Ok(res) => res,
        Err(_) => {
            return Some(log_and_create_error_response(
                &format!("{error_message_prefix}: Invalid Content-Length header"),
                StatusCode::BAD_REQUEST,
            ));
        }
    };
    let content_length = match header_as_string.parse::<usize>() {
        Ok(res) => res,
        Err(_) => {
            return Some(log_and_create_error_response(
                &format!("{error_message_prefix}: Invalid Content-Length header"),
                StatusCode::BAD_REQUEST,
            ));
        }
    };
    if content_length > max_content_length {
        return Some(log_and_create_error_response(
            &format!("{error_message_prefix}: Payload too large"),
            StatusCode::PAYLOAD_TOO_LARGE,
        ));
    }
    None
}
