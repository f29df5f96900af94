//! Viewer response construction.
//!
//! # Responsibilities
//! - Emit the fixed header block for an admitted viewer
//! - Stream the viewer's corrected bytes as the response body
//! - Map admission failures to status codes

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;

use crate::error::RelayError;
use crate::relay::ViewerStream;

/// Value of the `Expires` header sent to every viewer.
pub const EXPIRES_IN_THE_PAST: &str = "Mon, 01 Jul 1980 00:00:00 GMT";

/// `Content-Type` announcing the multipart boundary.
pub fn multipart_content_type(boundary: &str) -> String {
    format!("multipart/x-mixed-replace;boundary={}", boundary)
}

/// Build the 200 response for an admitted viewer.
pub fn viewer_response(stream: ViewerStream) -> Response {
    let content_type = multipart_content_type(stream.boundary());
    let body = Body::from_stream(stream.map(Ok::<_, Infallible>));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(header::EXPIRES, HeaderValue::from_static(EXPIRES_IN_THE_PAST));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    match HeaderValue::from_str(&content_type) {
        Ok(value) => {
            headers.insert(header::CONTENT_TYPE, value);
        }
        Err(_) => {
            tracing::warn!(content_type = %content_type, "Boundary is not a valid header value");
            return (StatusCode::BAD_GATEWAY, "Upstream boundary unusable").into_response();
        }
    }
    response
}

/// Response for a viewer that could not be admitted.
pub fn admission_failed(error: &RelayError) -> Response {
    let status = match error {
        RelayError::Terminated => StatusCode::BAD_GATEWAY,
        RelayError::SessionClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string()).into_response()
}
