//! API middleware layers.
//!
//! Assigns every response an `X-Correlation-ID`: the client's own
//! header value if present, otherwise a fresh one.

use axum::http::header::HeaderName;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

use crate::types::random_hex_id;

static CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

pub async fn correlation_id(request: axum::extract::Request, next: Next) -> Response {
    let incoming = request
        .headers()
        .get(&CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut response = next.run(request).await;

    let id = incoming.unwrap_or_else(random_hex_id);
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER.clone(), value);
    }

    response
}
