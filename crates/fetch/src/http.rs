//! JSON-over-HTTP helpers shared by every REST and RPC source.

use crate::error::{FetchError, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::trace;

const MAX_BODY_IN_ERROR: usize = 256;

/// Sends a request and decodes a JSON body.
///
/// # Errors
///
/// Transport failures, non-success statuses and undecodable bodies are
/// classified into [`FetchError`] variants.
pub async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    let response = request.header("Accept", "application/json").send().await?;
    handle_response(response).await
}

/// Classifies the status and decodes the body of a response.
///
/// # Errors
///
/// `429` becomes `RateLimit` (with `Retry-After` when present), `401`/`403`
/// become `Authentication`, other failures `Api`, bad bodies `Parse`.
pub async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok());
        return Err(FetchError::rate_limit(retry_after));
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let text = response.text().await.unwrap_or_default();
        return Err(FetchError::Authentication(format!(
            "{status}: {}",
            truncate(&text)
        )));
    }

    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(FetchError::api(status.as_u16(), truncate(&text)));
    }

    let text = response.text().await?;
    trace!(bytes = text.len(), "Received response body");
    serde_json::from_str(&text)
        .map_err(|e| FetchError::parse(format!("{e}; body: {}", truncate(&text))))
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_BODY_IN_ERROR) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
