//! HTTP retrieval against the socket proxy.

use std::time::Duration;

use serde::de::DeserializeOwned;

use super::FetchError;

/// Build the shared client for one host instance.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| FetchError::Unreachable(e.to_string()))
}

/// GET `url` and decode the body as JSON.
///
/// The whole exchange, body included, is bounded by `timeout`.
pub async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<T, FetchError> {
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            FetchError::Timeout(timeout)
        } else {
            FetchError::Unreachable(e.to_string())
        }
    };

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(classify)?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Unreachable(format!(
            "{} answered with HTTP {}",
            url, status
        )));
    }

    let body = response.bytes().await.map_err(classify)?;
    decode(&body)
}

/// Decode a JSON body, classifying failures as malformed responses.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, FetchError> {
    serde_json::from_slice(body).map_err(|e| FetchError::MalformedResponse(e.to_string()))
}
