//! HTTP client with built-in retry logic and error handling.

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::Client;
use serde::de::DeserializeOwned;

use super::retry::{RetryPolicy, is_retryable, status_error};
use crate::error::MipError;

/// HTTP client with built-in retry logic for network operations.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    policy: RetryPolicy,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    pub fn new(client: Client) -> Self {
        Self::with_policy(client, RetryPolicy::default())
    }

    pub fn with_policy(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Returns a reference to the underlying reqwest Client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Performs a GET request and returns the response body.
    /// Automatically retries on transient errors.
    #[tracing::instrument(skip(self))]
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.with_retry("GET", || self.get_bytes_once(url)).await
    }

    /// Performs a GET request and deserializes the JSON response.
    #[tracing::instrument(skip(self))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_bytes(url).await?;
        serde_json::from_slice(&body)
            .with_context(|| format!("Failed to parse JSON response from {}", url))
    }

    /// Single attempt without retry.
    async fn get_bytes_once(&self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(url, status).into());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| network_error(url, &e))?;

        debug!(
            "Downloaded {:.2} MB from {}",
            body.len() as f64 / (1024.0 * 1024.0),
            url
        );
        Ok(body.to_vec())
    }

    /// Executes an async operation with bounded exponential backoff.
    async fn with_retry<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !is_retryable(&e) {
                        debug!("{}: non-retryable error: {}", operation_name, e);
                        return Err(e);
                    }
                    if attempt >= max_attempts {
                        return Err(e);
                    }
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        "{}: attempt {}/{} failed ({}), retrying in {}ms...",
                        operation_name,
                        attempt,
                        max_attempts,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn network_error(url: &str, error: &reqwest::Error) -> anyhow::Error {
    MipError::Network {
        url: url.to_string(),
        message: error.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_client() -> HttpClient {
        HttpClient::with_policy(Client::new(), RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn test_get_bytes_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/chebfun.mhl")
            .with_status(200)
            .with_body("archive bytes")
            .create_async()
            .await;

        let body = test_client()
            .get_bytes(&format!("{}/chebfun.mhl", server.url()))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(body, b"archive bytes");
    }

    #[tokio::test]
    async fn test_get_bytes_does_not_retry_not_found() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing.mhl")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let err = test_client()
            .get_bytes(&format!("{}/missing.mhl", server.url()))
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(
            err.downcast_ref::<MipError>(),
            Some(MipError::HttpStatus { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_get_bytes_retries_server_errors_until_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky.mhl")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let err = test_client()
            .get_bytes(&format!("{}/flaky.mhl", server.url()))
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(
            err.downcast_ref::<MipError>(),
            Some(MipError::HttpStatus { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn test_get_bytes_connection_refused_is_network_error() {
        // Port 9 (discard) on localhost is closed on CI machines
        let err = test_client()
            .get_bytes("http://127.0.0.1:9/never.mhl")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MipError>(),
            Some(MipError::Network { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_json_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/index.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"packages": [{"name": "chebfun"}]}"#)
            .create_async()
            .await;

        let value: serde_json::Value = test_client()
            .get_json(&format!("{}/index.json", server.url()))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(value["packages"][0]["name"], "chebfun");
    }

    #[tokio::test]
    async fn test_get_json_invalid_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/index.json")
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let result: Result<serde_json::Value> = test_client()
            .get_json(&format!("{}/index.json", server.url()))
            .await;
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse JSON")
        );
    }

    #[tokio::test]
    async fn test_with_retry_recovers_after_transient_failures() {
        let client = test_client();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = client
            .with_retry("test", || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err::<&str, _>(anyhow::anyhow!("connection reset"))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_non_retryable() {
        let client = test_client();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = client
            .with_retry("test", || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::Error::from(MipError::HttpStatus {
                        url: "u".into(),
                        status: 403,
                    }))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
