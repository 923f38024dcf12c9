//! HTTP client abstraction for testability

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::config::NetworkConfig;

/// Errors from a tile fetch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HttpError {
    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to read response from {url}: {message}")]
    Body { url: String, message: String },
}

/// A successful response: raw body plus the declared content type.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub body: Bytes,
    pub content_type: Option<String>,
}

/// Trait for HTTP client operations.
///
/// Only status 200 counts as success; every other status is an
/// [`HttpError::Status`].
pub trait HttpClient: Send + Sync {
    /// Performs an HTTP GET request.
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<HttpResponse, HttpError>>;
}

/// Real HTTP client implementation using reqwest.
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with the default tile timeouts and user agent.
    pub fn new() -> Result<Self, HttpError> {
        Self::from_config(&NetworkConfig::default())
    }

    /// Creates a client with custom timeouts and user agent.
    pub fn from_config(config: &NetworkConfig) -> Result<Self, HttpError> {
        Self::with_timeouts(
            config.connect_timeout,
            config.read_timeout,
            &config.user_agent,
        )
    }

    pub fn with_timeouts(
        connect: Duration,
        read: Duration,
        user_agent: &str,
    ) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect)
            .read_timeout(read)
            .user_agent(user_agent)
            .build()
            .map_err(|e| HttpError::Client(e.to_string()))?;

        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<HttpResponse, HttpError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| HttpError::Request {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;

            if response.status() != reqwest::StatusCode::OK {
                return Err(HttpError::Status {
                    url: url.to_string(),
                    status: response.status().as_u16(),
                });
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let body = response.bytes().await.map_err(|e| HttpError::Body {
                url: url.to_string(),
                message: e.to_string(),
            })?;

            Ok(HttpResponse { body, content_type })
        })
    }
}
