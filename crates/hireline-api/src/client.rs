//! Pull-based REST client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::types::Envelope;
use crate::{ApiError, RawDocument};

/// Default connect timeout for pull requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default total timeout for pull requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Request/response backend used for fetches and writes.
///
/// Every method returns raw documents; decoding into typed entities is the
/// caller's job.
#[async_trait]
pub trait PullBackend: Send + Sync + 'static {
    /// List every record in a collection.
    async fn list(&self, collection: &str) -> Result<Vec<RawDocument>, ApiError>;

    /// Create a record, returning the server's canonical copy.
    async fn create(&self, collection: &str, body: Value) -> Result<RawDocument, ApiError>;

    /// Patch a record, returning the server's canonical copy.
    async fn update(&self, collection: &str, id: &str, body: Value)
    -> Result<RawDocument, ApiError>;

    /// Delete a record.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), ApiError>;
}

/// Client for the versioned REST API.
pub struct RestClient {
    http: Client,
    base_url: String,
    version: String,
    token: Option<String>,
}

impl RestClient {
    /// Create a client with the default request timeout.
    pub fn new(base_url: impl Into<String>, version: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, version, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom total request timeout.
    pub fn with_timeout(
        base_url: impl Into<String>,
        version: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            version: version.into().trim_matches('/').to_string(),
            token: None,
        })
    }

    /// Attach a bearer token to every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, collection: &str, id: Option<&str>) -> String {
        let mut url = format!("{}/{}/{}", self.base_url, self.version, collection);
        if let Some(id) = id {
            url.push('/');
            url.push_str(id);
        }
        url
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Handle HTTP response and parse the `{ data }` envelope.
    async fn handle_response(
        &self,
        response: reqwest::Response,
        collection: &str,
        id: Option<&str>,
    ) -> Result<Envelope, ApiError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(ApiError::RateLimited { retry_after_secs });
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound {
                collection: collection.to_string(),
                id: id.unwrap_or_default().to_string(),
            });
        }

        if !status.is_success() {
            let text = response.text().await.map_err(|e| {
                ApiError::InvalidResponse(format!(
                    "request failed ({}): failed to read response: {}",
                    status, e
                ))
            })?;

            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(ErrorBody::into_message)
                .unwrap_or(text);

            return Err(ApiError::Server {
                status: status.as_u16(),
                message,
            });
        }

        // 204 and empty bodies carry no envelope.
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Envelope { data: Value::Null });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl PullBackend for RestClient {
    async fn list(&self, collection: &str) -> Result<Vec<RawDocument>, ApiError> {
        let url = self.url(collection, None);
        debug!(url = %url, "pull: list");

        let response = self.request(Method::GET, &url).send().await?;
        let records = self
            .handle_response(response, collection, None)
            .await?
            .into_list(collection)?;

        debug!(collection = %collection, count = records.len(), "pull: listed");
        Ok(records)
    }

    async fn create(&self, collection: &str, body: Value) -> Result<RawDocument, ApiError> {
        let url = self.url(collection, None);
        debug!(url = %url, "pull: create");

        let response = self.request(Method::POST, &url).json(&body).send().await?;
        self.handle_response(response, collection, None)
            .await?
            .into_record(&singular(collection))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        body: Value,
    ) -> Result<RawDocument, ApiError> {
        let url = self.url(collection, Some(id));
        debug!(url = %url, "pull: update");

        let response = self.request(Method::PATCH, &url).json(&body).send().await?;
        self.handle_response(response, collection, Some(id))
            .await?
            .into_record(&singular(collection))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), ApiError> {
        let url = self.url(collection, Some(id));
        debug!(url = %url, "pull: delete");

        let response = self.request(Method::DELETE, &url).send().await?;
        self.handle_response(response, collection, Some(id)).await?;
        Ok(())
    }
}

/// Singular form of a collection name, used for nested record envelopes.
fn singular(collection: &str) -> String {
    if let Some(stem) = collection.strip_suffix("ies") {
        return format!("{}y", stem);
    }
    collection.strip_suffix('s').unwrap_or(collection).to_string()
}

/// Error body shapes returned by the API.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<Value>,
    message: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        if let Some(message) = self.message {
            return Some(message);
        }
        match self.error {
            Some(Value::String(s)) => Some(s),
            Some(Value::Object(map)) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }
    }
}
