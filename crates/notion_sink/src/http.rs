//! Authenticated Notion API client.
//!
//! Wraps an [`HttpClient`] with the base URL, the bearer token and the
//! `Notion-Version` header, and turns raw responses into classified results.
//! The actual HTTP library is abstracted behind the trait.

use crate::config::SinkConfig;
use crate::error::{SinkError, SinkResult};
use crate::response::classify_response;
use crate::transport::{ApiRequest, ApiResponse, HttpClient, Method};
use serde_json::Value;
use tracing::debug;

/// Header carrying the API version.
pub const VERSION_HEADER: &str = "Notion-Version";

/// Notion API client over a pluggable HTTP transport.
pub struct ApiClient<C: HttpClient> {
    /// Base URL (e.g., "https://api.notion.com/v1").
    base_url: String,
    token: String,
    api_version: String,
    client: C,
}

impl<C: HttpClient> ApiClient<C> {
    /// Creates a client from the sink configuration.
    pub fn new(config: &SinkConfig, client: C) -> SinkResult<Self> {
        config.validate()?;
        let token = config
            .credential()
            .ok_or_else(|| SinkError::Config("missing token".into()))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            api_version: config.api_version.clone(),
            client,
        })
    }

    /// Returns the underlying HTTP client.
    pub fn http(&self) -> &C {
        &self.client
    }

    /// Headers sent with every request.
    pub fn http_headers(&self) -> Vec<(String, String)> {
        vec![
            ("Authorization".to_string(), format!("Bearer {}", self.token)),
            (VERSION_HEADER.to_string(), self.api_version.clone()),
        ]
    }

    /// Sends a request and classifies the response.
    ///
    /// Transport failures surface as the client reported them. Error statuses
    /// are mapped by [`classify_response`]; only non-error responses are
    /// returned.
    pub fn request_api(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> SinkResult<ApiResponse> {
        let request = ApiRequest {
            method,
            url: format!("{}{}", self.base_url, endpoint),
            headers: self.http_headers(),
            body: body.cloned(),
        };
        debug!(%method, endpoint, "notion request");

        let response = self.client.send(&request)?;
        debug!(%method, endpoint, status = response.status, "notion response");

        classify_response(&response)?;
        Ok(response)
    }

    /// Like [`request_api`](Self::request_api), decoding the body as JSON.
    pub fn request_json(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> SinkResult<Value> {
        let response = self.request_api(method, endpoint, body)?;
        response.body_json().map_err(|e| {
            SinkError::Decode(format!("{} {} returned invalid JSON: {}", method, endpoint, e))
        })
    }
}
