//! Blocking HTTP transport backed by reqwest.

use crate::error::{CliError, CliResult};
use notion_sink::{ApiRequest, ApiResponse, HttpClient, Method, SinkError, SinkResult};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// [`HttpClient`] over a pooled blocking reqwest client.
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    /// Builds a client with the given request timeout.
    pub fn new(timeout: Duration) -> CliResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("target-notion/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CliError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

/// Maps a reqwest failure onto a transport error.
///
/// Timeouts, connection failures and interrupted bodies may succeed on a
/// later attempt; malformed URLs, TLS setup and redirect loops never will.
fn transport_error(e: reqwest::Error) -> SinkError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        SinkError::transport_retryable(e.to_string())
    } else {
        SinkError::transport_fatal(e.to_string())
    }
}

impl HttpClient for ReqwestClient {
    fn send(&self, request: &ApiRequest) -> SinkResult<ApiResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Patch => self.client.patch(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        let response = builder.send().map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(transport_error)?;
        debug!(method = %request.method, url = %request.url, status, "response");
        Ok(ApiResponse::new(status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notion_sink::{EntityKind, NotionSink, Record, SinkConfig};

    #[test]
    fn malformed_url_is_not_retryable() {
        let client = ReqwestClient::new(Duration::from_secs(1)).unwrap();
        let request = ApiRequest {
            method: Method::Get,
            url: "not a url/users".into(),
            headers: Vec::new(),
            body: None,
        };

        let err = client.send(&request).unwrap_err();
        assert!(matches!(err, SinkError::Transport { retryable: false, .. }));
    }

    #[test]
    fn bad_base_url_fails_the_record_without_retry() {
        let config = SinkConfig::new("t").with_base_url("not a url");
        let client = ReqwestClient::new(Duration::from_secs(1)).unwrap();
        let sink = NotionSink::new(&config, client).unwrap();

        let err = sink
            .upsert_record(EntityKind::Page, &Record::new(), &Record::new())
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(!err.halts_session());
    }
}
