//! Transport layer abstraction for Notion API calls.

use crate::error::{SinkError, SinkResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;

/// HTTP methods used by the Notion API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PATCH`
    Patch,
}

impl Method {
    /// Returns the method name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully prepared request, ready to hand to an [`HttpClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Request headers. Content type is left to the client.
    pub headers: Vec<(String, String)>,
    /// JSON body, if any.
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Returns the value of the named header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// Status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl ApiResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Creates a response with a JSON body.
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    /// True for any status below 400.
    pub fn ok(&self) -> bool {
        self.status < 400
    }

    /// Parses the body as JSON. An empty body parses as `null`.
    pub fn body_json(&self) -> Result<Value, serde_json::Error> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body)
    }

    /// Builds a human-readable error message from a failed response.
    ///
    /// Uses the body's `message`, then `code`, then the raw text, prefixed
    /// with the status code.
    pub fn error_message(&self) -> String {
        let from_body = self.body_json().ok().and_then(|body| {
            ["message", "code"].iter().find_map(|key| {
                body.get(*key)
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
        });
        format!(
            "{}: {}",
            self.status,
            from_body.unwrap_or_else(|| self.body.clone())
        )
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. The client
/// only moves bytes; status classification happens in [`crate::ApiClient`].
pub trait HttpClient: Send + Sync {
    /// Sends a request.
    ///
    /// `Err` means no response was received and should be a
    /// [`SinkError::Transport`] whose `retryable` flag says whether sending
    /// the same request again can succeed.
    fn send(&self, request: &ApiRequest) -> SinkResult<ApiResponse>;
}

impl<C: HttpClient + ?Sized> HttpClient for std::sync::Arc<C> {
    fn send(&self, request: &ApiRequest) -> SinkResult<ApiResponse> {
        (**self).send(request)
    }
}

/// A scripted client for testing.
///
/// Responses are registered per method and URL path (the part after the base
/// URL, query string included). Each registered response is returned once, in
/// order; the last one for a route is repeated when the queue runs dry. Every
/// request is recorded.
#[derive(Debug, Default)]
pub struct MockClient {
    routes: Mutex<Vec<MockRoute>>,
    requests: Mutex<Vec<ApiRequest>>,
}

#[derive(Debug)]
struct MockRoute {
    method: Method,
    path: String,
    responses: VecDeque<MockReply>,
}

#[derive(Debug, Clone)]
enum MockReply {
    Response(ApiResponse),
    Failure { message: String, retryable: bool },
}

impl MockReply {
    fn into_result(self) -> SinkResult<ApiResponse> {
        match self {
            MockReply::Response(response) => Ok(response),
            MockReply::Failure { message, retryable } => Err(SinkError::Transport {
                message,
                retryable,
            }),
        }
    }
}

impl MockClient {
    /// Creates a mock client with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for `method path`.
    pub fn respond(&self, method: Method, path: &str, response: ApiResponse) -> &Self {
        self.push(method, path, MockReply::Response(response))
    }

    /// Queues a JSON response for `method path`.
    pub fn respond_json(&self, method: Method, path: &str, status: u16, body: Value) -> &Self {
        self.respond(method, path, ApiResponse::json(status, &body))
    }

    /// Queues a retryable transport failure for `method path`.
    pub fn fail(&self, method: Method, path: &str, message: &str) -> &Self {
        let failure = MockReply::Failure {
            message: message.to_string(),
            retryable: true,
        };
        self.push(method, path, failure)
    }

    /// Queues a transport failure that no retry can fix.
    pub fn fail_fatal(&self, method: Method, path: &str, message: &str) -> &Self {
        let failure = MockReply::Failure {
            message: message.to_string(),
            retryable: false,
        };
        self.push(method, path, failure)
    }

    fn push(&self, method: Method, path: &str, response: MockReply) -> &Self {
        let mut routes = self.routes.lock();
        match routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path)
        {
            Some(route) => route.responses.push_back(response),
            None => routes.push(MockRoute {
                method,
                path: path.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
        self
    }

    /// Returns every request sent so far.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    /// Returns how many requests were sent to `method path`.
    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && path_of(&r.url) == path)
            .count()
    }
}

/// Strips scheme and host, and a leading `/v1` version segment.
fn path_of(url: &str) -> &str {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let path = without_scheme
        .find('/')
        .map(|i| &without_scheme[i..])
        .unwrap_or("/");
    path.strip_prefix("/v1").unwrap_or(path)
}

impl HttpClient for MockClient {
    fn send(&self, request: &ApiRequest) -> SinkResult<ApiResponse> {
        self.requests.lock().push(request.clone());

        let path = path_of(&request.url);
        let mut routes = self.routes.lock();
        let route = routes
            .iter_mut()
            .find(|r| r.method == request.method && r.path == path)
            .ok_or_else(|| {
                SinkError::transport_fatal(format!(
                    "no mock response for {} {}",
                    request.method, path
                ))
            })?;

        let reply = if route.responses.len() > 1 {
            route.responses.pop_front()
        } else {
            route.responses.front().cloned()
        };
        reply
            .ok_or_else(|| SinkError::transport_fatal("mock queue empty"))?
            .into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn get(url: &str) -> ApiRequest {
        ApiRequest {
            method: Method::Get,
            url: url.into(),
            headers: vec![("Notion-Version".into(), "2025-09-03".into())],
            body: None,
        }
    }

    #[test]
    fn error_message_prefers_message_then_code() {
        let resp = ApiResponse::json(
            400,
            &json!({"code": "validation_error", "message": "Title is too long."}),
        );
        assert_eq!(resp.error_message(), "400: Title is too long.");

        let resp = ApiResponse::json(404, &json!({"code": "object_not_found"}));
        assert_eq!(resp.error_message(), "404: object_not_found");

        let resp = ApiResponse::new(502, "Bad Gateway");
        assert_eq!(resp.error_message(), "502: Bad Gateway");
    }

    #[test]
    fn empty_body_is_null() {
        assert_eq!(ApiResponse::new(200, "").body_json().unwrap(), Value::Null);
        assert!(ApiResponse::new(200, "<html>").body_json().is_err());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req = get("https://api.notion.com/v1/users");
        assert_eq!(req.header("notion-version"), Some("2025-09-03"));
        assert_eq!(req.header("Authorization"), None);
    }

    #[test]
    fn path_strips_host_and_version() {
        assert_eq!(path_of("https://api.notion.com/v1/pages/abc"), "/pages/abc");
        assert_eq!(
            path_of("http://localhost:8080/users?page_size=100"),
            "/users?page_size=100"
        );
    }

    #[test]
    fn mock_client_replays_in_order_and_repeats_last() {
        let client = MockClient::new();
        client
            .respond(Method::Get, "/users", ApiResponse::new(500, "boom"))
            .respond(Method::Get, "/users", ApiResponse::new(200, "{}"));

        let req = get("https://api.notion.com/v1/users");
        assert_eq!(client.send(&req).unwrap().status, 500);
        assert_eq!(client.send(&req).unwrap().status, 200);
        assert_eq!(client.send(&req).unwrap().status, 200);
        assert_eq!(client.count(Method::Get, "/users"), 3);
    }

    #[test]
    fn mock_client_unknown_route() {
        let client = MockClient::new();
        let err = client
            .send(&get("https://api.notion.com/v1/pages/x"))
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("GET /pages/x"));
    }

    #[test]
    fn mock_client_failures_keep_retry_flag() {
        let client = MockClient::new();
        client
            .fail(Method::Get, "/users", "connection reset")
            .fail_fatal(Method::Get, "/users", "invalid certificate");

        let req = get("https://api.notion.com/v1/users");
        assert!(client.send(&req).unwrap_err().is_retryable());
        assert!(!client.send(&req).unwrap_err().is_retryable());
    }
}
