//! Request execution and per-record results.

use crate::error::{SinkError, SinkResult};
use crate::http::ApiClient;
use crate::mapper::MappingWarning;
use crate::resolver::{EntitySpec, ResolvedRequest};
use crate::response::extract_record_url;
use crate::transport::HttpClient;
use serde_json::{Map, Value};

/// State key set when a record updated an existing entity.
pub const STATE_IS_UPDATED: &str = "is_updated";

/// State key carrying the entity's canonical URL.
pub const STATE_RECORD_URL: &str = "record_url";

/// Outcome of writing one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncResult {
    /// Identifier of the created or updated entity.
    pub id: Option<String>,
    /// True if the API accepted the request.
    pub success: bool,
    /// Per-record state to persist (`is_updated`, `record_url`).
    pub state: Map<String, Value>,
    /// Non-fatal mapping warnings.
    pub warnings: Vec<MappingWarning>,
}

impl SyncResult {
    /// True if the record updated an existing entity.
    pub fn is_updated(&self) -> bool {
        self.state
            .get(STATE_IS_UPDATED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The canonical URL, when it was requested and returned.
    pub fn record_url(&self) -> Option<&str> {
        self.state.get(STATE_RECORD_URL).and_then(Value::as_str)
    }
}

/// Issues resolved requests and turns responses into [`SyncResult`]s.
pub struct RequestExecutor<'a, C: HttpClient> {
    api: &'a ApiClient<C>,
    output_record_url: bool,
}

impl<'a, C: HttpClient> RequestExecutor<'a, C> {
    /// Creates an executor over an API client.
    pub fn new(api: &'a ApiClient<C>, output_record_url: bool) -> Self {
        Self {
            api,
            output_record_url,
        }
    }

    /// Sends the request. Error statuses come back as classified errors.
    pub fn execute(&self, spec: &EntitySpec, request: &ResolvedRequest) -> SinkResult<SyncResult> {
        let response =
            self.api
                .request_api(request.method, &request.endpoint, Some(&request.body))?;
        let data = response.body_json().map_err(|e| {
            SinkError::Decode(format!(
                "{} {} returned invalid JSON: {}",
                request.method, request.endpoint, e
            ))
        })?;

        let mut state = Map::new();
        if request.is_update {
            state.insert(STATE_IS_UPDATED.to_string(), Value::Bool(true));
        }
        if self.output_record_url {
            if let Some(url) = extract_record_url(&data) {
                state.insert(STATE_RECORD_URL.to_string(), Value::String(url));
            }
        }

        Ok(SyncResult {
            id: spec.response_shape.extract_id(&data),
            success: response.ok(),
            state,
            warnings: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SinkConfig;
    use crate::resolver::EntityKind;
    use crate::transport::{Method, MockClient};
    use serde_json::json;

    fn api(mock: MockClient) -> ApiClient<MockClient> {
        ApiClient::new(&SinkConfig::new("t"), mock).unwrap()
    }

    fn request(method: Method, endpoint: &str, is_update: bool) -> ResolvedRequest {
        ResolvedRequest {
            method,
            endpoint: endpoint.into(),
            body: json!({"properties": {}}),
            is_update,
        }
    }

    #[test]
    fn update_sets_state_and_url() {
        let mock = MockClient::new();
        mock.respond_json(
            Method::Patch,
            "/pages/p1",
            200,
            json!({"object": "page", "id": "p1", "url": "https://www.notion.so/p1"}),
        );
        let api = api(mock);
        let executor = RequestExecutor::new(&api, true);

        let result = executor
            .execute(
                EntityKind::Page.spec(),
                &request(Method::Patch, "/pages/p1", true),
            )
            .unwrap();

        assert_eq!(result.id.as_deref(), Some("p1"));
        assert!(result.success);
        assert!(result.is_updated());
        assert_eq!(result.record_url(), Some("https://www.notion.so/p1"));
        assert_eq!(api.http().requests()[0].body, Some(json!({"properties": {}})));
    }

    #[test]
    fn create_without_url_output() {
        let mock = MockClient::new();
        mock.respond_json(
            Method::Post,
            "/pages",
            200,
            json!({"id": "p2", "url": "https://www.notion.so/p2"}),
        );
        let api = api(mock);
        let executor = RequestExecutor::new(&api, false);

        let result = executor
            .execute(EntityKind::Page.spec(), &request(Method::Post, "/pages", false))
            .unwrap();

        assert_eq!(result.id.as_deref(), Some("p2"));
        assert!(result.state.is_empty());
        assert!(!result.is_updated());
    }

    #[test]
    fn append_response_uses_first_child() {
        let mock = MockClient::new();
        mock.respond_json(
            Method::Patch,
            "/blocks/b1/children",
            200,
            json!({"object": "list", "results": [{"id": "child-1"}]}),
        );
        let api = api(mock);
        let executor = RequestExecutor::new(&api, true);

        let result = executor
            .execute(
                EntityKind::Block.spec(),
                &request(Method::Patch, "/blocks/b1/children", false),
            )
            .unwrap();

        assert_eq!(result.id.as_deref(), Some("child-1"));
        assert_eq!(result.record_url(), None);
    }

    #[test]
    fn error_status_propagates() {
        let mock = MockClient::new();
        mock.respond_json(
            Method::Post,
            "/comments",
            404,
            json!({"code": "object_not_found", "message": "Could not find page."}),
        );
        let api = api(mock);
        let executor = RequestExecutor::new(&api, false);

        let err = executor
            .execute(
                EntityKind::Comment.spec(),
                &request(Method::Post, "/comments", false),
            )
            .unwrap_err();
        match err {
            SinkError::Fatal(message) => assert_eq!(message, "404: Could not find page."),
            other => panic!("unexpected {:?}", other),
        }
    }
}
