//! Response classification and result extraction.

use crate::error::{SinkError, SinkResult};
use crate::transport::ApiResponse;
use serde_json::Value;

/// Maps an HTTP response onto the sink's error taxonomy.
///
/// | status | outcome |
/// |---|---|
/// | 429, 5xx | [`SinkError::Retriable`] |
/// | 401, 403 | [`SinkError::InvalidCredentials`] |
/// | 400, 422 | [`SinkError::InvalidPayload`] |
/// | other 4xx | [`SinkError::Fatal`] |
/// | anything else | `Ok(())` |
pub fn classify_response(response: &ApiResponse) -> SinkResult<()> {
    let status = response.status;
    match status {
        429 | 500..=599 => Err(SinkError::Retriable {
            status,
            message: response.error_message(),
        }),
        401 | 403 => Err(SinkError::InvalidCredentials(response.error_message())),
        400 | 422 => Err(SinkError::InvalidPayload(response.error_message())),
        402..=499 => Err(SinkError::Fatal(response.error_message())),
        _ => Ok(()),
    }
}

/// Where the created or updated entity's identifier lives in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// The response is the entity itself: `{"id": ...}`.
    Entity,
    /// The response may instead be a list of appended children:
    /// `{"results": [{"id": ...}, ...]}`. A top-level `id` still wins.
    AppendResults,
}

impl ResponseShape {
    /// Extracts the entity identifier from a decoded response body.
    pub fn extract_id(&self, data: &Value) -> Option<String> {
        let top_level = non_empty_str(data.get("id"));
        match self {
            ResponseShape::Entity => top_level,
            ResponseShape::AppendResults => top_level.or_else(|| {
                data.get("results")
                    .and_then(Value::as_array)
                    .and_then(|results| results.first())
                    .and_then(|first| non_empty_str(first.get("id")))
            }),
        }
    }
}

/// Extracts the canonical `url` of an entity from a decoded response body.
pub fn extract_record_url(data: &Value) -> Option<String> {
    non_empty_str(data.get("url"))
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
