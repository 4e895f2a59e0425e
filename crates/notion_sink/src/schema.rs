//! Container schemas, the user directory, and their session cache.

use crate::error::{SinkError, SinkResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Type tag of a container property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyType {
    /// `title`
    Title,
    /// `rich_text`
    RichText,
    /// `number`
    Number,
    /// `url`
    Url,
    /// `people`
    People,
    /// Any tag the mapper does not encode.
    Other(String),
}

impl PropertyType {
    /// Parses an API type tag.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "title" => PropertyType::Title,
            "rich_text" => PropertyType::RichText,
            "number" => PropertyType::Number,
            "url" => PropertyType::Url,
            "people" => PropertyType::People,
            other => PropertyType::Other(other.to_string()),
        }
    }

    /// Returns the API type tag.
    pub fn tag(&self) -> &str {
        match self {
            PropertyType::Title => "title",
            PropertyType::RichText => "rich_text",
            PropertyType::Number => "number",
            PropertyType::Url => "url",
            PropertyType::People => "people",
            PropertyType::Other(tag) => tag,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One property of a container schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaProperty {
    /// Key of the property in the schema and in request bodies.
    pub key: String,
    /// Display name, matched against record field names.
    pub name: String,
    /// API property id, when reported.
    pub id: Option<String>,
    /// Type tag.
    pub kind: PropertyType,
}

impl SchemaProperty {
    /// Creates a property whose display name equals its key.
    pub fn new(name: impl Into<String>, kind: PropertyType) -> Self {
        let name = name.into();
        Self {
            key: name.clone(),
            name,
            id: None,
            kind,
        }
    }
}

/// Typed property schema of a container, in API order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSchema {
    properties: Vec<SchemaProperty>,
    data_source_id: Option<String>,
}

impl TargetSchema {
    /// Creates a schema from properties.
    pub fn new(properties: Vec<SchemaProperty>) -> Self {
        Self {
            properties,
            data_source_id: None,
        }
    }

    /// Marks the schema as read from the given data source.
    pub fn with_data_source(mut self, id: impl Into<String>) -> Self {
        self.data_source_id = Some(id.into());
        self
    }

    /// The data source that owns these properties, if they came from one.
    ///
    /// Pages of such a schema are queried through the data source even when
    /// the configured container is its database.
    pub fn data_source_id(&self) -> Option<&str> {
        self.data_source_id.as_deref()
    }

    /// Parses the `properties` object of a database or data source response.
    pub fn from_response(data: &Value) -> SinkResult<Self> {
        let properties = data
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| SinkError::Decode("container response has no 'properties'".into()))?;

        properties
            .iter()
            .map(|(key, spec)| {
                let tag = spec.get("type").and_then(Value::as_str).ok_or_else(|| {
                    SinkError::Decode(format!("property '{}' has no type", key))
                })?;
                let name = spec
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(key)
                    .to_string();
                Ok(SchemaProperty {
                    key: key.clone(),
                    name,
                    id: spec.get("id").and_then(Value::as_str).map(str::to_string),
                    kind: PropertyType::from_tag(tag),
                })
            })
            .collect::<SinkResult<Vec<_>>>()
            .map(Self::new)
            .map(|schema| match data_source_of(data) {
                Some(id) => schema.with_data_source(id),
                None => schema,
            })
    }

    /// Iterates properties in API order.
    pub fn iter(&self) -> impl Iterator<Item = &SchemaProperty> {
        self.properties.iter()
    }

    /// Looks a property up by key.
    pub fn get(&self, key: &str) -> Option<&SchemaProperty> {
        self.properties.iter().find(|p| p.key == key)
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// True if the schema has no properties.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Key of the first `title` property.
    pub fn title_property_name(&self) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.kind == PropertyType::Title)
            .map(|p| p.key.as_str())
    }
}

/// Id of a `data_source` object.
fn data_source_of(data: &Value) -> Option<&str> {
    if data.get("object").and_then(Value::as_str) != Some("data_source") {
        return None;
    }
    data.get("id").and_then(Value::as_str).filter(|id| !id.is_empty())
}

/// First data source listed by a database response.
///
/// Since API version 2025-09-03 a database carries `data_sources` instead of
/// `properties`; its schema lives on the data source.
pub(crate) fn first_data_source(database: &Value) -> Option<&str> {
    database
        .get("data_sources")?
        .as_array()?
        .iter()
        .find_map(|ds| ds.get("id").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
}

/// An addressable person in the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// User id.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl DirectoryEntry {
    /// Creates an entry.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Parses one element of a `/users` listing. Bots and unnamed users yield `None`.
    pub fn from_user(user: &Value) -> Option<Self> {
        let kind = user.get("type").and_then(Value::as_str).unwrap_or("person");
        if kind != "person" {
            return None;
        }
        let id = user.get("id").and_then(Value::as_str)?;
        let name = user
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())?;
        Some(Self::new(id, name))
    }
}

/// The workspace directory.
pub type Directory = Arc<[DirectoryEntry]>;

/// Session cache for container schemas and the user directory.
///
/// Each slot is filled at most once. The slot's lock is held while fetching,
/// so concurrent first readers wait for the single fetch instead of issuing
/// their own. A failed fetch leaves the slot empty. Entries are never
/// refreshed.
#[derive(Debug, Default)]
pub struct SchemaCache {
    schemas: Mutex<HashMap<String, Arc<TargetSchema>>>,
    directory: Mutex<Option<Directory>>,
}

impl SchemaCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the schema of `container_id`, calling `fetch` on first access.
    pub fn container_schema<F>(&self, container_id: &str, fetch: F) -> SinkResult<Arc<TargetSchema>>
    where
        F: FnOnce() -> SinkResult<TargetSchema>,
    {
        let mut schemas = self.schemas.lock();
        if let Some(schema) = schemas.get(container_id) {
            return Ok(Arc::clone(schema));
        }

        let schema = Arc::new(fetch()?);
        debug!(
            container_id,
            properties = schema.len(),
            "cached container schema"
        );
        schemas.insert(container_id.to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Returns the directory, calling `fetch` on first access.
    pub fn directory<F>(&self, fetch: F) -> SinkResult<Directory>
    where
        F: FnOnce() -> SinkResult<Vec<DirectoryEntry>>,
    {
        let mut slot = self.directory.lock();
        if let Some(directory) = slot.as_ref() {
            return Ok(Arc::clone(directory));
        }

        let directory: Directory = fetch()?.into();
        debug!(people = directory.len(), "cached user directory");
        *slot = Some(Arc::clone(&directory));
        Ok(directory)
    }

    /// True if the schema of `container_id` has been fetched.
    pub fn has_schema(&self, container_id: &str) -> bool {
        self.schemas.lock().contains_key(container_id)
    }

    /// True if the directory has been fetched.
    pub fn has_directory(&self) -> bool {
        self.directory.lock().is_some()
    }
}
