//! Upsert resolution: which request a record turns into.
//!
//! Every entity kind is described by a static [`EntitySpec`]. A single
//! resolution function reads the spec's [`Strategy`] and produces a
//! [`ResolvedRequest`]; nothing carries over between records.

use crate::config::ContainerRef;
use crate::error::{SinkError, SinkResult};
use crate::mapper::{MappedProperties, Record};
use crate::response::ResponseShape;
use crate::schema::TargetSchema;
use crate::transport::Method;
use serde_json::Value;
use std::fmt;

/// Field that identifies an existing entity.
pub const PRIMARY_KEY: &str = "id";

/// Body fields that turn a block write into a child append.
pub const APPEND_TRIGGER_FIELDS: [&str; 3] = ["children", "after", "position"];

/// How an entity kind decides between create and update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Update `{endpoint}/{id}` when the record has an id, create otherwise.
    Upsert,
    /// Always create.
    CreateOnly,
    /// Id required; append children or update the entity itself.
    AppendOrUpdate,
    /// Look an existing page up by title in the container.
    TitleMatch,
}

/// Entity kinds the sink can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Standalone pages.
    Page,
    /// Databases.
    Database,
    /// Data sources.
    DataSource,
    /// Comments on pages, blocks or discussions.
    Comment,
    /// Blocks and their children.
    Block,
    /// Pages inside the configured container, keyed by title.
    Row,
}

/// Static description of an entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySpec {
    /// The kind described.
    pub kind: EntityKind,
    /// Stream name selecting this kind.
    pub stream: &'static str,
    /// Collection endpoint.
    pub endpoint: &'static str,
    /// Method for creates (and appends).
    pub create_method: Method,
    /// Method for updates.
    pub update_method: Method,
    /// Resolution strategy.
    pub strategy: Strategy,
    /// Where the response carries the entity id.
    pub response_shape: ResponseShape,
}

static ENTITY_SPECS: [EntitySpec; 6] = [
    EntitySpec {
        kind: EntityKind::Page,
        stream: "Page",
        endpoint: "/pages",
        create_method: Method::Post,
        update_method: Method::Patch,
        strategy: Strategy::Upsert,
        response_shape: ResponseShape::Entity,
    },
    EntitySpec {
        kind: EntityKind::Database,
        stream: "Database",
        endpoint: "/databases",
        create_method: Method::Post,
        update_method: Method::Patch,
        strategy: Strategy::Upsert,
        response_shape: ResponseShape::Entity,
    },
    EntitySpec {
        kind: EntityKind::DataSource,
        stream: "DataSource",
        endpoint: "/data_sources",
        create_method: Method::Post,
        update_method: Method::Patch,
        strategy: Strategy::Upsert,
        response_shape: ResponseShape::Entity,
    },
    EntitySpec {
        kind: EntityKind::Comment,
        stream: "Comment",
        endpoint: "/comments",
        create_method: Method::Post,
        update_method: Method::Patch,
        strategy: Strategy::CreateOnly,
        response_shape: ResponseShape::Entity,
    },
    EntitySpec {
        kind: EntityKind::Block,
        stream: "Block",
        endpoint: "/blocks",
        create_method: Method::Patch,
        update_method: Method::Patch,
        strategy: Strategy::AppendOrUpdate,
        response_shape: ResponseShape::AppendResults,
    },
    EntitySpec {
        kind: EntityKind::Row,
        stream: "Row",
        endpoint: "/pages",
        create_method: Method::Post,
        update_method: Method::Patch,
        strategy: Strategy::TitleMatch,
        response_shape: ResponseShape::Entity,
    },
];

impl EntityKind {
    /// All kinds, in registry order.
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Page,
        EntityKind::Database,
        EntityKind::DataSource,
        EntityKind::Comment,
        EntityKind::Block,
        EntityKind::Row,
    ];

    /// Returns the spec for this kind.
    pub fn spec(&self) -> &'static EntitySpec {
        let index = match self {
            EntityKind::Page => 0,
            EntityKind::Database => 1,
            EntityKind::DataSource => 2,
            EntityKind::Comment => 3,
            EntityKind::Block => 4,
            EntityKind::Row => 5,
        };
        &ENTITY_SPECS[index]
    }

    /// Finds the kind registered for a stream name.
    pub fn from_stream(stream: &str) -> Option<Self> {
        ENTITY_SPECS
            .iter()
            .find(|spec| spec.stream == stream)
            .map(|spec| spec.kind)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spec().stream)
    }
}

/// The request a record resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    /// HTTP method.
    pub method: Method,
    /// Endpoint path, relative to the API base URL.
    pub endpoint: String,
    /// Request body.
    pub body: Value,
    /// True if the request modifies an existing entity.
    pub is_update: bool,
}

/// Returns the record's identifier when it is a non-empty string or a number.
pub fn record_identifier(record: &Record) -> Option<String> {
    match record.get(PRIMARY_KEY)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn without_identifier(record: &Record) -> Value {
    Value::Object(
        record
            .iter()
            .filter(|(key, _)| key.as_str() != PRIMARY_KEY)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    )
}

/// Resolves a record for the record-driven strategies.
///
/// [`Strategy::TitleMatch`] depends on the container schema and goes
/// through [`resolve_title_match`] instead.
pub fn resolve_record(spec: &EntitySpec, record: &Record) -> SinkResult<ResolvedRequest> {
    match spec.strategy {
        Strategy::Upsert => Ok(match record_identifier(record) {
            Some(id) => ResolvedRequest {
                method: spec.update_method,
                endpoint: format!("{}/{}", spec.endpoint, id),
                body: without_identifier(record),
                is_update: true,
            },
            None => create(spec, Value::Object(record.clone())),
        }),
        Strategy::CreateOnly => Ok(create(spec, Value::Object(record.clone()))),
        Strategy::AppendOrUpdate => {
            let id = record_identifier(record).ok_or_else(|| {
                SinkError::InvalidPayload(format!(
                    "record must include '{}' for {} operations",
                    PRIMARY_KEY, spec.stream
                ))
            })?;
            let body = without_identifier(record);
            let is_append = APPEND_TRIGGER_FIELDS
                .iter()
                .any(|field| body.get(field).is_some());
            Ok(if is_append {
                ResolvedRequest {
                    method: spec.create_method,
                    endpoint: format!("{}/{}/children", spec.endpoint, id),
                    body,
                    is_update: false,
                }
            } else {
                ResolvedRequest {
                    method: spec.update_method,
                    endpoint: format!("{}/{}", spec.endpoint, id),
                    body,
                    is_update: true,
                }
            })
        }
        Strategy::TitleMatch => Err(SinkError::Config(format!(
            "stream {} is resolved against the container schema",
            spec.stream
        ))),
    }
}

fn create(spec: &EntitySpec, body: Value) -> ResolvedRequest {
    ResolvedRequest {
        method: spec.create_method,
        endpoint: spec.endpoint.to_string(),
        body,
        is_update: false,
    }
}

/// Finds an existing page in the container by exact title.
pub trait TitleLookup {
    /// Returns the id of the first page whose `property` equals `title`.
    fn find_by_title(
        &self,
        container: &ContainerRef,
        property: &str,
        title: &str,
    ) -> SinkResult<Option<String>>;
}

/// Resolves a mapped row against the container.
///
/// A row whose title matches an existing page updates that page with its
/// properties only. Anything else, including a row without a title, is
/// created with its parent. The lookup runs against the schema's data source
/// when it has one; the parent of created pages is always `container`.
pub fn resolve_title_match<L>(
    spec: &EntitySpec,
    container: &ContainerRef,
    schema: &TargetSchema,
    mapped: &MappedProperties,
    lookup: &L,
) -> SinkResult<ResolvedRequest>
where
    L: TitleLookup + ?Sized,
{
    let queried = match schema.data_source_id() {
        Some(id) => ContainerRef::DataSource(id.to_string()),
        None => container.clone(),
    };
    let existing = match (schema.title_property_name(), mapped.title_text(schema)) {
        (Some(property), Some(title)) => lookup.find_by_title(&queried, property, &title)?,
        _ => None,
    };

    Ok(match existing {
        Some(page_id) => ResolvedRequest {
            method: spec.update_method,
            endpoint: format!("{}/{}", spec.endpoint, page_id),
            body: mapped.update_payload(),
            is_update: true,
        },
        None => create(spec, mapped.create_payload(container)),
    })
}
