//! The per-session sink tying mapping, resolution and execution together.

use crate::config::{ContainerRef, SinkConfig};
use crate::error::{SinkError, SinkResult};
use crate::executor::{RequestExecutor, SyncResult};
use crate::http::ApiClient;
use crate::mapper::{map_record_to_properties, DirectorySource, MappingWarning, Record};
use crate::resolver::{
    resolve_record, resolve_title_match, EntityKind, ResolvedRequest, Strategy, TitleLookup,
};
use crate::schema::{first_data_source, Directory, DirectoryEntry, SchemaCache, TargetSchema};
use crate::transport::{HttpClient, Method};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Page size used when listing workspace users.
const USERS_PAGE_SIZE: u32 = 100;

/// Writes pipeline records to Notion.
///
/// One sink lives for one sync session. Container schemas and the user
/// directory are fetched lazily and kept for the sink's lifetime.
pub struct NotionSink<C: HttpClient> {
    api: ApiClient<C>,
    container: Option<ContainerRef>,
    output_record_url: bool,
    cache: SchemaCache,
}

impl<C: HttpClient> NotionSink<C> {
    /// Opens a session.
    pub fn new(config: &SinkConfig, http: C) -> SinkResult<Self> {
        Ok(Self {
            api: ApiClient::new(config, http)?,
            container: config.container(),
            output_record_url: config.output_record_url,
            cache: SchemaCache::new(),
        })
    }

    /// Returns the session cache.
    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    /// Returns the configured container, if any.
    pub fn container(&self) -> Option<&ContainerRef> {
        self.container.as_ref()
    }

    /// Returns the schema of `container`, fetching it on first use.
    ///
    /// A database that lists data sources instead of properties takes its
    /// schema from the first data source.
    pub fn container_schema(&self, container: &ContainerRef) -> SinkResult<Arc<TargetSchema>> {
        self.cache.container_schema(container.id(), || {
            let data = self
                .api
                .request_json(Method::Get, &container.schema_endpoint(), None)?;
            if data.get("properties").is_some() {
                return TargetSchema::from_response(&data);
            }
            let Some(source_id) = first_data_source(&data) else {
                return TargetSchema::from_response(&data);
            };

            debug!(container = container.id(), source_id, "reading schema from data source");
            let source = ContainerRef::DataSource(source_id.to_string());
            let source_data = self
                .api
                .request_json(Method::Get, &source.schema_endpoint(), None)?;
            Ok(TargetSchema::from_response(&source_data)?.with_data_source(source_id))
        })
    }

    /// Lists every person in the workspace, following pagination.
    fn fetch_directory(&self) -> SinkResult<Vec<DirectoryEntry>> {
        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let endpoint = match &cursor {
                Some(c) => format!(
                    "/users?page_size={}&start_cursor={}",
                    USERS_PAGE_SIZE,
                    urlencoding::encode(c)
                ),
                None => format!("/users?page_size={}", USERS_PAGE_SIZE),
            };
            let page = self.api.request_json(Method::Get, &endpoint, None)?;

            if let Some(users) = page.get("results").and_then(Value::as_array) {
                entries.extend(users.iter().filter_map(DirectoryEntry::from_user));
            }

            let has_more = page
                .get("has_more")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            cursor = page
                .get("next_cursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if !has_more || cursor.is_none() {
                break;
            }
        }

        Ok(entries)
    }

    fn require_container(&self, kind: EntityKind) -> SinkResult<&ContainerRef> {
        self.container.as_ref().ok_or_else(|| {
            SinkError::Config(format!(
                "stream {} requires 'database_id' or 'data_source_id'",
                kind
            ))
        })
    }

    /// Decides the request for a record without sending it.
    ///
    /// Title-matched rows may query the container; nothing else touches the
    /// network.
    pub fn resolve(
        &self,
        kind: EntityKind,
        record: &Record,
    ) -> SinkResult<(ResolvedRequest, Vec<MappingWarning>)> {
        let spec = kind.spec();
        if spec.strategy != Strategy::TitleMatch {
            return Ok((resolve_record(spec, record)?, Vec::new()));
        }

        let container = self.require_container(kind)?;
        let schema = self.container_schema(container)?;
        let mapped = map_record_to_properties(record, &schema, self)?;
        let resolved = resolve_title_match(spec, container, &schema, &mapped, self)?;
        Ok((resolved, mapped.warnings))
    }

    /// Writes one record and reports the outcome.
    ///
    /// `context` is the pipeline's per-stream context; it does not influence
    /// resolution.
    pub fn upsert_record(
        &self,
        kind: EntityKind,
        record: &Record,
        _context: &Record,
    ) -> SinkResult<SyncResult> {
        let (request, warnings) = self.resolve(kind, record)?;
        for warning in &warnings {
            warn!(stream = %kind, "{}", warning);
        }

        let executor = RequestExecutor::new(&self.api, self.output_record_url);
        let mut result = executor.execute(kind.spec(), &request)?;
        result.warnings = warnings;

        info!(
            stream = %kind,
            id = result.id.as_deref().unwrap_or(""),
            updated = request.is_update,
            "record written"
        );
        Ok(result)
    }
}

impl<C: HttpClient> DirectorySource for NotionSink<C> {
    fn directory(&self) -> SinkResult<Directory> {
        self.cache.directory(|| self.fetch_directory())
    }
}

impl<C: HttpClient> TitleLookup for NotionSink<C> {
    fn find_by_title(
        &self,
        container: &ContainerRef,
        property: &str,
        title: &str,
    ) -> SinkResult<Option<String>> {
        let query = json!({
            "filter": {"property": property, "title": {"equals": title}},
            "page_size": 1,
        });
        let data = self
            .api
            .request_json(Method::Post, &container.query_endpoint(), Some(&query))?;

        let found = data
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| {
                results
                    .iter()
                    .find(|r| r.get("object").and_then(Value::as_str) == Some("page"))
            })
            .and_then(|page| page.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        debug!(property, title, found = found.is_some(), "title lookup");
        Ok(found)
    }
}
