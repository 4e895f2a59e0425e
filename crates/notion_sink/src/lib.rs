//! # Notion Sink
//!
//! Writes generic pipeline records to the Notion API.
//!
//! This crate provides:
//! - Session cache for container schemas and the user directory
//! - Schema-driven mapping of flat records onto typed page properties
//! - Upsert resolution (create, update, append children, match by title)
//! - Response classification into retriable / credential / payload / fatal errors
//! - HTTP transport abstraction with a scripted mock client
//!
//! ## Flow
//!
//! For each record the pipeline calls [`NotionSink::upsert_record`]:
//! 1. The stream's [`EntityKind`] selects a resolution [`Strategy`]
//! 2. Title-matched rows are mapped through the container schema and looked up
//! 3. The [`ResolvedRequest`] is sent and the response classified
//! 4. A [`SyncResult`] with the entity id and state updates is returned
//!
//! ## Key Invariants
//!
//! - A schema or the directory is fetched at most once per session
//! - Unknown property types reject the record; values are never coerced
//! - An unknown person only drops that property
//! - Method and endpoint depend only on the stream, the record's id, and the
//!   title lookup

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod executor;
mod http;
mod mapper;
mod resolver;
mod response;
mod schema;
mod sink;
mod transport;

pub use config::{ContainerRef, RetryConfig, SinkConfig, DEFAULT_API_VERSION, DEFAULT_BASE_URL};
pub use error::{SinkError, SinkResult};
pub use executor::{RequestExecutor, SyncResult, STATE_IS_UPDATED, STATE_RECORD_URL};
pub use http::{ApiClient, VERSION_HEADER};
pub use mapper::{map_record_to_properties, DirectorySource, MappedProperties, MappingWarning, Record};
pub use resolver::{
    record_identifier, resolve_record, resolve_title_match, EntityKind, EntitySpec,
    ResolvedRequest, Strategy, TitleLookup, APPEND_TRIGGER_FIELDS, PRIMARY_KEY,
};
pub use response::{classify_response, extract_record_url, ResponseShape};
pub use schema::{
    Directory, DirectoryEntry, PropertyType, SchemaCache, SchemaProperty, TargetSchema,
};
pub use sink::NotionSink;
pub use transport::{ApiRequest, ApiResponse, HttpClient, Method, MockClient};
