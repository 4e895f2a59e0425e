//! Drives a sink from a stream of Singer messages.

use crate::error::{CliError, CliResult};
use crate::singer::{write_state, Message, MessageReader};
use notion_sink::{
    record_identifier, EntityKind, HttpClient, NotionSink, Record, RetryConfig, SinkResult,
    Strategy, SyncResult,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use tracing::{debug, error, info, warn};

/// Record field copied into bookmarks as `externalId`.
const EXTERNAL_ID_FIELD: &str = "externalId";

/// Per-stream counters reported in the final state.
#[derive(Debug, Clone, Copy, Default, Serialize)]
struct StreamSummary {
    /// Records written.
    pub success: u64,
    /// Records that failed.
    pub fail: u64,
    /// Records addressed at an existing entity.
    pub existing: u64,
    /// Existing entities successfully updated.
    pub updated: u64,
}

/// Consumes messages, writes records and accumulates the target state.
pub struct Runner<C: HttpClient> {
    sink: NotionSink<C>,
    retry: RetryConfig,
    context: Record,
    tap_state: Option<Value>,
    bookmarks: BTreeMap<String, Vec<Value>>,
    summary: BTreeMap<String, StreamSummary>,
}

impl<C: HttpClient> Runner<C> {
    /// Creates a runner over an open sink.
    pub fn new(sink: NotionSink<C>, retry: RetryConfig) -> Self {
        Self {
            sink,
            retry,
            context: Record::new(),
            tap_state: None,
            bookmarks: BTreeMap::new(),
            summary: BTreeMap::new(),
        }
    }

    /// Reads every message from `input`, then writes the final state to `out`.
    ///
    /// The state is written even when the run aborts, so that records already
    /// written are not lost.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, out: &mut W) -> CliResult<()> {
        let mut reader = MessageReader::new(input);
        let outcome = self.consume(&mut reader);
        for (stream, counters) in &self.summary {
            info!(
                stream = stream.as_str(),
                success = counters.success,
                fail = counters.fail,
                updated = counters.updated,
                "stream finished"
            );
        }
        write_state(out, &self.state())?;
        outcome
    }

    fn consume<R: BufRead>(&mut self, reader: &mut MessageReader<R>) -> CliResult<()> {
        while let Some(message) = reader.next_message()? {
            self.handle(message)?;
        }
        Ok(())
    }

    /// Handles one message. Errors that invalidate the session are returned.
    pub fn handle(&mut self, message: Message) -> CliResult<()> {
        match message {
            Message::Schema {
                stream,
                key_properties,
            } => match EntityKind::from_stream(&stream) {
                Some(kind) => info!(stream, keys = ?key_properties, %kind, "stream registered"),
                None => warn!(stream, "unknown stream; its records will fail"),
            },
            Message::Record { stream, record } => self.process_record(&stream, &record)?,
            Message::State { value } => self.tap_state = Some(value),
            Message::Unknown => debug!("ignoring message"),
        }
        Ok(())
    }

    fn process_record(&mut self, stream: &str, record: &Record) -> CliResult<()> {
        let mut entry = Map::new();
        let counters = self.summary.entry(stream.to_string()).or_default();

        let Some(kind) = EntityKind::from_stream(stream) else {
            counters.fail += 1;
            entry.insert("success".into(), Value::Bool(false));
            entry.insert(
                "error".into(),
                Value::String(format!("unknown stream '{}'", stream)),
            );
            self.push_bookmark(stream, record, entry);
            return Ok(());
        };

        match write_with_retry(&self.sink, &self.retry, kind, record, &self.context) {
            Ok(result) => {
                counters.success += 1;
                if result.is_updated() {
                    counters.existing += 1;
                    counters.updated += 1;
                }
                entry.insert(
                    "id".into(),
                    result.id.clone().map(Value::String).unwrap_or(Value::Null),
                );
                entry.insert("success".into(), Value::Bool(result.success));
                entry.extend(result.state);
            }
            Err(e) if e.halts_session() => {
                error!(stream, error = %e, "aborting run");
                return Err(CliError::Sink(e));
            }
            Err(e) => {
                counters.fail += 1;
                let targets_existing = kind.spec().strategy == Strategy::Upsert
                    && record_identifier(record).is_some();
                if targets_existing {
                    counters.existing += 1;
                }
                warn!(stream, error = %e, "record failed");
                if let Some(id) = record_identifier(record) {
                    entry.insert("id".into(), Value::String(id));
                }
                entry.insert("success".into(), Value::Bool(false));
                entry.insert("error".into(), Value::String(e.to_string()));
            }
        }

        self.push_bookmark(stream, record, entry);
        Ok(())
    }

    fn push_bookmark(&mut self, stream: &str, record: &Record, mut entry: Map<String, Value>) {
        if let Some(external) = record.get(EXTERNAL_ID_FIELD).filter(|v| !v.is_null()) {
            entry.insert(EXTERNAL_ID_FIELD.into(), external.clone());
        }
        self.bookmarks
            .entry(stream.to_string())
            .or_default()
            .push(Value::Object(entry));
    }

    /// The state value to emit: the tap's last state with the target's
    /// `bookmarks` and `summary` merged in.
    pub fn state(&self) -> Value {
        let mut state = match &self.tap_state {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        let bookmarks = self
            .bookmarks
            .iter()
            .map(|(stream, entries)| (stream.clone(), Value::Array(entries.clone())))
            .collect();
        state.insert("bookmarks".into(), Value::Object(bookmarks));

        let summary = self
            .summary
            .iter()
            .filter_map(|(stream, counters)| {
                serde_json::to_value(counters)
                    .ok()
                    .map(|v| (stream.clone(), v))
            })
            .collect();
        state.insert("summary".into(), Value::Object(summary));

        Value::Object(state)
    }
}

/// Writes a record, retrying retriable failures with backoff.
fn write_with_retry<C: HttpClient>(
    sink: &NotionSink<C>,
    retry: &RetryConfig,
    kind: EntityKind,
    record: &Record,
    context: &Record,
) -> SinkResult<SyncResult> {
    let mut failures = 0;
    loop {
        let err = match sink.upsert_record(kind, record, context) {
            Err(e) if e.is_retryable() => e,
            outcome => return outcome,
        };
        failures += 1;
        let Some(delay) = retry.backoff(failures) else {
            return Err(err);
        };
        warn!(%kind, failures, ?delay, error = %err, "retrying");
        std::thread::sleep(delay);
    }
}
