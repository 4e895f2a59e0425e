//! Singer message framing.

use crate::error::{CliError, CliResult};
use notion_sink::Record;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{BufRead, Write};

/// A message read from the tap.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Declares a stream before its records.
    Schema {
        /// Stream name.
        stream: String,
        /// Primary key fields declared by the tap.
        #[serde(default)]
        key_properties: Vec<String>,
    },
    /// One record of a stream.
    Record {
        /// Stream name.
        stream: String,
        /// The record itself.
        record: Record,
    },
    /// Opaque tap state to pass through.
    State {
        /// State value.
        value: Value,
    },
    /// `ACTIVATE_VERSION`, `BATCH` and anything newer.
    #[serde(other)]
    Unknown,
}

/// Reads messages line by line, skipping blank lines.
pub struct MessageReader<R> {
    input: R,
    line: usize,
    buf: String,
}

impl<R: BufRead> MessageReader<R> {
    /// Wraps a line-oriented input.
    pub fn new(input: R) -> Self {
        Self {
            input,
            line: 0,
            buf: String::new(),
        }
    }

    /// Returns the next message, or `None` at end of input.
    pub fn next_message(&mut self) -> CliResult<Option<Message>> {
        loop {
            self.buf.clear();
            if self.input.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;

            let text = self.buf.trim();
            if text.is_empty() {
                continue;
            }
            return serde_json::from_str(text)
                .map(Some)
                .map_err(|source| CliError::Message {
                    line: self.line,
                    source,
                });
        }
    }
}

/// Writes a `STATE` message as a single line.
pub fn write_state<W: Write>(out: &mut W, value: &Value) -> CliResult<()> {
    let message = json!({"type": "STATE", "value": value});
    writeln!(out, "{}", message)?;
    out.flush()?;
    Ok(())
}
