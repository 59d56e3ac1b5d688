//! Codec and decorator seams
//!
//! A codec turns one raw line into zero or more events. Decoding is
//! synchronous and CPU-bound, so the trait is not async. The decorator
//! stamps pipeline-wide metadata onto every event before it enters the
//! buffer.
//!
//! # Built-ins
//!
//! - [`PlainCodec`] - the whole line becomes a `message` field
//! - [`JsonCodec`] - a JSON object becomes string fields; an array of
//!   objects becomes multiple events

use bytes::Bytes;
use sulku_core::{metadata_keys, Event, StageError};

/// Turns a raw line into events
pub trait Codec: Send + Sync {
    /// Codec name, stamped into `sulku.decoder` metadata
    fn name(&self) -> &'static str;

    /// Decode one line into zero or more events
    ///
    /// # Errors
    /// `StageError::Decode` if the line cannot be parsed. The failure is
    /// isolated to this line; the worker logs it and moves on.
    fn decode(&self, source: &str, line: &Bytes) -> Result<Vec<Event>, StageError>;
}

/// Applies pipeline-wide metadata to an event in place
pub trait Decorator: Send + Sync {
    /// Stamp the event
    fn decorate(&self, event: &mut Event);
}

/// Codec that emits the line verbatim as a `message` field
///
/// Invalid UTF-8 is replaced, never rejected - a plain-text relay should
/// not drop a line because one byte is mangled.
#[derive(Debug, Default)]
pub struct PlainCodec;

impl PlainCodec {
    /// Create a plain codec
    pub fn new() -> Self {
        Self
    }
}

impl Codec for PlainCodec {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn decode(&self, source: &str, line: &Bytes) -> Result<Vec<Event>, StageError> {
        let event = Event::new(source).with_field("message", String::from_utf8_lossy(line));
        Ok(vec![event])
    }
}

/// Codec for JSON lines
///
/// A top-level object becomes one event (values stringified); a
/// top-level array of objects becomes one event per element. Anything
/// else is a decode error.
#[derive(Debug, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a JSON codec
    pub fn new() -> Self {
        Self
    }

    fn event_from_object(
        source: &str,
        object: &serde_json::Map<String, serde_json::Value>,
    ) -> Event {
        let mut event = Event::new(source);
        for (key, value) in object {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            event.fields.insert(key.clone(), rendered);
        }
        event
    }
}

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, source: &str, line: &Bytes) -> Result<Vec<Event>, StageError> {
        let value: serde_json::Value = serde_json::from_slice(line)
            .map_err(|e| StageError::Decode(format!("invalid JSON: {e}")))?;

        match value {
            serde_json::Value::Object(object) => Ok(vec![Self::event_from_object(source, &object)]),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::Object(object) => {
                        Ok(Self::event_from_object(source, &object))
                    }
                    other => Err(StageError::Decode(format!(
                        "array element is not an object: {other}"
                    ))),
                })
                .collect(),
            other => Err(StageError::Decode(format!(
                "expected object or array, got: {other}"
            ))),
        }
    }
}

/// Default decorator: stamps pipeline name and receive time
pub struct PipelineDecorator {
    pipeline: String,
}

impl PipelineDecorator {
    /// Create a decorator for the named pipeline
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
        }
    }
}

impl Decorator for PipelineDecorator {
    fn decorate(&self, event: &mut Event) {
        event
            .metadata
            .insert(metadata_keys::PIPELINE.to_string(), self.pipeline.clone());
        event.metadata.insert(
            metadata_keys::RECEIVED_AT.to_string(),
            chrono::Utc::now().to_rfc3339(),
        );
    }
}
