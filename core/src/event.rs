//! Event and record types for the Sulku pipeline
//!
//! A [`Record`] is what a connection yields: one distinguished raw line
//! plus zero or more extra wire fields, all still bytes. A [`Event`] is
//! what the codec produces from that line, decorated with pipeline
//! metadata and with the record's extra fields merged in as UTF-8.
//!
//! ```text
//! Connection ──► Record { line, fields } ──► Codec ──► Event(s) ──► buffer
//! ```
//!
//! Records are transient: the worker consumes one, decodes it, and drops
//! it. Events are owned by the relay buffer until the relay hands them to
//! the downstream consumer, after which this crate never touches them
//! again.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;

/// Unique event identifier (ULID under the hood)
///
/// Lexicographically sortable by creation time, which keeps downstream
/// stores happy without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(ulid::Ulid);

impl EventId {
    /// Generate a new unique id
    #[inline]
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One framed record produced by a connection
///
/// `line` is the distinguished raw payload the codec decodes. `fields`
/// carries whatever extra key/value pairs the wire protocol attached
/// (peer address, protocol tags); values stay as raw bytes until they
/// are merged into an event, at which point they are forced to UTF-8.
#[derive(Debug, Clone, Default)]
pub struct Record {
    /// The raw line consumed by the codec
    pub line: Bytes,
    /// Extra wire fields, merged into each emitted event
    pub fields: HashMap<String, Bytes>,
}

impl Record {
    /// Create a record holding just a raw line
    pub fn new(line: impl Into<Bytes>) -> Self {
        Self {
            line: line.into(),
            fields: HashMap::new(),
        }
    }

    /// Attach an extra wire field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// The decoded, decorated output unit
///
/// Created by a codec, stamped by the decorator, enriched with the
/// record's extra fields, then owned by the relay buffer until handed to
/// the downstream consumer.
///
/// # Example
///
/// ```
/// use sulku_core::Event;
///
/// let ev = Event::new("syslog")
///     .with_field("message", "disk full")
///     .with_metadata("sulku.pipeline", "main");
/// assert_eq!(ev.source, "syslog");
/// assert_eq!(ev.fields.get("message").map(String::as_str), Some("disk full"));
/// ```
#[derive(Debug, Clone)]
pub struct Event {
    /// Unique identifier
    pub id: EventId,
    /// Unix timestamp in nanoseconds (creation time)
    pub timestamp: i64,
    /// Origin identifier (connection source name)
    pub source: String,
    /// Structured fields produced by the codec
    pub fields: HashMap<String, String>,
    /// Pipeline metadata (decorator stamps, trace context)
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Create an empty event with a fresh id and current timestamp
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            timestamp: chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
            source: source.into(),
            fields: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    /// Add a structured field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge a record's extra wire fields into this event
    ///
    /// Every value is normalised to UTF-8 (lossily, invalid sequences
    /// become U+FFFD). Fields the codec already produced win: an extra
    /// wire field never clobbers decoded output.
    pub fn merge_extra_fields(&mut self, extras: &HashMap<String, Bytes>) {
        for (key, value) in extras {
            if !self.fields.contains_key(key) {
                self.fields
                    .insert(key.clone(), String::from_utf8_lossy(value).into_owned());
            }
        }
    }
}
