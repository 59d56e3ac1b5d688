//! sulku-core - Core types for the Sulku ingest relay
//!
//! This crate provides the foundational types shared between the Sulku
//! relay engine and external collaborators (connection sources, codecs,
//! downstream consumers):
//!
//! - [`Event`] - the decoded, decorated unit handed to the downstream consumer
//! - [`Record`] - the raw framed unit a connection yields (line + extra fields)
//! - [`EventId`] - compact unique identifier for events
//! - [`StageError`] - error type for collaborator-facing operations
//! - [`metadata_keys`] - reserved metadata key constants
//!
//! # Why this crate exists
//!
//! External implementations of the relay's seams (a protocol server that
//! produces connections, a codec, a downstream queue) need the data model
//! but not the engine. Keeping the types here means those implementations
//! depend only on `sulku-core`, and the engine can depend on them without
//! cycles.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

mod error;
/// The event and record data model
pub mod event;
/// Reserved metadata key constants for Sulku events
pub mod metadata_keys;

pub use error::StageError;
pub use event::{Event, EventId, Record};
