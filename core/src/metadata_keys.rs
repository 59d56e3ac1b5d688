//! Reserved metadata key constants for Sulku events
//!
//! These keys are stamped onto events by the pipeline decorator and the
//! per-connection workers. Keeping them as constants means codecs and
//! downstream consumers agree on spelling without coupling to the engine.

/// Name of the pipeline that processed the event
pub const PIPELINE: &str = "sulku.pipeline";

/// RFC 3339 timestamp of when the relay received the event
pub const RECEIVED_AT: &str = "sulku.received_at";

/// Identifier of the connection the event arrived on
pub const CONNECTION: &str = "sulku.connection";

/// Name of the codec that decoded the event
pub const DECODER: &str = "sulku.decoder";
