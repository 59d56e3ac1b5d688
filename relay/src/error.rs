//! Engine-level errors
//!
//! [`StageError`] covers failures inside a running stage; `RelayError` is
//! for everything around it - bad configuration, wiring mistakes, and
//! shutdown problems surfaced to the embedding application.

use sulku_core::StageError;
use thiserror::Error;

/// Error raised by pipeline construction and lifecycle
#[derive(Error, Debug)]
pub enum RelayError {
    /// Invalid or missing configuration
    #[error("config error: {0}")]
    Config(String),

    /// The pipeline builder was missing a required part
    #[error("pipeline incomplete: {0}")]
    Incomplete(&'static str),

    /// A stage failed in a way that ends the pipeline
    #[error("stage failed: {0}")]
    Stage(#[from] StageError),

    /// I/O failure while setting up or tearing down
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_errors_convert() {
        fn fails() -> Result<(), RelayError> {
            Err(StageError::Queue("closed".to_string()))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(RelayError::Stage(_))));
    }

    #[test]
    fn display_is_prefixed() {
        let err = RelayError::Config("SULKU_BUFFER_CAPACITY must be >= 1".to_string());
        assert!(err.to_string().starts_with("config error:"));
    }
}
