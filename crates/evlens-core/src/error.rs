//! Error taxonomy for the ingestion pipeline.
//!
//! [`SourceError`] is what collaborators return; [`PipelineError`] is what an
//! open attempt resolves to. Per-record problems (missing provider metadata,
//! malformed templates) never appear here; the resolver recovers from them
//! locally.

use thiserror::Error;

/// Failure reported by a record source or live subscriber.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("log source {0:?} is unavailable")]
    Unavailable(String),
    #[error("access to {0:?} was denied")]
    Unauthorized(String),
    #[error("log {0:?} was not found")]
    NotFound(String),
    #[error("invalid record data: {0}")]
    InvalidData(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// Terminal outcome of an open attempt that did not produce a loaded log.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    /// Clean termination requested by a close or a replacing open. Not
    /// reported to the user.
    #[error("scan cancelled")]
    Cancelled,
    #[error("access denied: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

impl From<SourceError> for PipelineError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Unavailable(name) => PipelineError::SourceUnavailable(name),
            SourceError::Unauthorized(name) => PipelineError::Unauthorized(name),
            SourceError::NotFound(name) => PipelineError::NotFound(name),
            SourceError::InvalidData(msg) => PipelineError::InvalidData(msg),
            SourceError::Io(io) => match io.kind() {
                std::io::ErrorKind::NotFound => PipelineError::NotFound(io.to_string()),
                std::io::ErrorKind::PermissionDenied => PipelineError::Unauthorized(io.to_string()),
                std::io::ErrorKind::InvalidData => PipelineError::InvalidData(io.to_string()),
                _ => PipelineError::SourceUnavailable(io.to_string()),
            },
            SourceError::Other(msg) => PipelineError::Unexpected(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_onto_taxonomy() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            PipelineError::from(SourceError::Io(denied)),
            PipelineError::Unauthorized(_)
        ));

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            PipelineError::from(SourceError::Io(missing)),
            PipelineError::NotFound(_)
        ));
    }

    #[test]
    fn other_is_unexpected() {
        let err = PipelineError::from(SourceError::Other("boom".into()));
        assert!(matches!(err, PipelineError::Unexpected(ref m) if m == "boom"));
        assert!(!err.is_cancelled());
        assert!(PipelineError::Cancelled.is_cancelled());
    }
}
