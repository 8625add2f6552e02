pub type ExportResult<T> = Result<T, ExportError>;

/// Errors surfaced by export sessions and their pipeline collaborators.
#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    /// `start` was called before an output location was configured.
    #[error("output location not set")]
    OutputUrlNotSet,

    #[error("validation error: {0}")]
    Validation(String),

    /// The decode side (asset reader) failed.
    #[error("source error: {0}")]
    Source(String),

    /// The encode side (writer/muxer) failed.
    #[error("sink error: {0}")]
    Sink(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExportError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }
}
