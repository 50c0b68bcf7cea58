use thiserror::Error as ThisError;

/// Result type for argus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the probing core.
///
/// Only configuration-time problems abort work. Failures of an individual probe
/// or rule are captured in the result they belong to and never surface here.
#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid orchestration or throttle configuration, raised before any network call
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Prompt pack id is not known to the catalog
    #[error("Unknown prompt pack '{id}'. Valid options: {valid}")]
    UnknownPromptPack { id: String, valid: String },

    /// `MetricsCollector::start` was called twice without an intervening `finalize`
    #[error("Metrics collector already started")]
    CollectorAlreadyStarted,

    /// Requested entity not found in storage
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// The operation was cancelled before it could complete
    #[error("Operation cancelled")]
    Cancelled,

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Error::InvalidConfig { message: message.into() }
    }

    pub(crate) fn not_found(resource: &str, id: impl ToString) -> Self {
        Error::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    /// Whether this error was raised before any work started.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig { .. } | Error::UnknownPromptPack { .. })
    }
}
