//! Error types for the training iteration runtime

use thiserror::Error;

/// Result type alias using the runtime Error
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error raised by a batch source
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Core error type for the training iteration runtime
#[derive(Error, Debug)]
pub enum Error {
    // Construction errors
    #[error("Invalid batch source: {message}")]
    InvalidSource { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // Iteration protocol errors
    #[error("Epoch {epoch} has not been started (call start_epoch before advance)")]
    EpochNotStarted { epoch: u64 },

    #[error("Source produced more than {max_steps_per_epoch} batches in epoch {epoch}")]
    SourceOverrun { epoch: u64, max_steps_per_epoch: u64 },

    #[error("Batch source does not support reset")]
    ResetUnsupported,

    // Errors raised by the wrapped source
    #[error("Batch source error: {0}")]
    Source(#[source] BoxError),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Wrap an error raised by a batch source
    pub fn from_source<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Source(Box::new(err))
    }

    /// Returns true if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidSource { .. }
                | Error::InvalidConfig { .. }
                | Error::SourceOverrun { .. }
        )
    }

    /// Returns true if the error originated in the wrapped source
    pub fn is_source_error(&self) -> bool {
        matches!(self, Error::Source(_))
    }

    /// Borrow the source's original error as a concrete type, if it is one
    pub fn source_error<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Error::Source(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
