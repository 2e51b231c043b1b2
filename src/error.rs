/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::{Error as IoError, ErrorKind};

/// The error type for **mnet** setup operations
///
/// Returned by [`ServerEngine::start()`](crate::ServerEngine::start()),
/// [`ClientEngine::connect()`](crate::ClientEngine::connect()) and the
/// multicast `start()` functions. Per-connection failures are never surfaced
/// this way; they tear down the affected connection instead.
///
/// Errors from the socket layer are passed through "as-is" in the
/// [`Failed`](EngineError::Failed) variant.
#[derive(Debug)]
pub enum EngineError {
    /// The outbound connection did not complete within the configured
    /// `connection_timeout`.
    TimedOut,
    /// The configured address could not be resolved to any socket address.
    Unresolved(String),
    /// A socket operation failed.
    Failed(IoError),
}

impl EngineError {
    /// Returns the [`ErrorKind`] that best describes this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TimedOut => ErrorKind::TimedOut,
            Self::Unresolved(_) => ErrorKind::NotFound,
            Self::Failed(inner) => inner.kind(),
        }
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut => write!(f, "The connection attempt timed out!"),
            Self::Unresolved(address) => write!(f, "Failed to resolve address {:?}!", address),
            Self::Failed(inner) => write!(f, "The socket operation failed: {}", inner),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Failed(inner) => Some(inner),
            _ => None,
        }
    }
}

impl From<IoError> for EngineError {
    fn from(error: IoError) -> Self {
        match error.kind() {
            ErrorKind::TimedOut => Self::TimedOut,
            _ => Self::Failed(error),
        }
    }
}

impl From<EngineError> for IoError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Failed(inner) => inner,
            other => IoError::new(other.kind(), other),
        }
    }
}
