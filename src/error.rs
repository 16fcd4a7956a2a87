//! Crate-level error type for callers composing several subsystems.

use std::io;

use crate::config::ConfigError;
use crate::egress::{EgressError, RateLimitError, SsrfError};
use crate::failure::{ErrorChain, FailureSource};
use crate::resilience::{Cancelled, CircuitBreakerOpenError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Egress(#[from] EgressError),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitBreakerOpenError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<SsrfError> for Error {
    fn from(err: SsrfError) -> Self {
        Error::Egress(err.into())
    }
}

impl From<RateLimitError> for Error {
    fn from(err: RateLimitError) -> Self {
        Error::Egress(err.into())
    }
}

impl Error {
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Egress(e) => e.is_transient(),
            Error::CircuitOpen(e) => e.is_transient(),
            Error::Cancelled(_) | Error::Config(_) => false,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::Interrupted
            ),
        }
    }
}

impl FailureSource for Error {
    fn failure_message(&self) -> String {
        match self {
            Error::Egress(e) => e.failure_message(),
            Error::CircuitOpen(e) => e.failure_message(),
            Error::Io(e) => ErrorChain(e).failure_message(),
            other => other.to_string(),
        }
    }

    fn status_code(&self) -> Option<u16> {
        match self {
            Error::Egress(e) => e.status_code(),
            Error::CircuitOpen(e) => e.status_code(),
            _ => None,
        }
    }
}
