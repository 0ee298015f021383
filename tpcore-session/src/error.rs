//! Error types for the session registry.

use thiserror::Error;
use tpcore_types::{Protocol, SessionId};

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur in registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// `start()` was called on a registry that is already running.
    #[error("session registry already started")]
    AlreadyStarted,

    /// No tokio runtime available to host the expiry sweep.
    #[error("session registry needs a tokio runtime: {0}")]
    NoRuntime(String),

    /// A live ticket already uses this id.
    #[error("duplicate session ticket: {0}")]
    DuplicateTicket(SessionId),

    /// No live ticket with this id.
    #[error("session ticket not found: {0}")]
    NotFound(String),

    /// The ticket exists but was never claimed within its time-to-live.
    #[error("session ticket expired: {0}")]
    Expired(String),

    /// The ticket belongs to a different protocol than the caller.
    #[error("session ticket {id} is for {expected}, not {actual}")]
    ProtocolMismatch {
        id: String,
        expected: Protocol,
        actual: Protocol,
    },

    /// `release` on a ticket nobody holds.
    #[error("session ticket {0} is not claimed")]
    NotClaimed(String),
}
