//! Core type definitions for the tpcore session broker.
//!
//! This crate defines the value types that cross the boundary between the
//! core process and independently built protocol modules:
//! - Session ticket identifiers
//! - The `SessionTicket` record and its enum fields
//! - Errors reported by the upstream authority
//!
//! Everything here is plain data. Tickets are always handed out by value so
//! that no protocol module ever holds a reference into core-owned state.

mod ids;
mod protocol;
mod ticket;

pub use ids::SessionId;
pub use protocol::{AuthMode, Protocol, SysType};
pub use ticket::{Credential, SessionTicket};

/// Errors that can occur parsing or converting core types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
}

/// Errors reported while talking to the upstream authority.
///
/// Either variant of a failed `session_begin` means the caller must not
/// proceed with the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    #[error("authority unreachable: {0}")]
    Unreachable(String),

    #[error("authority rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("invalid authority response: {0}")]
    InvalidResponse(String),
}
