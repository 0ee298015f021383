//! The session ticket record.

use crate::{AuthMode, Protocol, SessionId, SysType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque credential blob for the target host.
///
/// `Debug` never prints the value, so tickets can be logged with `?`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Returns the raw credential. Callers must not log the result.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// One authorized remote-access grant.
///
/// The session registry owns the canonical copy; every value handed to a
/// protocol module is an independent clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTicket {
    pub id: SessionId,
    pub account_name: String,
    pub host_ip: String,
    pub host_port: u16,
    pub protocol: Protocol,
    pub auth_mode: AuthMode,
    pub sys_type: SysType,
    pub user_name: String,
    pub user_auth: Credential,
    pub user_param: String,
    pub auth_id: i64,
    pub ref_count: u32,
    pub ticket_start: DateTime<Utc>,
}

impl SessionTicket {
    /// Time elapsed since the ticket was issued. Negative ages clamp to zero.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.ticket_start).max(chrono::Duration::zero())
    }

    /// `host:port` of the target.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}:{}", self.host_ip, self.host_port)
    }
}
