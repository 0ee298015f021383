//! Protocol, authentication mode and target system enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Remote-access protocol a ticket may be consumed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Rdp,
    Ssh,
    Telnet,
    Vnc,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [Protocol::Rdp, Protocol::Ssh, Protocol::Telnet, Protocol::Vnc];

    /// Lowercase name, as used in `protocol-<name>` config sections.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Protocol::Rdp => "rdp",
            Protocol::Ssh => "ssh",
            Protocol::Telnet => "telnet",
            Protocol::Vnc => "vnc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Protocol::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::Error::UnknownProtocol(s.to_string()))
    }
}

/// How the gateway authenticates against the target host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    #[default]
    None,
    Password,
    PrivateKey,
}

/// Operating system class of the target host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SysType {
    Windows,
    Linux,
    #[default]
    #[serde(other)]
    Other,
}
