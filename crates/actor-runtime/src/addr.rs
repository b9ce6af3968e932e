//! # Typed Actor Addresses
//!
//! An address has the text form `name(host:port)`, where `host` is an IPv4
//! dotted quad or DNS label and `port` is decimal. The reserved address
//! `__none__` parses and displays but is never delivered to.
//!
//! ## Usage
//!
//! ```rust
//! use actor_runtime::ActorAddr;
//!
//! let addr: ActorAddr = "master(10.0.0.1:5050)".parse().unwrap();
//! assert_eq!(addr.name(), "master");
//! assert_eq!(addr.port(), 5050);
//! assert_eq!(addr.to_string(), "master(10.0.0.1:5050)");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The reserved "nowhere" address.
pub const NONE: &str = "__none__";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddrParseError {
    #[error("address '{0}' is not of the form name(host:port)")]
    Malformed(String),
    #[error("address '{0}' has an empty name")]
    EmptyName(String),
    #[error("address '{0}' has an invalid port")]
    InvalidPort(String),
}

/// A typed actor address: `name(host:port)`.
///
/// Addresses are handed out by value; holding one never keeps the addressed
/// actor alive. Peer death arrives as an `EXITED` message, so there are no
/// dangling references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActorAddr {
    name: String,
    host: String,
    port: u16,
}

impl ActorAddr {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    /// The reserved address that is never delivered to.
    pub fn none() -> Self {
        Self {
            name: NONE.to_string(),
            host: String::new(),
            port: 0,
        }
    }

    pub fn is_none(&self) -> bool {
        self.name == NONE
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// True when both addresses point at the same process.
    pub fn same_peer(&self, other: &ActorAddr) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl fmt::Display for ActorAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "{NONE}");
        }
        write!(f, "{}({}:{})", self.name, self.host, self.port)
    }
}

impl FromStr for ActorAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == NONE {
            return Ok(ActorAddr::none());
        }
        let open = s
            .find('(')
            .ok_or_else(|| AddrParseError::Malformed(s.to_string()))?;
        if !s.ends_with(')') {
            return Err(AddrParseError::Malformed(s.to_string()));
        }
        let name = &s[..open];
        if name.is_empty() {
            return Err(AddrParseError::EmptyName(s.to_string()));
        }
        let hostport = &s[open + 1..s.len() - 1];
        let colon = hostport
            .rfind(':')
            .ok_or_else(|| AddrParseError::Malformed(s.to_string()))?;
        let host = &hostport[..colon];
        if host.is_empty() {
            return Err(AddrParseError::Malformed(s.to_string()));
        }
        let port = hostport[colon + 1..]
            .parse::<u16>()
            .map_err(|_| AddrParseError::InvalidPort(s.to_string()))?;
        Ok(ActorAddr::new(name, host, port))
    }
}

impl TryFrom<String> for ActorAddr {
    type Error = AddrParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ActorAddr> for String {
    fn from(addr: ActorAddr) -> String {
        addr.to_string()
    }
}
