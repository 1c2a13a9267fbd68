// Shared domain types for the hausnet stack
//
// INTENTION:
// Keep the participant identifier and its canonical pair in one place so the
// keys, session, and node crates all agree on validation and ordering rules.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error raised when a host identifier fails validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostIdError {
    #[error("host id must not be empty")]
    Empty,
    #[error("host id '{0}' contains characters outside [A-Za-z0-9_.-]")]
    InvalidCharacters(String),
}

/// Validated identifier of a network participant.
///
/// The reserved alias [`HostId::SERVER_ALIAS`] means "the logical server,
/// whoever that resolves to for me" and must be resolved to a concrete host
/// before any cryptographic operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostId(String);

impl HostId {
    /// The reserved logical-server alias.
    pub const SERVER_ALIAS: &'static str = "server";

    /// Create a validated host id. Allowed characters: `[A-Za-z0-9_.-]`.
    pub fn new(value: impl Into<String>) -> Result<Self, HostIdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(HostIdError::Empty);
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(HostIdError::InvalidCharacters(value));
        }
        Ok(Self(value))
    }

    /// The reserved alias denoting "my logical server".
    pub fn server_alias() -> Self {
        Self(Self::SERVER_ALIAS.to_string())
    }

    /// Whether this id is the unresolved server alias.
    pub fn is_server_alias(&self) -> bool {
        self.0 == Self::SERVER_ALIAS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for HostId {
    type Error = HostIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        HostId::new(value)
    }
}

impl From<HostId> for String {
    fn from(value: HostId) -> Self {
        value.0
    }
}

/// Unordered pair of participating hosts, canonicalized so that
/// `(A, B) == (B, A)`.
///
/// Deserialization re-canonicalizes, so decoded pairs hash and compare the
/// same as locally built ones even when the encoder wrote them swapped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawHostIdPair")]
pub struct HostIdPair {
    first: HostId,
    second: HostId,
}

#[derive(Deserialize)]
struct RawHostIdPair {
    first: HostId,
    second: HostId,
}

impl From<RawHostIdPair> for HostIdPair {
    fn from(raw: RawHostIdPair) -> Self {
        HostIdPair::new(raw.first, raw.second)
    }
}

impl HostIdPair {
    /// Build the canonical pair. Ordering is lexicographic, so the same two
    /// hosts always produce an identical pair regardless of argument order.
    pub fn new(a: HostId, b: HostId) -> Self {
        if a <= b {
            Self {
                first: a,
                second: b,
            }
        } else {
            Self {
                first: b,
                second: a,
            }
        }
    }

    pub fn first(&self) -> &HostId {
        &self.first
    }

    pub fn second(&self) -> &HostId {
        &self.second
    }

    /// Whether the given host is one of the two participants.
    pub fn contains(&self, host: &HostId) -> bool {
        &self.first == host || &self.second == host
    }

    /// The counterpart of the given host in this pair, if the host is a
    /// member at all.
    pub fn other(&self, host: &HostId) -> Option<&HostId> {
        if &self.first == host {
            Some(&self.second)
        } else if &self.second == host {
            Some(&self.first)
        } else {
            None
        }
    }
}

impl fmt::Display for HostIdPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.first, self.second)
    }
}
