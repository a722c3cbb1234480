//! Type-safe identifiers for clients and connections.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

// ============================================================================
// Client Identifier
// ============================================================================

/// Identifier a client chooses for itself in its `HELO` line.
///
/// Opaque to the broker. Uniqueness is only "last registration wins":
/// a second client registering the same id replaces the first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Creates a ClientId without validation.
    ///
    /// Used where the value is already known to be a single token
    /// (e.g. lexed from a control command).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a ClientId, rejecting empty values and values containing
    /// whitespace (neither could have come from a well-formed `HELO` line).
    pub fn parse(id: &str) -> DomainResult<Self> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidClientId {
                value: id.to_string(),
                reason: "empty",
            });
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidClientId {
                value: id.to_string(),
                reason: "contains whitespace",
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Connection Identifier
// ============================================================================

/// Number assigned by a listener to each accepted connection.
///
/// Tags registrations and lifecycle events so that sessions sharing a
/// client id can be told apart in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
