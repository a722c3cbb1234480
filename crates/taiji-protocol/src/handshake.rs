//! Push client handshake parsing.
//!
//! A client announces itself with a single line of exactly two
//! whitespace-separated tokens, the first being `HELO` in any case:
//!
//! ```text
//! HELO abc
//! ```

use taiji_core::{ClientId, DomainError};
use thiserror::Error;

/// Handshake keyword, compared after uppercasing.
pub const HELO: &str = "HELO";

/// Reasons a handshake line is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("expected 2 tokens, got {0}")]
    TokenCount(usize),

    #[error("expected HELO keyword, got {0:?}")]
    Keyword(String),

    #[error(transparent)]
    InvalidId(#[from] DomainError),
}

/// Parses a `HELO <id>` line into the client's chosen id.
pub fn parse_helo(line: &str) -> Result<ClientId, HandshakeError> {
    let words: Vec<&str> = line.split_whitespace().collect();

    let (keyword, id) = match words.as_slice() {
        [keyword, id] => (*keyword, *id),
        other => return Err(HandshakeError::TokenCount(other.len())),
    };

    if keyword.to_uppercase() != HELO {
        return Err(HandshakeError::Keyword(keyword.to_string()));
    }

    Ok(ClientId::parse(id)?)
}
