//! Taiji Core - Shared types for the push broker
//!
//! This crate provides the domain identifiers shared between the
//! wire protocol (`taiji-protocol`) and the broker daemon (`taijid`).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod id;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use id::{ClientId, ConnectionId};
