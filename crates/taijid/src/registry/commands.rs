//! Registry actor commands, errors, and events.
//!
//! This module defines the message types exchanged with the `RegistryActor`:
//! - `RegistryCommand`: requests sent to the actor by sessions
//! - `ClientEvent`: messages the actor (or a session itself) pushes into a
//!   client session's private inbox
//! - `RegistryEvent`: lifecycle notifications published to observers
//! - `RegistryError`: errors seen by callers of the handle
//!
//! All types are designed for async message passing and follow the panic-free policy.

use std::fmt;

use taiji_core::{ClientId, ConnectionId};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Commands that expect an answer embed a oneshot channel; the sender
/// awaits it while the actor processes commands strictly one at a time.
///
/// # Usage
///
/// ```ignore
/// let (tx, rx) = oneshot::channel();
/// registry_tx.send(RegistryCommand::SendTo {
///     client_id: id,
///     text: "\"hi\"".to_string(),
///     respond_to: tx,
/// }).await?;
/// let found = rx.await?;
/// ```
#[derive(Debug)]
pub enum RegistryCommand {
    /// Register a client inbox under an id.
    ///
    /// Fire-and-forget. An existing entry for the same id is replaced.
    Register {
        /// Id from the client's handshake
        client_id: ClientId,
        /// Connection that owns this registration
        connection: ConnectionId,
        /// The session's private inbox
        inbox: mpsc::Sender<ClientEvent>,
        /// Cancelled by the actor if it evicts this client
        evict: CancellationToken,
    },

    /// Remove a client registration.
    ///
    /// Fire-and-forget. Removes whatever entry `client_id` has, even one
    /// made by a newer connection; a no-op if there is none.
    Unregister {
        /// Id to remove
        client_id: ClientId,
        /// Connection asking for the removal, for logging
        connection: ConnectionId,
    },

    /// Snapshot of every registered id, in no particular order.
    ListAll {
        /// Channel to send the result
        respond_to: oneshot::Sender<Vec<ClientId>>,
    },

    /// Deliver a message to every registered client.
    ///
    /// Answered after delivery was attempted for all of them.
    Broadcast {
        /// Payload written after `BROADCAST `
        text: String,
        /// Channel to send the delivery report
        respond_to: oneshot::Sender<DeliveryReport>,
    },

    /// Deliver a message to one client.
    ///
    /// Answers `false` without side effects if the id is not registered.
    SendTo {
        /// Target client
        client_id: ClientId,
        /// Payload written after `BROADCAST `
        text: String,
        /// Channel to send whether the id was registered
        respond_to: oneshot::Sender<bool>,
    },
}

// ============================================================================
// Client Events
// ============================================================================

/// Messages drained by a client session's notify loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Delivered message, written as `BROADCAST <text>`.
    Notify(String),

    /// Raw line read from the client, written back byte for byte.
    Echo(Vec<u8>),

    /// The read side is finished; end the session.
    Close,
}

// ============================================================================
// Delivery Report
// ============================================================================

/// Outcome of a broadcast, one count per registered client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Message queued in the client's inbox.
    pub delivered: usize,
    /// Message discarded (inbox full, or session already gone).
    pub dropped: usize,
    /// Client removed for having a full inbox.
    pub evicted: usize,
}

impl DeliveryReport {
    /// Total number of clients delivery was attempted for.
    pub fn attempted(&self) -> usize {
        self.delivered + self.dropped + self.evicted
    }
}

impl fmt::Display for DeliveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} delivered, {} dropped, {} evicted",
            self.delivered, self.dropped, self.evicted
        )
    }
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The command or response channel was closed.
    ///
    /// This indicates the actor has shut down.
    #[error("registry channel closed")]
    ChannelClosed,
}

// ============================================================================
// Registry Events
// ============================================================================

/// Events published by the registry to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A client was registered.
    Registered {
        client_id: ClientId,
        connection: ConnectionId,
        /// Connection whose registration this one replaced, if any
        replaced: Option<ConnectionId>,
    },

    /// A client unregistered itself.
    Unregistered {
        client_id: ClientId,
        connection: ConnectionId,
    },

    /// A client was removed because its inbox was full.
    Evicted {
        client_id: ClientId,
        connection: ConnectionId,
    },
}

impl RegistryEvent {
    /// The client id this event concerns.
    pub fn client_id(&self) -> &ClientId {
        match self {
            Self::Registered { client_id, .. }
            | Self::Unregistered { client_id, .. }
            | Self::Evicted { client_id, .. } => client_id,
        }
    }
}
