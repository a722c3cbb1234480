//! Registry actor - owns the client registry and processes commands.
//!
//! The RegistryActor is the single owner of client registrations in the
//! system. It receives commands via an mpsc channel, applies them one at a
//! time in arrival order, and publishes lifecycle events via broadcast.
//!
//! # Slow Consumers
//!
//! Every client inbox is bounded. What happens when a delivery finds an
//! inbox full is decided by [`OverflowPolicy`]. Under
//! [`OverflowPolicy::Block`] the actor waits for space *while it is the
//! only task allowed to touch the registry*: one client that stops draining
//! its inbox stalls every broadcast, every targeted send and every
//! registration behind it. The session write timeout bounds how long such
//! a stall can last, but does not remove it.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the crate panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel send failures are logged but don't panic

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use taiji_core::{ClientId, ConnectionId};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::commands::{ClientEvent, DeliveryReport, RegistryCommand, RegistryEvent};

// ============================================================================
// Overflow Policy
// ============================================================================

/// What the actor does when a client's inbox is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Wait for space. Preserves every message but lets one stalled
    /// client stall the whole registry.
    Block,

    /// Discard the message for that client and carry on.
    #[default]
    DropNewest,

    /// Remove the client from the registry and close its session.
    Disconnect,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Block => "block",
            Self::DropNewest => "drop-newest",
            Self::Disconnect => "disconnect",
        };
        f.write_str(name)
    }
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(Self::Block),
            "drop-newest" => Ok(Self::DropNewest),
            "disconnect" => Ok(Self::Disconnect),
            other => Err(format!(
                "unknown overflow policy {other:?} (expected block, drop-newest or disconnect)"
            )),
        }
    }
}

/// Result of pushing one message into one inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Delivered,
    /// Inbox full under `DropNewest`.
    Dropped,
    /// Inbox full under `Disconnect`.
    Overflowed,
    /// Receiver gone; the session is already tearing down.
    Closed,
}

/// Pushes a notification into a client inbox according to `policy`.
async fn deliver(policy: OverflowPolicy, inbox: &mpsc::Sender<ClientEvent>, text: &str) -> Delivery {
    let event = ClientEvent::Notify(text.to_string());

    match policy {
        OverflowPolicy::Block => match inbox.send(event).await {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Closed,
        },
        OverflowPolicy::DropNewest | OverflowPolicy::Disconnect => match inbox.try_send(event) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) if policy == OverflowPolicy::Disconnect => {
                Delivery::Overflowed
            }
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        },
    }
}

// ============================================================================
// Registry Actor
// ============================================================================

/// A live client registration.
#[derive(Debug)]
struct Registration {
    connection: ConnectionId,
    inbox: mpsc::Sender<ClientEvent>,
    evict: CancellationToken,
    registered_at: DateTime<Utc>,
}

/// The registry actor - owns all client registrations.
///
/// # Thread Safety
///
/// The actor runs in a single task and processes commands sequentially.
/// The registry map is never shared; all access goes through commands.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// ClientId → that client's registration
    clients: HashMap<ClientId, Registration>,

    /// Behaviour when a client inbox is full
    policy: OverflowPolicy,

    /// Event publisher for lifecycle observers
    event_publisher: broadcast::Sender<RegistryEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `policy` - Behaviour when a client inbox is full
    /// * `event_publisher` - Broadcast channel for publishing events
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        policy: OverflowPolicy,
        event_publisher: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        Self {
            receiver,
            clients: HashMap::new(),
            policy,
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all handles dropped).
    /// Remaining registrations are discarded without notifying their sessions.
    pub async fn run(mut self) {
        info!(policy = %self.policy, "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!(clients = self.clients.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    async fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                client_id,
                connection,
                inbox,
                evict,
            } => {
                self.handle_register(client_id, connection, inbox, evict);
            }
            RegistryCommand::Unregister {
                client_id,
                connection,
            } => {
                self.handle_unregister(client_id, connection);
            }
            RegistryCommand::ListAll { respond_to } => {
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(self.handle_list_all());
            }
            RegistryCommand::Broadcast { text, respond_to } => {
                let report = self.handle_broadcast(&text).await;
                let _ = respond_to.send(report);
            }
            RegistryCommand::SendTo {
                client_id,
                text,
                respond_to,
            } => {
                let found = self.handle_send_to(&client_id, &text).await;
                let _ = respond_to.send(found);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Inserts or replaces the registration for `client_id`.
    fn handle_register(
        &mut self,
        client_id: ClientId,
        connection: ConnectionId,
        inbox: mpsc::Sender<ClientEvent>,
        evict: CancellationToken,
    ) {
        let registration = Registration {
            connection,
            inbox,
            evict,
            registered_at: Utc::now(),
        };

        let replaced = self
            .clients
            .insert(client_id.clone(), registration)
            .map(|old| old.connection);

        if let Some(old) = replaced {
            warn!(
                client_id = %client_id,
                connection = %connection,
                replaced = %old,
                "Client id re-registered, previous session no longer reachable"
            );
        } else {
            info!(
                client_id = %client_id,
                connection = %connection,
                total_clients = self.clients.len(),
                "Client registered"
            );
        }

        let _ = self.event_publisher.send(RegistryEvent::Registered {
            client_id,
            connection,
            replaced,
        });
    }

    /// Removes whatever registration `client_id` currently has.
    ///
    /// `connection` is the session asking; it only matters for logging. A
    /// displaced session closing removes its replacement too, and the
    /// replacement stays connected but unreachable.
    fn handle_unregister(&mut self, client_id: ClientId, connection: ConnectionId) {
        let Some(reg) = self.clients.remove(&client_id) else {
            debug!(
                client_id = %client_id,
                connection = %connection,
                "Unregister for unknown client, ignoring"
            );
            return;
        };

        if reg.connection != connection {
            warn!(
                client_id = %client_id,
                connection = %connection,
                removed = %reg.connection,
                "Displaced session unregistered the current registration"
            );
        }

        let connected_for = Utc::now() - reg.registered_at;
        info!(
            client_id = %client_id,
            connection = %reg.connection,
            connected_secs = connected_for.num_seconds(),
            total_clients = self.clients.len(),
            "Client unregistered"
        );

        let _ = self.event_publisher.send(RegistryEvent::Unregistered {
            client_id,
            connection: reg.connection,
        });
    }

    fn handle_list_all(&self) -> Vec<ClientId> {
        debug!(clients = self.clients.len(), "Listing all clients");
        self.clients.keys().cloned().collect()
    }

    /// Attempts delivery to every client registered right now.
    async fn handle_broadcast(&mut self, text: &str) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut overflowed = Vec::new();

        for (client_id, reg) in &self.clients {
            match deliver(self.policy, &reg.inbox, text).await {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Dropped => {
                    warn!(client_id = %client_id, "Inbox full, dropping broadcast");
                    report.dropped += 1;
                }
                Delivery::Closed => {
                    debug!(client_id = %client_id, "Inbox closed, session ending");
                    report.dropped += 1;
                }
                Delivery::Overflowed => {
                    overflowed.push(client_id.clone());
                    report.evicted += 1;
                }
            }
        }

        for client_id in overflowed {
            self.evict(client_id);
        }

        info!(text = %text, report = %report, "Broadcast complete");
        report
    }

    /// Attempts delivery to one client; `false` if it is not registered.
    async fn handle_send_to(&mut self, client_id: &ClientId, text: &str) -> bool {
        let Some(reg) = self.clients.get(client_id) else {
            debug!(client_id = %client_id, "Send to unknown client");
            return false;
        };

        match deliver(self.policy, &reg.inbox, text).await {
            Delivery::Delivered => {
                info!(client_id = %client_id, text = %text, "Message sent");
            }
            Delivery::Dropped => {
                warn!(client_id = %client_id, "Inbox full, dropping message");
            }
            Delivery::Closed => {
                debug!(client_id = %client_id, "Inbox closed, session ending");
            }
            Delivery::Overflowed => self.evict(client_id.clone()),
        }

        true
    }

    /// Removes a client whose inbox overflowed and tells its session to close.
    fn evict(&mut self, client_id: ClientId) {
        if let Some(reg) = self.clients.remove(&client_id) {
            reg.evict.cancel();
            warn!(
                client_id = %client_id,
                connection = %reg.connection,
                total_clients = self.clients.len(),
                "Inbox full, disconnecting slow client"
            );

            let _ = self.event_publisher.send(RegistryEvent::Evicted {
                client_id,
                connection: reg.connection,
            });
        }
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    /// Returns the number of clients currently registered.
    #[cfg(test)]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    #[cfg(test)]
    fn connection_of(&self, client_id: &str) -> Option<ConnectionId> {
        self.clients
            .get(&ClientId::new(client_id))
            .map(|reg| reg.connection)
    }
}
