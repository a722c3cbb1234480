//! Client registry using Actor pattern.
//!
//! The registry is the single serialization point of the broker. It owns
//! the mapping from client id to that client's inbox, receives commands
//! via a tokio mpsc channel, and applies them one at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ Client/Control  │────▶│  RegistryActor  │────▶│  Client inboxes │
//! │    sessions     │     │                 │     │  (bounded mpsc) │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!         │                       │                       │
//!         │   RegistryCommand     │   ClientEvent         │
//!         │   (mpsc channel)      │   (per client)        │
//!         ▼                       ▼                       ▼
//!  Register/Unregister/    HashMap<ClientId,        Notify loop writes
//!  ListAll/Broadcast/SendTo  Registration>          to the socket
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;

pub use actor::{OverflowPolicy, RegistryActor};
pub use commands::{ClientEvent, DeliveryReport, RegistryCommand, RegistryError, RegistryEvent};
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Spawn the registry actor and return a handle for interaction.
///
/// The actor runs until every clone of the returned handle is dropped.
///
/// # Example
///
/// ```no_run
/// use taijid::registry::{spawn_registry, OverflowPolicy};
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry(OverflowPolicy::DropNewest);
///
///     let clients = handle.list_all().await;
///     assert!(clients.is_empty());
/// }
/// ```
pub fn spawn_registry(policy: OverflowPolicy) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, policy, event_tx.clone());
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
