//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to registry events.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use taiji_core::{ClientId, ConnectionId};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::commands::{ClientEvent, DeliveryReport, RegistryCommand, RegistryError, RegistryEvent};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// Every session holds a clone. The actor stops once all clones are dropped.
///
/// # Usage
///
/// ```ignore
/// let handle = registry_handle.clone();
///
/// // Deliver to everyone
/// let report = handle.broadcast("\"Hello\"".to_string()).await?;
///
/// // Watch registrations come and go
/// let mut rx = handle.subscribe();
/// while let Ok(event) = rx.recv().await {
///     // Handle event
/// }
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to lifecycle events
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    ///
    /// # Arguments
    ///
    /// * `sender` - The command channel sender for communicating with the actor
    /// * `event_sender` - The broadcast sender for subscribing to events
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Register a client inbox under `client_id`.
    ///
    /// Returns once the command is queued, not once it is applied.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(
        &self,
        client_id: ClientId,
        connection: ConnectionId,
        inbox: mpsc::Sender<ClientEvent>,
        evict: CancellationToken,
    ) -> Result<(), RegistryError> {
        self.sender
            .send(RegistryCommand::Register {
                client_id,
                connection,
                inbox,
                evict,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)
    }

    /// Remove the registration for `client_id`, on behalf of `connection`.
    ///
    /// Fire-and-forget: send errors are ignored (actor may be shutting down).
    pub async fn unregister(&self, client_id: ClientId, connection: ConnectionId) {
        let _ = self
            .sender
            .send(RegistryCommand::Unregister {
                client_id,
                connection,
            })
            .await;
    }

    /// Get every registered client id, in no particular order.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn list_all(&self) -> Vec<ClientId> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::ListAll { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Deliver `text` to every registered client.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn broadcast(&self, text: String) -> Result<DeliveryReport, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Broadcast {
                text,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Deliver `text` to the client registered as `client_id`.
    ///
    /// Returns `Ok(false)` if no such client is registered.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn send_to(&self, client_id: ClientId, text: String) -> Result<bool, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::SendTo {
                client_id,
                text,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Subscribe to registry events.
    ///
    /// This is a synchronous operation - it doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the actor is still running.
    ///
    /// Returns `true` if the command channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_handle() -> (RegistryHandle, mpsc::Receiver<RegistryCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = broadcast::channel(16);
        let handle = RegistryHandle::new(cmd_tx, event_tx);
        (handle, cmd_rx)
    }

    #[tokio::test]
    async fn test_handle_is_clone() {
        let (handle, _rx) = create_test_handle();
        let _cloned = handle.clone();
    }

    #[tokio::test]
    async fn test_register_sends_command() {
        let (handle, mut rx) = create_test_handle();
        let (inbox, _inbox_rx) = mpsc::channel(1);

        handle
            .register(
                ClientId::new("abc"),
                ConnectionId::new(3),
                inbox,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        match rx.recv().await {
            Some(RegistryCommand::Register {
                client_id,
                connection,
                ..
            }) => {
                assert_eq!(client_id.as_str(), "abc");
                assert_eq!(connection, ConnectionId::new(3));
            }
            other => panic!("Expected Register, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_channel_closed_error() {
        let (handle, rx) = create_test_handle();
        drop(rx);
        let (inbox, _inbox_rx) = mpsc::channel(1);

        let result = handle
            .register(
                ClientId::new("abc"),
                ConnectionId::new(1),
                inbox,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(result, Err(RegistryError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_unregister_ignores_closed_channel() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        // Should not panic or error
        handle
            .unregister(ClientId::new("abc"), ConnectionId::new(1))
            .await;
    }

    #[tokio::test]
    async fn test_list_all_returns_empty_on_channel_close() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert!(handle.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_send_to_round_trip() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::SendTo {
                client_id,
                text,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(client_id.as_str(), "abc");
                assert_eq!(text, "\"Hello\"");
                let _ = respond_to.send(true);
                return true;
            }
            false
        });

        let found = handle
            .send_to(ClientId::new("abc"), "\"Hello\"".to_string())
            .await;
        assert_eq!(found, Ok(true));
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_broadcast_dropped_reply_is_channel_closed() {
        let (handle, mut rx) = create_test_handle();

        tokio::spawn(async move {
            // Drop the reply channel without answering.
            let _ = rx.recv().await;
        });

        let result = handle.broadcast("\"x\"".to_string()).await;
        assert_eq!(result, Err(RegistryError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_is_connected() {
        let (handle, rx) = create_test_handle();

        assert!(handle.is_connected());

        drop(rx);
        assert!(!handle.is_connected());
    }
}
