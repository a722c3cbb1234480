//! TCP listeners for the taiji broker.
//!
//! The server:
//! - Binds a client-facing and a control-facing TCP listener
//! - Spawns a ClientSession or ControlSession for each accepted connection
//! - Stops accepting when its CancellationToken is cancelled
//!
//! # Architecture
//!
//! ```text
//!   client port                 control port
//! ┌─────────────┐             ┌─────────────┐
//! │ accept loop │             │ accept loop │
//! └──────┬──────┘             └──────┬──────┘
//!        │ spawn                     │ spawn
//!        ▼                           ▼
//! ┌─────────────┐             ┌──────────────┐
//! │ClientSession│◀──inbox──┐  │ControlSession│
//! └──────┬──────┘          │  └──────┬───────┘
//!        │                 │         │
//!        └────────▶ RegistryHandle ◀─┘
//! ```
//!
//! Cancelling the token does not close sessions that are already running.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and retried after a short backoff

mod client;
mod control;
mod line;

pub use client::{ClientSession, ClientSettings};
pub use control::ControlSession;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taiji_core::ConnectionId;
use taiji_protocol::HandshakeError;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::registry::{RegistryError, RegistryHandle};

/// Pause after a failed accept (e.g. EMFILE) before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Which of the two listeners a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerRole {
    Client,
    Control,
}

impl fmt::Display for ListenerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Control => f.write_str("control"),
        }
    }
}

/// The push broker's pair of listeners.
///
/// Construct with [`PushServer::bind`], then drive with [`PushServer::run`].
pub struct PushServer {
    client_listener: TcpListener,
    control_listener: TcpListener,

    /// Handle to the client registry
    registry: RegistryHandle,

    /// Settings handed to every client session
    client_settings: ClientSettings,

    /// Longest console line accepted
    max_line_bytes: usize,

    /// Cancellation token for stopping the accept loops
    cancel_token: CancellationToken,

    /// Connection counter shared by both listeners
    connection_counter: Arc<AtomicU64>,
}

impl PushServer {
    /// Binds both listeners.
    ///
    /// Fails fast if either port cannot be bound.
    pub async fn bind(
        config: &Config,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let client_listener = bind_listener(ListenerRole::Client, config.client_addr()).await?;
        let control_listener = bind_listener(ListenerRole::Control, config.control_addr()).await?;

        Ok(Self {
            client_listener,
            control_listener,
            registry,
            client_settings: ClientSettings::from(config),
            max_line_bytes: config.max_line_bytes,
            cancel_token,
            connection_counter: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Address the client listener is bound to.
    pub fn client_addr(&self) -> Result<SocketAddr, ServerError> {
        local_addr(ListenerRole::Client, &self.client_listener)
    }

    /// Address the control listener is bound to.
    pub fn control_addr(&self) -> Result<SocketAddr, ServerError> {
        local_addr(ListenerRole::Control, &self.control_listener)
    }

    /// Runs both accept loops until the cancellation token is triggered.
    pub async fn run(self) {
        let Self {
            client_listener,
            control_listener,
            registry,
            client_settings,
            max_line_bytes,
            cancel_token,
            connection_counter,
        } = self;

        let client_registry = registry.clone();
        let clients = accept_loop(
            ListenerRole::Client,
            client_listener,
            cancel_token.clone(),
            Arc::clone(&connection_counter),
            move |stream, peer, connection| {
                let session = ClientSession::new(
                    stream,
                    peer,
                    connection,
                    client_registry.clone(),
                    client_settings,
                );
                tokio::spawn(session.run());
            },
        );

        let controls = accept_loop(
            ListenerRole::Control,
            control_listener,
            cancel_token,
            connection_counter,
            move |stream, peer, connection| {
                let session =
                    ControlSession::new(stream, peer, connection, registry.clone(), max_line_bytes);
                tokio::spawn(session.run());
            },
        );

        tokio::join!(clients, controls);
        info!("Server stopped accepting connections");
    }
}

async fn bind_listener(role: ListenerRole, addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!(role = %role, addr = %addr, error = %e, "Failed to bind listener");
        ServerError::Bind {
            role,
            addr,
            error: e.to_string(),
        }
    })?;

    let bound = local_addr(role, &listener)?;
    info!(role = %role, addr = %bound, "Listening");
    Ok(listener)
}

fn local_addr(role: ListenerRole, listener: &TcpListener) -> Result<SocketAddr, ServerError> {
    listener.local_addr().map_err(|e| ServerError::LocalAddr {
        role,
        error: e.to_string(),
    })
}

/// Accepts connections until cancelled, handing each to `on_accept`.
async fn accept_loop<F>(
    role: ListenerRole,
    listener: TcpListener,
    cancel_token: CancellationToken,
    counter: Arc<AtomicU64>,
    mut on_accept: F,
) where
    F: FnMut(TcpStream, SocketAddr, ConnectionId),
{
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!(role = %role, "Accept loop shutting down");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let connection = ConnectionId::new(counter.fetch_add(1, Ordering::Relaxed));
                        debug!(role = %role, peer = %peer, connection = %connection, "Accepted connection");
                        on_accept(stream, peer, connection);
                    }
                    Err(e) => {
                        error!(role = %role, error = %e, "Failed to accept connection");
                        if !backoff_after_accept_error(&cancel_token).await {
                            debug!(role = %role, "Accept loop shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Waits out [`ACCEPT_ERROR_BACKOFF`]. Returns `false` if cancelled first.
async fn backoff_after_accept_error(cancel_token: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel_token.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => true,
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {role} listener on {addr}: {error}")]
    Bind {
        role: ListenerRole,
        addr: SocketAddr,
        error: String,
    },

    #[error("Failed to read {role} listener address: {error}")]
    LocalAddr { role: ListenerRole, error: String },
}

/// Errors that end a single session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid handshake: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Line exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("Connection closed")]
    Eof,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
