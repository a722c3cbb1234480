//! Push client sessions.
//!
//! Each client connection gets its own `ClientSession` that:
//! - Reads the `HELO <id>` handshake line
//! - Registers a private inbox with the registry (fire-and-forget)
//! - Runs a read duty on a spawned task, echoing lines via the inbox
//! - Runs the notify loop on its own task, the only writer on the socket
//!
//! Teardown happens once, in the notify loop: it stops the read duty,
//! waits for it to unregister, then shuts down the socket.

use std::net::SocketAddr;
use std::time::Duration;

use taiji_core::{ClientId, ConnectionId};
use taiji_protocol::{notify_line, parse_helo, HANDSHAKE_TIMED_OUT, INVALID_HELO};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::line::read_line;
use super::SessionError;
use crate::config::Config;
use crate::registry::{ClientEvent, RegistryHandle};

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-session settings derived from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    /// Capacity of the private inbox
    pub inbox_capacity: usize,

    /// Deadline for the handshake line, `None` to wait forever
    pub handshake_timeout: Option<Duration>,

    /// Deadline for each socket write
    pub write_timeout: Duration,

    /// Longest line read from the client, newline included
    pub max_line_bytes: usize,
}

impl From<&Config> for ClientSettings {
    fn from(config: &Config) -> Self {
        Self {
            inbox_capacity: config.inbox_capacity.max(1),
            handshake_timeout: config.handshake_timeout(),
            write_timeout: WRITE_TIMEOUT,
            max_line_bytes: config.max_line_bytes.max(1),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Why a registered session ended.
#[derive(Debug)]
enum Teardown {
    /// Read duty reported EOF or a read error.
    Closed,
    /// Registry evicted the client.
    Evicted,
    /// Writing to the socket failed.
    WriteFailed(SessionError),
}

/// Session for a single push client.
pub struct ClientSession {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    peer: SocketAddr,
    connection: ConnectionId,
    registry: RegistryHandle,
    settings: ClientSettings,
}

impl ClientSession {
    /// Creates a new client session.
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        connection: ConnectionId,
        registry: RegistryHandle,
        settings: ClientSettings,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            peer,
            connection,
            registry,
            settings,
        }
    }

    /// Runs the session until the connection closes.
    pub async fn run(mut self) {
        debug!(peer = %self.peer, connection = %self.connection, "Client connected");

        let handshake = self.handshake().await;
        match handshake {
            Ok(client_id) => self.serve(client_id).await,
            Err(SessionError::Eof) => {
                debug!(peer = %self.peer, "Client closed before handshake");
                let _ = self.writer.shutdown().await;
            }
            Err(e) => {
                warn!(peer = %self.peer, connection = %self.connection, error = %e, "Handshake failed");
                let reply = match e {
                    SessionError::HandshakeTimeout => HANDSHAKE_TIMED_OUT,
                    _ => INVALID_HELO,
                };
                let _ = write_line(&mut self.writer, reply.as_bytes(), self.settings.write_timeout)
                    .await;
                let _ = self.writer.shutdown().await;
            }
        }
    }

    /// Reads and validates the `HELO <id>` line.
    ///
    /// A line cut short by EOF counts as EOF. Invalid UTF-8 is replaced
    /// with U+FFFD before parsing.
    async fn handshake(&mut self) -> Result<ClientId, SessionError> {
        let mut line = Vec::new();

        let read = read_line(&mut self.reader, &mut line, self.settings.max_line_bytes);
        let complete = match self.settings.handshake_timeout {
            Some(limit) => timeout(limit, read)
                .await
                .map_err(|_| SessionError::HandshakeTimeout)??,
            None => read.await?,
        };

        if !complete {
            return Err(SessionError::Eof);
        }

        Ok(parse_helo(&String::from_utf8_lossy(&line))?)
    }

    /// Registers the client and runs both duties until teardown.
    async fn serve(self, client_id: ClientId) {
        let Self {
            reader,
            mut writer,
            peer,
            connection,
            registry,
            settings,
        } = self;

        let (inbox_tx, mut inbox_rx) = mpsc::channel(settings.inbox_capacity);
        let evicted = CancellationToken::new();
        let stop_reading = CancellationToken::new();

        if let Err(e) = registry
            .register(client_id.clone(), connection, inbox_tx.clone(), evicted.clone())
            .await
        {
            warn!(client_id = %client_id, error = %e, "Registration failed");
            let _ = writer.shutdown().await;
            return;
        }

        info!(client_id = %client_id, peer = %peer, connection = %connection, "Client handshake completed");

        let read_duty = tokio::spawn(read_duty(
            reader,
            client_id.clone(),
            connection,
            registry,
            inbox_tx,
            stop_reading.clone(),
            settings.max_line_bytes,
        ));

        let teardown = notify_loop(&mut writer, &mut inbox_rx, &evicted, settings.write_timeout).await;

        drop(inbox_rx);
        stop_reading.cancel();
        let _ = read_duty.await;

        // Only a healthy peer gets a graceful shutdown; a stalled one would
        // block the final flush.
        if matches!(teardown, Teardown::Closed) {
            let _ = timeout(settings.write_timeout, writer.shutdown()).await;
        }
        drop(writer);

        match teardown {
            Teardown::Closed => {
                info!(client_id = %client_id, connection = %connection, "Client disconnected");
            }
            Teardown::Evicted => {
                warn!(client_id = %client_id, connection = %connection, "Client evicted, connection closed");
            }
            Teardown::WriteFailed(e) => {
                warn!(client_id = %client_id, connection = %connection, error = %e, "Client write failed, connection closed");
            }
        }
    }
}

/// Reads lines until EOF, error or `stop`, then unregisters.
///
/// Lines are echoed byte for byte. Every exit path unregisters exactly once.
async fn read_duty(
    mut reader: BufReader<OwnedReadHalf>,
    client_id: ClientId,
    connection: ConnectionId,
    registry: RegistryHandle,
    inbox: mpsc::Sender<ClientEvent>,
    stop: CancellationToken,
    max_line_bytes: usize,
) {
    let mut line = Vec::new();

    loop {
        let result = tokio::select! {
            _ = stop.cancelled() => break,
            result = read_line(&mut reader, &mut line, max_line_bytes) => result,
        };

        match result {
            Ok(false) => {
                debug!(client_id = %client_id, "Client sent EOF");
                push_close(&inbox, &stop).await;
                break;
            }
            Ok(true) => {
                let echo = ClientEvent::Echo(std::mem::take(&mut line));
                tokio::select! {
                    _ = stop.cancelled() => break,
                    sent = inbox.send(echo) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e @ SessionError::LineTooLong { .. }) => {
                warn!(client_id = %client_id, connection = %connection, error = %e, "Client line too long, closing");
                push_close(&inbox, &stop).await;
                break;
            }
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "Client read failed");
                push_close(&inbox, &stop).await;
                break;
            }
        }
    }

    registry.unregister(client_id, connection).await;
}

/// Queues `Close` behind any pending events, unless teardown already began.
async fn push_close(inbox: &mpsc::Sender<ClientEvent>, stop: &CancellationToken) {
    tokio::select! {
        _ = stop.cancelled() => {}
        _ = inbox.send(ClientEvent::Close) => {}
    }
}

/// Drains the inbox onto the socket until told to stop.
async fn notify_loop(
    writer: &mut BufWriter<OwnedWriteHalf>,
    inbox: &mut mpsc::Receiver<ClientEvent>,
    evicted: &CancellationToken,
    write_timeout: Duration,
) -> Teardown {
    loop {
        let event = tokio::select! {
            _ = evicted.cancelled() => return Teardown::Evicted,
            event = inbox.recv() => event,
        };

        let line = match event {
            Some(ClientEvent::Notify(text)) => notify_line(&text).into_bytes(),
            Some(ClientEvent::Echo(line)) => line,
            Some(ClientEvent::Close) | None => return Teardown::Closed,
        };

        // A stalled write must not delay eviction.
        tokio::select! {
            _ = evicted.cancelled() => return Teardown::Evicted,
            written = write_line(writer, &line, write_timeout) => {
                if let Err(e) = written {
                    return Teardown::WriteFailed(e);
                }
            }
        }
    }
}

/// Writes and flushes one line, bounded by `limit`.
async fn write_line(
    writer: &mut BufWriter<OwnedWriteHalf>,
    line: &[u8],
    limit: Duration,
) -> Result<(), SessionError> {
    match timeout(limit, async {
        writer.write_all(line).await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Io(e.to_string())),
        Err(_) => Err(SessionError::WriteTimeout),
    }
}
