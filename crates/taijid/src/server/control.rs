//! Operator console sessions.
//!
//! A console is strictly request/response: prompt, read one line, run the
//! command against the registry, write the reply, flush. Reading EOF,
//! an over-long line or a socket error ends the session. Bytes that are not
//! UTF-8 are replaced with U+FFFD and parsed like any other input.

use std::net::SocketAddr;
use std::time::Duration;

use taiji_core::ConnectionId;
use taiji_protocol::{ControlCommand, ControlReply, CONSOLE_BANNER, PROMPT};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::line::read_line;
use super::SessionError;
use crate::registry::RegistryHandle;

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// What the console loop does after a command.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Session for a single operator console.
pub struct ControlSession {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    peer: SocketAddr,
    connection: ConnectionId,
    registry: RegistryHandle,
    max_line_bytes: usize,
}

impl ControlSession {
    /// Creates a new console session.
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        connection: ConnectionId,
        registry: RegistryHandle,
        max_line_bytes: usize,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            peer,
            connection,
            registry,
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    /// Runs the console until the operator quits or disconnects.
    pub async fn run(mut self) {
        info!(peer = %self.peer, connection = %self.connection, "Console connected");

        match self.serve().await {
            Ok(()) | Err(SessionError::Eof) => {
                info!(peer = %self.peer, connection = %self.connection, "Console closed");
            }
            Err(e) => {
                warn!(peer = %self.peer, connection = %self.connection, error = %e, "Console session ended with error");
            }
        }

        let _ = self.writer.shutdown().await;
    }

    async fn serve(&mut self) -> Result<(), SessionError> {
        self.write(CONSOLE_BANNER).await?;

        let mut line = Vec::new();
        loop {
            self.write(PROMPT).await?;

            if !read_line(&mut self.reader, &mut line, self.max_line_bytes).await? {
                return Err(SessionError::Eof);
            }

            let text = String::from_utf8_lossy(&line);
            if self.execute(&text).await? == Flow::Quit {
                return Ok(());
            }
        }
    }

    /// Runs one console line and writes its reply.
    async fn execute(&mut self, line: &str) -> Result<Flow, SessionError> {
        let command = match line.parse::<ControlCommand>() {
            Ok(command) => command,
            Err(e) => {
                debug!(connection = %self.connection, error = %e, "Rejected console line");
                self.write(&ControlReply::Error(&e).to_string()).await?;
                return Ok(Flow::Continue);
            }
        };

        let mut reply = String::new();
        match command {
            ControlCommand::List => {
                let mut clients = self.registry.list_all().await;
                clients.sort();

                reply.push_str(&ControlReply::ListingHeader.to_string());
                for client_id in &clients {
                    reply.push_str(&ControlReply::ListingEntry(client_id).to_string());
                }
            }
            ControlCommand::Send { client_id, text } => {
                let found = self.registry.send_to(client_id.clone(), text).await?;
                let line = if found {
                    ControlReply::MessageSent
                } else {
                    ControlReply::NotFound(&client_id)
                };
                debug!(connection = %self.connection, client_id = %client_id, found, "Console send");
                reply.push_str(&line.to_string());
            }
            ControlCommand::Broadcast { text } => {
                let report = self.registry.broadcast(text).await?;
                info!(
                    connection = %self.connection,
                    delivered = report.delivered,
                    dropped = report.dropped,
                    evicted = report.evicted,
                    "Console broadcast"
                );
                reply.push_str(&ControlReply::Broadcasted.to_string());
            }
            ControlCommand::Quit => return Ok(Flow::Quit),
        }

        self.write(&reply).await?;
        Ok(Flow::Continue)
    }

    /// Writes and flushes, bounded by [`WRITE_TIMEOUT`].
    async fn write(&mut self, text: &str) -> Result<(), SessionError> {
        let writer = &mut self.writer;
        timeout(WRITE_TIMEOUT, async {
            writer.write_all(text.as_bytes()).await?;
            writer.flush().await
        })
        .await
        .map_err(|_| SessionError::WriteTimeout)??;
        Ok(())
    }
}
