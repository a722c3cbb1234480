//! Lines written by the broker.

use std::fmt;

use taiji_core::ClientId;

use crate::command::CommandError;

// ============================================================================
// Push client
// ============================================================================

/// Sent to a push client whose first line is not a valid handshake.
pub const INVALID_HELO: &str = "Invalid HELO line\n";

/// Sent to a push client that never completed its handshake.
pub const HANDSHAKE_TIMED_OUT: &str = "Handshake timed out\n";

/// Renders a delivered message as written to a push client.
pub fn notify_line(text: &str) -> String {
    format!("BROADCAST {text}\n")
}

// ============================================================================
// Operator console
// ============================================================================

/// Written once when a console connects.
pub const CONSOLE_BANNER: &str = "Welcome to PushServer console.\n";

/// Written before each console command is read.
pub const PROMPT: &str = "> ";

/// Replies written by the operator console, one line each.
///
/// `Display` renders the full line including the trailing newline.
#[derive(Debug, Clone, Copy)]
pub enum ControlReply<'a> {
    ListingHeader,
    ListingEntry(&'a ClientId),
    MessageSent,
    NotFound(&'a ClientId),
    Broadcasted,
    Error(&'a CommandError),
}

impl fmt::Display for ControlReply<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListingHeader => writeln!(f, "Listing clients:"),
            Self::ListingEntry(id) => writeln!(f, "    {id}"),
            Self::MessageSent => writeln!(f, "Message sent."),
            Self::NotFound(id) => writeln!(f, "Can't find {id}"),
            Self::Broadcasted => writeln!(f, "Message broadcasted."),
            Self::Error(err) => writeln!(f, "{err}"),
        }
    }
}
