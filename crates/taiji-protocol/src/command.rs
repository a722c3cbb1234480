//! Operator console commands.
//!
//! One command per line, dispatched on the leading identifier:
//!
//! | Line                | Command                                  |
//! |---------------------|------------------------------------------|
//! | `l`                 | list registered clients                  |
//! | `s <id> "<text>"`   | send `"<text>"` to one client            |
//! | `b "<text>"`        | broadcast `"<text>"` to every client     |
//! | `q`                 | close the console                        |
//!
//! Trailing tokens after a complete command are ignored.

use std::str::FromStr;

use taiji_core::ClientId;
use thiserror::Error;

use crate::lexer::{Lexer, Token};

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// List every registered client id.
    List,

    /// Deliver a message to a single client.
    Send {
        client_id: ClientId,
        /// Quoted payload, quotes included.
        text: String,
    },

    /// Deliver a message to every registered client.
    Broadcast {
        /// Quoted payload, quotes included.
        text: String,
    },

    /// End the console session.
    Quit,
}

/// Console line that could not be turned into a command.
///
/// The `Display` form is the exact reply line (without newline) the
/// console writes back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("s <client id> <\"string to send\">")]
    SendUsage,

    #[error("b <\"string to broadcast\">")]
    BroadcastUsage,

    #[error("Unrecognized command {0}")]
    Unrecognized(String),

    #[error("<cmd> [args]")]
    MissingCommand,
}

impl FromStr for ControlCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = Lexer::new(line);

        let name = match tokens.next() {
            Some(Token::Ident(name)) => name,
            _ => return Err(CommandError::MissingCommand),
        };

        match name {
            "l" => Ok(Self::List),
            "s" => {
                let client_id = match tokens.next() {
                    Some(Token::Ident(id)) => ClientId::new(id),
                    _ => return Err(CommandError::SendUsage),
                };
                match tokens.next() {
                    Some(Token::Str(text)) => Ok(Self::Send {
                        client_id,
                        text: text.to_string(),
                    }),
                    _ => Err(CommandError::SendUsage),
                }
            }
            "b" => match tokens.next() {
                Some(Token::Str(text)) => Ok(Self::Broadcast {
                    text: text.to_string(),
                }),
                _ => Err(CommandError::BroadcastUsage),
            },
            "q" => Ok(Self::Quit),
            _ => Err(CommandError::Unrecognized(
                line.trim_end_matches(['\r', '\n']).to_string(),
            )),
        }
    }
}
