//! Taiji Protocol - Line-oriented text protocol
//!
//! This crate provides parsing and rendering for both sides of the broker:
//! - `handshake` - the `HELO <id>` line a push client sends on connect
//! - `lexer` - tokenizer for operator console lines
//! - `command` - console command parsing (`l`, `s`, `b`, `q`)
//! - `message` - every line the broker writes back

pub mod command;
pub mod handshake;
pub mod lexer;
pub mod message;

pub use command::{CommandError, ControlCommand};
pub use handshake::{parse_helo, HandshakeError};
pub use lexer::{Lexer, Token};
pub use message::{notify_line, ControlReply, CONSOLE_BANNER, HANDSHAKE_TIMED_OUT, INVALID_HELO, PROMPT};
