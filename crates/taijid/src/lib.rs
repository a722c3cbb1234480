//! Taiji Daemon - Push-notification broker
//!
//! This crate provides the core infrastructure for the taiji daemon:
//! - `registry` - Client registry actor, the single owner of broker state
//! - `server` - TCP listeners plus push client and operator console sessions
//! - `config` - Layered configuration (defaults, TOML, environment)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       taijid daemon                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   PushServer    │────▶│     RegistryActor           │   │
//! │  │ (2 TCP ports)   │     │  (client registry owner)    │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ connections                 │ ClientEvent       │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ ControlSession  │     │  ClientSession inbox        │   │
//! │  │ (per console)   │     │  (bounded, per client)      │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod registry;
pub mod server;
