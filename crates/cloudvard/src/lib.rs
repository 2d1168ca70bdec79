//! cloudvar daemon - cloud variable store and WebSocket broadcast server
//!
//! This crate provides the server side of the cloud variable protocol:
//! - `config` - TOML configuration (listener, policy, limits, audit)
//! - `registry` - Actor owning all server state and the live sessions
//! - `dispatch` - Method table and command handlers
//! - `server` - WebSocket listener and per-connection handlers
//! - `audit` - Persistence gateway used to record granted handshakes
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      cloudvard daemon                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   CloudServer   │────▶│       RegistryActor         │   │
//! │  │  (TcpListener)  │     │  Dispatcher + CloudState    │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ connections                 │ replies/broadcast │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ConnectionHandler│◀────│  per-session outbound mpsc  │   │
//! │  │  (per client)   │     │                             │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                         │                   │
//! │                                         ▼ handshakes        │
//! │                          ┌─────────────────────────────┐   │
//! │                          │  PersistenceGateway (JSON)  │   │
//! │                          └─────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod audit;
pub mod config;
pub mod dispatch;
pub mod registry;
pub mod server;
pub mod state;
