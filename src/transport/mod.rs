//! Tokio-based UDP transport for the relay server.
//!
//! This module exposes the server-facing types:
//! - `Listener` for the socket-owning muxer loop.
//! - `ServerState` holding the connection/room registries.
//! - The operator command channel.
//!
//! Protocol details (framing, reliability, fan-out) are delegated to
//! the `protocol`, `session` and `room` modules; the transport layer
//! handles the actual UDP socket and multiplexes every event source
//! onto one loop.

pub mod handler;
pub mod listener;
pub mod operator;

pub use handler::ServerState;
pub use listener::Listener;
pub use operator::OperatorCommand;
