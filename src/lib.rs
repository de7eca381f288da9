//! hazeld: a dedicated lobby/relay server for Hazel-style UDP game
//! clients.
//!
//! The server relays gameplay traffic between the clients of a room,
//! maintains room membership, negotiates the optional client-mod
//! handshake, and provides a reliability layer (nonce/ack,
//! retransmission, keepalive) on top of UDP. It is not authoritative
//! over the game simulation; one client per room is the host and the
//! server enforces a small set of host-only rules.

pub mod chat;
pub mod config;
pub mod error;
pub mod hooks;
pub mod protocol;
pub mod room;
pub mod session;
pub mod transport;

pub use error::ServerError;
