use std::io;
use thiserror::Error;

/// Errors that stop the server, as opposed to per-packet failures
/// the muxer loop logs and survives.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Binding the UDP socket failed at startup.
    #[error("Failed to bind the UDP socket: {0}")]
    Bind(io::Error),

    /// The socket failed in a way the loop cannot recover from.
    #[error("Socket failure: {0}")]
    Socket(io::Error),
}
