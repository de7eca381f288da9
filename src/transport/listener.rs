//! UDP muxer loop.
//!
//! One task owns the socket and the whole server state. Inbound
//! datagrams, operator commands and the reliability tick all
//! serialize here; a handler that blocks stalls the server, which is
//! the accepted cost of the lock-free state.

use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ServerError;
use crate::protocol::constants::RELIABILITY_TICK;
use crate::room::relay::Outbound;

use super::handler::{handle_datagram, handle_tick, ServerState};
use super::operator::{execute, OperatorCommand};

const RECV_BUFFER_SIZE: usize = 65536;

/// Server-side listener owning the socket and state.
pub struct Listener {
    socket: UdpSocket,
    state: ServerState,
    operator_rx: mpsc::Receiver<OperatorCommand>,
}

impl Listener {
    /// Binds to the configured port. The returned sender feeds the
    /// operator channel.
    pub async fn bind(config: Config) -> Result<(Self, mpsc::Sender<OperatorCommand>), ServerError> {
        let addr: SocketAddr = ([0, 0, 0, 0], config.socket.port).into();
        let socket = UdpSocket::bind(addr).await.map_err(ServerError::Bind)?;
        let local = socket.local_addr().map_err(ServerError::Bind)?;
        info!(addr = %local, "listening");

        let (operator_tx, operator_rx) = mpsc::channel(32);
        Ok((
            Self {
                socket,
                state: ServerState::new(config),
                operator_rx,
            },
            operator_tx,
        ))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn state_mut(&mut self) -> &mut ServerState {
        &mut self.state
    }

    async fn flush(&self, outbound: Vec<Outbound>) {
        for packet in outbound {
            if let Err(err) = self.socket.send_to(&packet.bytes, packet.addr).await {
                // Transient send failure: drop this packet only.
                warn!(addr = %packet.addr, %err, "send failed");
            }
        }
    }

    /// Runs the muxer loop until the operator channel closes.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut tick = tokio::time::interval(RELIABILITY_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                res = self.socket.recv_from(&mut buf) => {
                    match res {
                        Ok((len, peer)) => {
                            let out = handle_datagram(
                                &mut self.state,
                                peer,
                                &buf[..len],
                                Instant::now(),
                            );
                            self.flush(out).await;
                        }
                        Err(err) if err.kind() == io::ErrorKind::ConnectionReset => {
                            // ICMP port unreachable - ignore
                            continue;
                        }
                        Err(err) => {
                            warn!(%err, "UDP socket error");
                            return Err(ServerError::Socket(err));
                        }
                    }
                }

                cmd = self.operator_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            debug!(?cmd, "operator command");
                            let (out, report) = execute(&mut self.state, cmd, Instant::now());
                            for line in report {
                                println!("{line}");
                            }
                            self.flush(out).await;
                        }
                        None => {
                            info!("operator channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = tick.tick() => {
                    let out = handle_tick(&mut self.state, Instant::now());
                    self.flush(out).await;
                }
            }
        }
        Ok(())
    }
}
