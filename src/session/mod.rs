pub mod handshake;
pub mod registry;
pub mod reliability;

pub use registry::ConnectionRegistry;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::protocol::packet::game::ModDeclaration;
use crate::protocol::types::GameCode;
use crate::protocol::ClientVersion;

/// Handshake progress for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing but the datagram source is known.
    New,
    /// A hello arrived and is being evaluated.
    HelloReceived,
    /// Modded hello accepted; waiting for the declared mod list.
    ModsAwaited,
    /// Fully identified.
    Ready,
}

/// One reliable packet we sent and may have to send again.
///
/// Immutable once created except for `acked` and `sent_at`.
#[derive(Debug, Clone)]
pub struct SentPacket {
    pub nonce: u16,
    pub bytes: Bytes,
    pub sent_at: Instant,
    pub acked: bool,
}

/// Server-side state for one client endpoint, keyed by its remote
/// address.
#[derive(Debug)]
pub struct Connection {
    pub addr: SocketAddr,
    pub client_id: i32,
    pub username: String,
    pub language: u32,
    pub client_version: Option<ClientVersion>,
    pub handshake: HandshakeState,
    pub uses_mod_framework: bool,
    pub declared_mod_count: u32,
    mods: BTreeMap<String, ModDeclaration>,
    mod_ids_by_net_id: HashMap<u32, String>,

    // Reliability state. The in-flight deque is newest-first and
    // bounded to SENT_WINDOW entries.
    pub(crate) next_nonce: u16,
    pub(crate) last_seen_nonce: u16,
    pub(crate) received_nonces: VecDeque<u16>,
    pub(crate) in_flight: VecDeque<SentPacket>,
    pub round_trip: Option<Duration>,

    pub room: Option<GameCode>,
    pub disconnect_initiated: bool,
}

impl Connection {
    pub fn new(client_id: i32, addr: SocketAddr) -> Self {
        Self {
            addr,
            client_id,
            username: String::new(),
            language: 0,
            client_version: None,
            handshake: HandshakeState::New,
            uses_mod_framework: false,
            declared_mod_count: 0,
            mods: BTreeMap::new(),
            mod_ids_by_net_id: HashMap::new(),
            next_nonce: 0,
            last_seen_nonce: 0,
            received_nonces: VecDeque::new(),
            in_flight: VecDeque::new(),
            round_trip: None,
            room: None,
            disconnect_initiated: false,
        }
    }

    /// True once the hello exchange (and mod list, when modded) is
    /// done.
    pub fn hello_complete(&self) -> bool {
        self.handshake == HandshakeState::Ready
    }

    /// Records one announced mod, indexed by both its id and its
    /// client-assigned net id. Returns false for duplicates.
    pub fn add_mod(&mut self, decl: ModDeclaration) -> bool {
        if self.mods.contains_key(&decl.id) {
            return false;
        }
        self.mod_ids_by_net_id.insert(decl.net_id, decl.id.clone());
        self.mods.insert(decl.id.clone(), decl);
        true
    }

    pub fn mod_by_id(&self, id: &str) -> Option<&ModDeclaration> {
        self.mods.get(id)
    }

    pub fn mod_by_net_id(&self, net_id: u32) -> Option<&ModDeclaration> {
        self.mod_ids_by_net_id
            .get(&net_id)
            .and_then(|id| self.mods.get(id))
    }

    pub fn mods(&self) -> impl Iterator<Item = &ModDeclaration> {
        self.mods.values()
    }

    pub fn mod_count(&self) -> u32 {
        self.mods.len() as u32
    }

    /// All declared mods have been received.
    pub fn mods_complete(&self) -> bool {
        self.mod_count() >= self.declared_mod_count
    }

    /// Number of tracked in-flight reliable packets.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Short identity string for logs.
    pub fn identity(&self) -> String {
        if self.username.is_empty() {
            format!("#{} ({})", self.client_id, self.addr)
        } else {
            format!("#{} {:?} ({})", self.client_id, self.username, self.addr)
        }
    }
}
