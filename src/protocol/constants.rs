use bitflags::bitflags;
use std::time::Duration;

/// Root packet tags (first byte of every datagram).
pub const TAG_UNRELIABLE: u8 = 0x00;
pub const TAG_RELIABLE: u8 = 0x01;
pub const TAG_HELLO: u8 = 0x08;
pub const TAG_DISCONNECT: u8 = 0x09;
pub const TAG_ACK: u8 = 0x0a;
pub const TAG_PING: u8 = 0x0c;

/// Hazel handshake version byte carried in Hello.
pub const HAZEL_VERSION: u8 = 1;

/// Interval of the process-wide reliability/keepalive ticker.
pub const RELIABILITY_TICK: Duration = Duration::from_millis(2000);

/// Age after which an unacked reliable packet is retransmitted.
pub const RESEND_AFTER: Duration = Duration::from_millis(500);

/// Bound of the per-connection in-flight deque. A connection with
/// this many consecutive unacked packets is declared dead.
pub const SENT_WINDOW: usize = 8;

/// Bound of the per-connection received-nonce deque used for
/// duplicate suppression and the ack missing-mask.
pub const RECEIVED_WINDOW: usize = 8;

/// Maximum plugin declarations mirrored per reliable packet during
/// the modded handshake.
pub const HANDSHAKE_PLUGIN_CHUNK: usize = 4;

/// Maximum entries returned from a game listing request.
pub const GAME_LIST_CAP: usize = 10;

/// Rpc call id carrying chat text.
pub const RPC_SEND_CHAT: u8 = 13;

/// Spawn type of the player prefab. Its third component is the
/// network transform whose Data updates travel unreliably.
pub const SPAWN_TYPE_PLAYER: u32 = 4;

/// Component slot of the network transform inside the player prefab.
pub const PLAYER_TRANSFORM_SLOT: usize = 2;

bitflags! {
    /// Flag byte of a Spawn game-data child.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct SpawnFlags: u8 {
        const CLIENT_CHARACTER = 0b0000_0001;
    }
}
