pub mod perspective;
pub mod registry;
pub mod relay;

pub use perspective::{MessageFilter, Perspective};
pub use registry::RoomRegistry;

use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use tracing::debug;

use crate::protocol::constants::{PLAYER_TRANSFORM_SLOT, SPAWN_TYPE_PLAYER};
use crate::protocol::packet::gamedata::Spawn;
use crate::protocol::packet::{GameDataMessage, GameSettings};
use crate::protocol::types::GameCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    NotStarted,
    Started,
    Ended,
    Destroyed,
}

/// Effect of removing a member, for the caller to fan out.
#[derive(Debug, Default)]
pub struct MemberRemoval {
    pub was_member: bool,
    /// Newly elected host, when the departing member held the role.
    pub new_host: Option<i32>,
    pub now_empty: bool,
}

/// One game session. The room holds member back-references only;
/// connections are owned by the connection registry.
#[derive(Debug)]
pub struct Room {
    pub code: GameCode,
    pub created_at: Instant,
    pub state: RoomState,
    pub settings: GameSettings,
    pub host_id: Option<i32>,
    pub members: BTreeMap<i32, SocketAddr>,
    pub bans: HashSet<IpAddr>,
    pub perspectives: Vec<Perspective>,
    /// Whether the room shows up in public listings.
    pub public: bool,
    /// Net ids whose Data updates are movement and travel
    /// unreliably. Learned from player-prefab spawns.
    movement_net_ids: HashSet<u32>,
    /// Set while the room has no members; drives the empty sweep.
    pub empty_since: Option<Instant>,
}

impl Room {
    pub fn new(code: GameCode, settings: GameSettings, now: Instant) -> Self {
        Self {
            code,
            created_at: now,
            state: RoomState::NotStarted,
            settings,
            host_id: None,
            members: BTreeMap::new(),
            bans: HashSet::new(),
            perspectives: Vec::new(),
            public: false,
            movement_net_ids: HashSet::new(),
            empty_since: Some(now),
        }
    }

    pub fn age_seconds(&self, now: Instant) -> u32 {
        now.duration_since(self.created_at).as_secs() as u32
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        self.bans.contains(&ip)
    }

    /// Inserts a member, designating it host if the room has none.
    pub fn add_member(&mut self, client_id: i32, addr: SocketAddr) {
        self.members.insert(client_id, addr);
        self.empty_since = None;
        if self.host_id.is_none() {
            self.host_id = Some(client_id);
            debug!(code = %self.code, client_id, "designated host");
        }
    }

    /// Removes a member, re-electing the host deterministically
    /// (lowest remaining client id) when the host left.
    pub fn remove_member(&mut self, client_id: i32, now: Instant) -> MemberRemoval {
        if self.members.remove(&client_id).is_none() {
            return MemberRemoval::default();
        }
        let mut removal = MemberRemoval {
            was_member: true,
            ..MemberRemoval::default()
        };
        for perspective in &mut self.perspectives {
            perspective.players.remove(&client_id);
        }
        if self.host_id == Some(client_id) {
            self.host_id = self.members.keys().next().copied();
            removal.new_host = self.host_id;
        }
        if self.members.is_empty() {
            self.empty_since = Some(now);
            removal.now_empty = true;
        }
        removal
    }

    pub fn is_host(&self, client_id: i32) -> bool {
        self.host_id == Some(client_id)
    }

    /// The perspective a member currently views the room through.
    pub fn perspective_of(&self, client_id: i32) -> Option<usize> {
        self.perspectives
            .iter()
            .position(|perspective| perspective.players.contains(&client_id))
    }

    /// Members that are not inside any perspective and therefore
    /// receive base-room broadcasts directly.
    pub fn direct_members(&self) -> impl Iterator<Item = (i32, SocketAddr)> + '_ {
        self.members
            .iter()
            .filter(|(id, _)| self.perspective_of(**id).is_none())
            .map(|(id, addr)| (*id, *addr))
    }

    /// Tracks component net ids from a player spawn so later Data
    /// updates for the transform can be routed unreliably.
    pub fn observe_spawn(&mut self, spawn: &Spawn) {
        if spawn.spawn_type != SPAWN_TYPE_PLAYER {
            return;
        }
        if let Some(transform) = spawn.components.get(PLAYER_TRANSFORM_SLOT) {
            self.movement_net_ids.insert(transform.net_id);
        }
    }

    pub fn forget_net_id(&mut self, net_id: u32) {
        self.movement_net_ids.remove(&net_id);
    }

    /// A frame whose sole child is a Data update for a movement net
    /// object must not retransmit.
    pub fn is_movement_frame(&self, children: &[GameDataMessage]) -> bool {
        match children {
            [GameDataMessage::Data(data)] => self.movement_net_ids.contains(&data.net_id),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::SpawnFlags;
    use crate::protocol::packet::gamedata::{Data, SpawnComponent};
    use bytes::Bytes;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn room() -> Room {
        Room::new(
            "ABCD".parse().unwrap(),
            GameSettings::new(10, 0, 0, 2),
            Instant::now(),
        )
    }

    #[test]
    fn first_member_becomes_host() {
        let mut r = room();
        r.add_member(4, addr(1));
        r.add_member(7, addr(2));
        assert_eq!(r.host_id, Some(4));
    }

    #[test]
    fn host_reelection_lowest_id() {
        let mut r = room();
        r.add_member(4, addr(1));
        r.add_member(9, addr(2));
        r.add_member(7, addr(3));
        let removal = r.remove_member(4, Instant::now());
        assert!(removal.was_member);
        assert_eq!(removal.new_host, Some(7));
        assert_eq!(r.host_id, Some(7));
    }

    #[test]
    fn host_invariant_holds_until_empty() {
        let mut r = room();
        r.add_member(1, addr(1));
        r.add_member(2, addr(2));
        r.remove_member(1, Instant::now());
        assert!(r.host_id.map(|h| r.members.contains_key(&h)).unwrap_or(false));
        let removal = r.remove_member(2, Instant::now());
        assert!(removal.now_empty);
        assert_eq!(r.host_id, None);
        assert!(r.empty_since.is_some());
    }

    #[test]
    fn non_member_removal_is_noop() {
        let mut r = room();
        r.add_member(1, addr(1));
        let removal = r.remove_member(99, Instant::now());
        assert!(!removal.was_member);
        assert_eq!(r.members.len(), 1);
    }

    #[test]
    fn player_spawn_registers_transform() {
        let mut r = room();
        let spawn = Spawn {
            spawn_type: SPAWN_TYPE_PLAYER,
            owner: 4,
            flags: SpawnFlags::CLIENT_CHARACTER,
            components: vec![
                SpawnComponent {
                    net_id: 20,
                    tag: 1,
                    data: Bytes::new(),
                },
                SpawnComponent {
                    net_id: 21,
                    tag: 1,
                    data: Bytes::new(),
                },
                SpawnComponent {
                    net_id: 22,
                    tag: 1,
                    data: Bytes::new(),
                },
            ],
        };
        r.observe_spawn(&spawn);

        let movement = vec![GameDataMessage::Data(Data {
            net_id: 22,
            payload: Bytes::new(),
        })];
        assert!(r.is_movement_frame(&movement));

        let control = vec![GameDataMessage::Data(Data {
            net_id: 20,
            payload: Bytes::new(),
        })];
        assert!(!r.is_movement_frame(&control));

        // Anything but a lone Data child stays reliable.
        let mixed = vec![
            GameDataMessage::Data(Data {
                net_id: 22,
                payload: Bytes::new(),
            }),
            GameDataMessage::Despawn(crate::protocol::packet::gamedata::Despawn { net_id: 5 }),
        ];
        assert!(!r.is_movement_frame(&mixed));
    }
}
