//! Message fan-out within a room.
//!
//! Relay functions never touch a socket. They return the datagrams
//! to transmit, already serialized through each recipient's
//! reliability state, so the transport only has to ship them.

use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::config::Config;
use crate::protocol::constants::GAME_LIST_CAP;
use crate::protocol::packet::{
    DisconnectReason, GameDataMessage, GameListing, GameMessage, GameSettings,
};
use crate::session::ConnectionRegistry;

use super::registry::RoomRegistry;
use super::Room;

/// One datagram ready for the socket.
#[derive(Debug)]
pub struct Outbound {
    pub addr: SocketAddr,
    pub bytes: Bytes,
}

fn push_reliable(
    out: &mut Vec<Outbound>,
    conns: &mut ConnectionRegistry,
    addr: SocketAddr,
    children: Vec<GameMessage>,
    now: Instant,
) {
    if let Some(conn) = conns.get_mut(&addr) {
        let bytes = conn.prepare_reliable(children, now);
        out.push(Outbound { addr, bytes });
    }
}

fn push_unreliable(
    out: &mut Vec<Outbound>,
    conns: &ConnectionRegistry,
    addr: SocketAddr,
    children: Vec<GameMessage>,
) {
    if let Some(conn) = conns.get(&addr) {
        let bytes = conn.prepare_unreliable(children);
        out.push(Outbound { addr, bytes });
    }
}

/// Admits a connection into the room, or answers with a JoinError
/// without altering room state.
pub fn handle_remote_join(
    room: &mut Room,
    conns: &mut ConnectionRegistry,
    joiner: SocketAddr,
    now: Instant,
) -> Vec<Outbound> {
    let mut out = Vec::new();
    let Some(conn) = conns.get(&joiner) else {
        return out;
    };
    let client_id = conn.client_id;

    let rejection = if room.state == super::RoomState::Destroyed {
        Some(DisconnectReason::GameNotFound)
    } else if room.is_banned(joiner.ip()) {
        Some(DisconnectReason::Banned)
    } else if room.members.len() >= room.settings.max_players as usize {
        Some(DisconnectReason::GameFull)
    } else if room.state == super::RoomState::Started {
        Some(DisconnectReason::GameStarted)
    } else {
        None
    };

    if let Some(reason) = rejection {
        debug!(code = %room.code, client_id, ?reason, "join rejected");
        push_reliable(
            &mut out,
            conns,
            joiner,
            vec![GameMessage::JoinGameError { reason }],
            now,
        );
        return out;
    }

    // Notify the existing members before the list changes.
    let existing: Vec<SocketAddr> = room.members.values().copied().collect();
    let others: Vec<i32> = room.members.keys().copied().collect();

    room.add_member(client_id, joiner);
    let host_id = room.host_id.unwrap_or(client_id);
    if let Some(conn) = conns.get_mut(&joiner) {
        conn.room = Some(room.code);
    }

    for addr in existing {
        push_reliable(
            &mut out,
            conns,
            addr,
            vec![GameMessage::JoinGameNotify {
                code: room.code,
                client_id,
                host_id,
            }],
            now,
        );
    }

    push_reliable(
        &mut out,
        conns,
        joiner,
        vec![GameMessage::JoinedGame {
            code: room.code,
            client_id,
            host_id,
            others,
        }],
        now,
    );
    out
}

/// Core fan-out primitive: wraps `children` in a GameData frame (and
/// appends `meta` as further root children) for every selected
/// recipient. `target` restricts delivery to one member; `exclude`
/// always wins. Reliable sends draw a fresh nonce per recipient.
pub fn broadcast_messages(
    room: &Room,
    conns: &mut ConnectionRegistry,
    children: &[GameDataMessage],
    meta: &[GameMessage],
    target: Option<i32>,
    exclude: &[i32],
    reliable: bool,
    now: Instant,
) -> Vec<Outbound> {
    let mut out = Vec::new();
    let recipients: Vec<(i32, SocketAddr)> = room
        .members
        .iter()
        .map(|(id, addr)| (*id, *addr))
        .filter(|(id, _)| !exclude.contains(id))
        .filter(|(id, _)| target.map(|t| t == *id).unwrap_or(true))
        .collect();

    for (_, addr) in recipients {
        let mut root_children = Vec::with_capacity(1 + meta.len());
        if !children.is_empty() {
            root_children.push(GameMessage::GameData {
                code: room.code,
                children: children.to_vec(),
            });
        }
        root_children.extend(meta.iter().cloned());
        if root_children.is_empty() {
            continue;
        }
        if reliable {
            push_reliable(&mut out, conns, addr, root_children, now);
        } else {
            push_unreliable(&mut out, conns, addr, root_children);
        }
    }
    out
}

/// Relays game data from `sender` to the rest of the room, honoring
/// perspectives and the unreliable movement path.
pub fn forward_game_data(
    room: &mut Room,
    conns: &mut ConnectionRegistry,
    sender: i32,
    children: Vec<GameDataMessage>,
    config: &Config,
    now: Instant,
) -> Vec<Outbound> {
    // State tracking before fan-out.
    for child in &children {
        match child {
            GameDataMessage::Spawn(spawn) => room.observe_spawn(spawn),
            GameDataMessage::Despawn(despawn) => room.forget_net_id(despawn.net_id),
            _ => {}
        }
    }

    let children: Vec<GameDataMessage> = children
        .into_iter()
        .filter(|child| {
            if matches!(child, GameDataMessage::Unknown { .. }) {
                if !config.socket.accept_unknown_game_data {
                    trace!(code = %room.code, tag = child.tag(), "dropping unknown game data");
                    return false;
                }
            }
            true
        })
        .collect();
    if children.is_empty() {
        return Vec::new();
    }

    let reliable = !room.is_movement_frame(&children);

    let perspective_idx = if config.optimizations.disable_perspectives {
        None
    } else {
        room.perspective_of(sender)
    };

    let Some(idx) = perspective_idx else {
        // No active perspective: one broadcast covers the base room
        // and every perspective surface alike.
        return broadcast_messages(room, conns, &children, &[], None, &[sender], reliable, now);
    };

    // Phase one: the perspective's decoder observes each child and
    // may cancel it outright.
    let surviving: Vec<GameDataMessage> = children
        .iter()
        .filter(|child| !room.perspectives[idx].incoming_filter.cancels(child))
        .cloned()
        .collect();

    // Phase two: fresh copies run the outgoing filter; survivors
    // reach the base room and every other perspective.
    let outgoing: Vec<GameDataMessage> = surviving
        .iter()
        .filter(|child| !room.perspectives[idx].outgoing_filter.cancels(child))
        .cloned()
        .collect();

    let inside: Vec<i32> = room.perspectives[idx].players.iter().copied().collect();

    let mut out = Vec::new();
    if !outgoing.is_empty() {
        // Base room and other perspectives: everyone not inside the
        // sender's perspective.
        let mut exclude = inside.clone();
        exclude.push(sender);
        out.extend(broadcast_messages(
            room, conns, &outgoing, &[], None, &exclude, reliable, now,
        ));
    }

    // Phase three: children the decoder let through go to the
    // perspective's own members, whether or not the outgoing filter
    // kept them.
    if !surviving.is_empty() {
        for member in inside {
            if member == sender {
                continue;
            }
            out.extend(broadcast_messages(
                room,
                conns,
                &surviving,
                &[],
                Some(member),
                &[sender],
                reliable,
                now,
            ));
        }
    }
    out
}

/// Forwards a directed GameDataTo to exactly the named recipient, or
/// silently drops it when the recipient is not in the room.
pub fn forward_game_data_to(
    room: &Room,
    conns: &mut ConnectionRegistry,
    sender: i32,
    target: i32,
    children: Vec<GameDataMessage>,
    now: Instant,
) -> Vec<Outbound> {
    if !room.members.contains_key(&target) {
        trace!(code = %room.code, sender, target, "directed message to absent recipient dropped");
        return Vec::new();
    }
    broadcast_messages(room, conns, &children, &[], Some(target), &[sender], true, now)
}

/// Detaches a member and tells the remaining members, re-electing
/// the host when needed.
pub fn leave_room(
    room: &mut Room,
    conns: &mut ConnectionRegistry,
    client_id: i32,
    reason: DisconnectReason,
    now: Instant,
) -> Vec<Outbound> {
    let removal = room.remove_member(client_id, now);
    if !removal.was_member {
        return Vec::new();
    }
    if let Some(conn) = conns.by_client_id_mut(client_id) {
        conn.room = None;
    }
    let host_id = room.host_id.unwrap_or(0);
    broadcast_messages(
        room,
        conns,
        &[],
        &[GameMessage::RemovePlayer {
            code: room.code,
            client_id,
            host_id,
            reason: reason.code(),
        }],
        None,
        &[client_id],
        true,
        now,
    )
}

/// Builds a game listing for a requester's filter: keyword equality,
/// requested map mask, impostor count (or 0 for any), capped.
pub fn game_listing(
    rooms: &RoomRegistry,
    conns: &ConnectionRegistry,
    filter: &GameSettings,
    now: Instant,
) -> Vec<GameListing> {
    let mut listings = Vec::new();
    for room in rooms.listable() {
        if room.settings.keywords != filter.keywords {
            continue;
        }
        if filter.map & (1 << room.settings.map) == 0 {
            continue;
        }
        if filter.num_impostors != 0 && room.settings.num_impostors != filter.num_impostors {
            continue;
        }
        let Some(host_id) = room.host_id else {
            continue;
        };
        let Some(host) = conns.by_client_id(host_id) else {
            continue;
        };
        let ip = match host.addr.ip() {
            std::net::IpAddr::V4(v4) => v4.octets(),
            std::net::IpAddr::V6(_) => [0, 0, 0, 0],
        };
        listings.push(GameListing {
            ip,
            port: host.addr.port(),
            code: room.code,
            host_name: host.username.clone(),
            players: room.members.len() as u8,
            age_seconds: room.age_seconds(now),
            map: room.settings.map,
            num_impostors: room.settings.num_impostors,
            max_players: room.settings.max_players,
        });
        if listings.len() >= GAME_LIST_CAP {
            break;
        }
    }
    listings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::protocol::constants::{SpawnFlags, RPC_SEND_CHAT, SPAWN_TYPE_PLAYER, TAG_RELIABLE, TAG_UNRELIABLE};
    use crate::protocol::packet::gamedata::{Data, Rpc, Spawn, SpawnComponent};
    use crate::protocol::packet::{Direction, RootPacket};
    use crate::protocol::types::code::CodeScheme;
    use crate::room::perspective::{MessageFilter, Perspective};
    use crate::room::RoomState;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn setup(member_ports: &[u16]) -> (Room, ConnectionRegistry) {
        let mut room = Room::new(
            "ABCD".parse().unwrap(),
            GameSettings::new(10, 0, 0xff, 2),
            Instant::now(),
        );
        let mut conns = ConnectionRegistry::new();
        for &port in member_ports {
            let endpoint = addr(port);
            let id = conns.get_or_create(endpoint).client_id;
            room.add_member(id, endpoint);
            conns.get_mut(&endpoint).unwrap().room = Some(room.code);
        }
        (room, conns)
    }

    fn decode(outbound: &Outbound) -> RootPacket {
        let mut slice = outbound.bytes.clone();
        RootPacket::decode(&mut slice, Direction::Clientbound).unwrap()
    }

    fn rpc(call_id: u8) -> GameDataMessage {
        GameDataMessage::Rpc(Rpc {
            net_id: 9,
            call_id,
            payload: Bytes::new(),
        })
    }

    #[test]
    fn join_rejected_when_full() {
        let (mut room, mut conns) = setup(&[1, 2]);
        room.settings = GameSettings::new(2, 0, 0xff, 2);
        let joiner = addr(3);
        conns.get_or_create(joiner);
        let out = handle_remote_join(&mut room, &mut conns, joiner, Instant::now());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].addr, joiner);
        match decode(&out[0]) {
            RootPacket::Reliable { children, .. } => {
                assert_eq!(
                    children,
                    vec![GameMessage::JoinGameError {
                        reason: DisconnectReason::GameFull
                    }]
                );
            }
            other => panic!("expected reliable, got {other:?}"),
        }
        assert_eq!(room.members.len(), 2);
    }

    #[test]
    fn join_rejected_when_started() {
        let (mut room, mut conns) = setup(&[1]);
        room.state = RoomState::Started;
        let joiner = addr(9);
        conns.get_or_create(joiner);
        let out = handle_remote_join(&mut room, &mut conns, joiner, Instant::now());
        match decode(&out[0]) {
            RootPacket::Reliable { children, .. } => {
                assert_eq!(
                    children,
                    vec![GameMessage::JoinGameError {
                        reason: DisconnectReason::GameStarted
                    }]
                );
            }
            other => panic!("expected reliable, got {other:?}"),
        }
    }

    #[test]
    fn join_rejected_when_banned() {
        let (mut room, mut conns) = setup(&[1]);
        let joiner = addr(5);
        room.bans.insert(joiner.ip());
        conns.get_or_create(joiner);
        let out = handle_remote_join(&mut room, &mut conns, joiner, Instant::now());
        match decode(&out[0]) {
            RootPacket::Reliable { children, .. } => {
                assert_eq!(
                    children,
                    vec![GameMessage::JoinGameError {
                        reason: DisconnectReason::Banned
                    }]
                );
            }
            other => panic!("expected reliable, got {other:?}"),
        }
    }

    #[test]
    fn successful_join_notifies_everyone() {
        let (mut room, mut conns) = setup(&[1, 2]);
        let joiner = addr(3);
        let joiner_id = conns.get_or_create(joiner).client_id;
        let out = handle_remote_join(&mut room, &mut conns, joiner, Instant::now());

        // Two notifies plus the joiner's member list.
        assert_eq!(out.len(), 3);
        assert!(room.members.contains_key(&joiner_id));
        assert_eq!(conns.get(&joiner).unwrap().room, Some(room.code));

        let to_joiner = out.iter().find(|o| o.addr == joiner).unwrap();
        match decode(to_joiner) {
            RootPacket::Reliable { children, .. } => match &children[0] {
                GameMessage::JoinedGame {
                    client_id, others, ..
                } => {
                    assert_eq!(*client_id, joiner_id);
                    assert_eq!(others.len(), 2);
                    assert!(!others.contains(&joiner_id));
                }
                other => panic!("expected JoinedGame, got {other:?}"),
            },
            other => panic!("expected reliable, got {other:?}"),
        }
    }

    #[test]
    fn broadcast_excludes_sender_and_targets() {
        let (room, mut conns) = setup(&[1, 2, 3]);
        let out = broadcast_messages(
            &room,
            &mut conns,
            &[rpc(1)],
            &[],
            None,
            &[1],
            true,
            Instant::now(),
        );
        let recipients: HashSet<SocketAddr> = out.iter().map(|o| o.addr).collect();
        assert_eq!(recipients, HashSet::from([addr(2), addr(3)]));

        let out = broadcast_messages(
            &room,
            &mut conns,
            &[rpc(1)],
            &[],
            Some(2),
            &[],
            true,
            Instant::now(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].addr, addr(2));
    }

    #[test]
    fn reliable_broadcast_uses_fresh_nonce_per_recipient() {
        let (room, mut conns) = setup(&[1, 2]);
        let now = Instant::now();
        broadcast_messages(&room, &mut conns, &[rpc(1)], &[], None, &[], true, now);
        let out = broadcast_messages(&room, &mut conns, &[rpc(2)], &[], None, &[], true, now);
        for o in &out {
            match decode(o) {
                RootPacket::Reliable { nonce, .. } => assert_eq!(nonce, 2),
                other => panic!("expected reliable, got {other:?}"),
            }
        }
    }

    #[test]
    fn movement_frames_travel_unreliably() {
        let (mut room, mut conns) = setup(&[1, 2]);
        let spawn = GameDataMessage::Spawn(Spawn {
            spawn_type: SPAWN_TYPE_PLAYER,
            owner: 1,
            flags: SpawnFlags::CLIENT_CHARACTER,
            components: vec![
                SpawnComponent { net_id: 30, tag: 1, data: Bytes::new() },
                SpawnComponent { net_id: 31, tag: 1, data: Bytes::new() },
                SpawnComponent { net_id: 32, tag: 1, data: Bytes::new() },
            ],
        });
        let cfg = Config::default();
        let now = Instant::now();
        let out = forward_game_data(&mut room, &mut conns, 1, vec![spawn], &cfg, now);
        assert!(out.iter().all(|o| o.bytes[0] == TAG_RELIABLE));

        let movement = vec![GameDataMessage::Data(Data {
            net_id: 32,
            payload: Bytes::from_static(&[1, 2]),
        })];
        let out = forward_game_data(&mut room, &mut conns, 1, movement, &cfg, now);
        assert!(!out.is_empty());
        assert!(out.iter().all(|o| o.bytes[0] == TAG_UNRELIABLE));
    }

    #[test]
    fn unknown_children_dropped_unless_configured() {
        let (mut room, mut conns) = setup(&[1, 2]);
        let unknown = GameDataMessage::Unknown {
            tag: 0x60,
            payload: Bytes::from_static(&[1]),
        };
        let now = Instant::now();

        let cfg = Config::default();
        let out = forward_game_data(&mut room, &mut conns, 1, vec![unknown.clone()], &cfg, now);
        assert!(out.is_empty());

        let mut cfg = Config::default();
        cfg.socket.accept_unknown_game_data = true;
        let out = forward_game_data(&mut room, &mut conns, 1, vec![unknown], &cfg, now);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn directed_message_reaches_only_target() {
        let (room, mut conns) = setup(&[1, 2, 3]);
        let out = forward_game_data_to(&room, &mut conns, 1, 3, vec![rpc(5)], Instant::now());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].addr, addr(3));

        // Absent recipient: silently dropped.
        let out = forward_game_data_to(&room, &mut conns, 1, 99, vec![rpc(5)], Instant::now());
        assert!(out.is_empty());
    }

    #[test]
    fn perspective_outgoing_filter_two_phase() {
        let (mut room, mut conns) = setup(&[1, 2, 3]);
        // Player 1 sits inside a perspective with player 2; the
        // outgoing filter cancels one specific rpc.
        room.perspectives.push(
            Perspective::new([1, 2])
                .with_outgoing_filter(MessageFilter::default().block_rpc(RPC_SEND_CHAT)),
        );

        let children = vec![rpc(RPC_SEND_CHAT), rpc(1)];
        let out = forward_game_data(
            &mut room,
            &mut conns,
            1,
            children,
            &Config::default(),
            Instant::now(),
        );

        // Base room (player 3) sees only the unfiltered child.
        let to_base: Vec<_> = out.iter().filter(|o| o.addr == addr(3)).collect();
        assert_eq!(to_base.len(), 1);
        match decode(to_base[0]) {
            RootPacket::Reliable { children, .. } => match &children[0] {
                GameMessage::GameData { children, .. } => {
                    assert_eq!(children.len(), 1);
                    assert_eq!(children[0], rpc(1));
                }
                other => panic!("expected GameData, got {other:?}"),
            },
            other => panic!("expected reliable, got {other:?}"),
        }

        // The perspective member (player 2) sees both children.
        let to_inside: Vec<_> = out.iter().filter(|o| o.addr == addr(2)).collect();
        assert_eq!(to_inside.len(), 1);
        match decode(to_inside[0]) {
            RootPacket::Reliable { children, .. } => match &children[0] {
                GameMessage::GameData { children, .. } => {
                    assert_eq!(children.len(), 2);
                }
                other => panic!("expected GameData, got {other:?}"),
            },
            other => panic!("expected reliable, got {other:?}"),
        }

        // The sender hears nothing back.
        assert!(out.iter().all(|o| o.addr != addr(1)));
    }

    #[test]
    fn perspectives_bypassed_when_disabled() {
        let (mut room, mut conns) = setup(&[1, 2, 3]);
        room.perspectives.push(
            Perspective::new([1, 2])
                .with_outgoing_filter(MessageFilter::default().block_rpc(RPC_SEND_CHAT)),
        );
        let mut cfg = Config::default();
        cfg.optimizations.disable_perspectives = true;

        let out = forward_game_data(
            &mut room,
            &mut conns,
            1,
            vec![rpc(RPC_SEND_CHAT)],
            &cfg,
            Instant::now(),
        );
        // Filter is a no-op: both other members get the child.
        let recipients: HashSet<SocketAddr> = out.iter().map(|o| o.addr).collect();
        assert_eq!(recipients, HashSet::from([addr(2), addr(3)]));
    }

    #[test]
    fn leave_broadcasts_removal_and_reelects() {
        let (mut room, mut conns) = setup(&[1, 2, 3]);
        assert_eq!(room.host_id, Some(1));
        let out = leave_room(
            &mut room,
            &mut conns,
            1,
            DisconnectReason::ExitGame,
            Instant::now(),
        );
        assert_eq!(room.host_id, Some(2));
        assert_eq!(out.len(), 2);
        for o in &out {
            match decode(o) {
                RootPacket::Reliable { children, .. } => match &children[0] {
                    GameMessage::RemovePlayer {
                        client_id, host_id, ..
                    } => {
                        assert_eq!(*client_id, 1);
                        assert_eq!(*host_id, 2);
                    }
                    other => panic!("expected RemovePlayer, got {other:?}"),
                },
                other => panic!("expected reliable, got {other:?}"),
            }
        }
        assert_eq!(conns.by_client_id(1).unwrap().room, None);
    }

    #[test]
    fn listing_applies_filters_and_cap() {
        let mut rooms = RoomRegistry::new(CodeScheme::V2);
        let mut conns = ConnectionRegistry::new();
        let now = Instant::now();

        for i in 0..12u16 {
            let code = rooms.generate_code();
            let endpoint = addr(2000 + i);
            let host_id = conns.get_or_create(endpoint).client_id;
            conns.get_mut(&endpoint).unwrap().username = format!("host{i}");
            let room = rooms
                .create_room(code, GameSettings::new(10, 0, 2, 2), now)
                .unwrap();
            room.add_member(host_id, endpoint);
        }

        // Matching filter: capped at 10 of the 12 rooms.
        let filter = GameSettings::new(10, 0, 0xff, 0);
        let listings = game_listing(&rooms, &conns, &filter, now);
        assert_eq!(listings.len(), GAME_LIST_CAP);

        // Impostor filter excludes everything.
        let filter = GameSettings::new(10, 0, 0xff, 3);
        assert!(game_listing(&rooms, &conns, &filter, now).is_empty());

        // Map mask excludes map 2.
        let filter = GameSettings::new(10, 0, 0b0000_0001, 0);
        assert!(game_listing(&rooms, &conns, &filter, now).is_empty());

        // Keyword mismatch excludes everything.
        let filter = GameSettings::new(10, 7, 0xff, 0);
        assert!(game_listing(&rooms, &conns, &filter, now).is_empty());
    }
}
