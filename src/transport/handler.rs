//! Root-message routing: decoded datagrams in, datagrams out.
//!
//! Every handler takes the whole server state and returns the bytes
//! to transmit, keeping the muxer loop free of protocol knowledge
//! and the handlers free of sockets.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Buf;
use tracing::{debug, info, trace, warn};

use crate::chat::{self, CommandContext, CommandTable};
use crate::config::Config;
use crate::hooks::{NoHooks, RelayHooks};
use crate::protocol::constants::RPC_SEND_CHAT;
use crate::protocol::packet::{
    DisconnectReason, GameDataMessage, GameMessage, Hello, ReactorMessage, RootPacket,
};
use crate::protocol::types::code::CodeScheme;
use crate::protocol::types::GameCode;
use crate::protocol::Direction;
use crate::room::relay::{self, Outbound};
use crate::room::{RoomRegistry, RoomState};
use crate::session::reliability::NonceOutcome;
use crate::session::{handshake, ConnectionRegistry, HandshakeState};

/// Everything the muxer loop owns. All mutation happens on that one
/// loop, so no interior locking is needed.
pub struct ServerState {
    pub config: Config,
    pub conns: ConnectionRegistry,
    pub rooms: RoomRegistry,
    pub commands: CommandTable,
    pub hooks: Box<dyn RelayHooks + Send>,
}

impl ServerState {
    pub fn new(config: Config) -> Self {
        let scheme = CodeScheme::from(config.rooms.game_codes);
        Self {
            conns: ConnectionRegistry::new(),
            rooms: RoomRegistry::new(scheme),
            commands: CommandTable::new(),
            hooks: Box::new(NoHooks),
            config,
        }
    }
}

fn push_reliable(
    state: &mut ServerState,
    addr: SocketAddr,
    children: Vec<GameMessage>,
    now: Instant,
    out: &mut Vec<Outbound>,
) {
    if let Some(conn) = state.conns.get_mut(&addr) {
        let bytes = conn.prepare_reliable(children, now);
        out.push(Outbound { addr, bytes });
    }
}

/// Entry point for one inbound datagram.
pub fn handle_datagram(
    state: &mut ServerState,
    addr: SocketAddr,
    bytes: &[u8],
    now: Instant,
) -> Vec<Outbound> {
    let mut out = Vec::new();
    let mut src = bytes;
    let packet = match RootPacket::decode(&mut src, Direction::Serverbound) {
        Ok(packet) => packet,
        Err(err) => {
            warn!(%addr, %err, "malformed packet");
            return out;
        }
    };
    if src.has_remaining() {
        trace!(%addr, trailing = src.remaining(), "trailing bytes after root packet");
    }

    if !state.conns.contains(&addr) {
        // Only a valid hello establishes identity.
        if matches!(packet, RootPacket::Hello(_)) {
            state.conns.get_or_create(addr);
        } else {
            trace!(%addr, tag = packet.tag(), "datagram from unknown endpoint ignored");
            return out;
        }
    }

    match packet {
        RootPacket::Hello(hello) => handle_hello_packet(state, addr, hello, now, &mut out),
        RootPacket::Ping { nonce } => {
            if let Some(conn) = state.conns.get_mut(&addr) {
                let (_, ack) = conn.accept_nonce(nonce, false);
                out.push(Outbound { addr, bytes: ack });
            }
        }
        RootPacket::Ack { nonce, .. } => {
            if let Some(conn) = state.conns.get_mut(&addr) {
                conn.handle_ack(nonce, now);
            }
        }
        RootPacket::Disconnect(_) => {
            // Client-initiated teardown; nothing goes back.
            remove_client(state, addr, None, now, &mut out);
        }
        RootPacket::Reliable { nonce, children } => {
            let carries_mod_declaration = children.iter().any(|child| {
                matches!(
                    child,
                    GameMessage::Reactor(ReactorMessage::ModDeclaration(_))
                )
            });
            let Some(conn) = state.conns.get_mut(&addr) else {
                return out;
            };
            let (outcome, ack) = conn.accept_nonce(nonce, carries_mod_declaration);
            out.push(Outbound { addr, bytes: ack });
            if outcome == NonceOutcome::Duplicate {
                return out;
            }
            for child in children {
                handle_game_message(state, addr, child, now, &mut out);
            }
        }
        RootPacket::Unreliable { children } => {
            for child in children {
                handle_game_message(state, addr, child, now, &mut out);
            }
        }
    }
    out
}

fn handle_hello_packet(
    state: &mut ServerState,
    addr: SocketAddr,
    hello: Hello,
    now: Instant,
    out: &mut Vec<Outbound>,
) {
    let outcome = {
        let Some(conn) = state.conns.get_mut(&addr) else {
            return;
        };
        let (nonce_outcome, ack) = conn.accept_nonce(hello.nonce, false);
        out.push(Outbound { addr, bytes: ack });
        if nonce_outcome == NonceOutcome::Duplicate {
            return;
        }
        if conn.handshake != HandshakeState::New {
            trace!(conn = %conn.identity(), "repeated hello ignored");
            return;
        }
        handshake::handle_hello(conn, &hello, &state.config)
    };

    match outcome {
        handshake::HelloOutcome::Accept { replies } => {
            if let Some(conn) = state.conns.get(&addr) {
                info!(conn = %conn.identity(), modded = conn.uses_mod_framework, "hello accepted");
            }
            for children in replies {
                push_reliable(state, addr, children, now, out);
            }
        }
        handshake::HelloOutcome::Reject(reason) => {
            remove_client(state, addr, Some(reason), now, out);
        }
    }
}

/// Tears a client down. A reason makes it graceful (a Disconnect
/// packet is sent first); `None` is the silent liveness path. Either
/// way the room hears a client-leave.
pub fn remove_client(
    state: &mut ServerState,
    addr: SocketAddr,
    reason: Option<DisconnectReason>,
    now: Instant,
    out: &mut Vec<Outbound>,
) {
    if let Some(conn) = state.conns.get_mut(&addr) {
        if conn.disconnect_initiated {
            return;
        }
        conn.disconnect_initiated = true;
    }
    if let Some(reason) = &reason {
        let bytes = RootPacket::Disconnect(crate::protocol::packet::Disconnect {
            reason: Some(reason.clone()),
        })
        .to_bytes();
        out.push(Outbound { addr, bytes });
    }
    let Some(conn) = state.conns.remove(&addr) else {
        return;
    };
    if let Some(code) = conn.room {
        if let Some(room) = state.rooms.get_mut(&code) {
            let leave_reason = reason.unwrap_or(DisconnectReason::ExitGame);
            out.extend(relay::leave_room(
                room,
                &mut state.conns,
                conn.client_id,
                leave_reason,
                now,
            ));
        }
    }
}

fn handle_game_message(
    state: &mut ServerState,
    addr: SocketAddr,
    msg: GameMessage,
    now: Instant,
    out: &mut Vec<Outbound>,
) {
    let Some(conn) = state.conns.get(&addr) else {
        return;
    };
    let client_id = conn.client_id;
    let ready = conn.hello_complete();

    match msg {
        GameMessage::Reactor(ReactorMessage::ModDeclaration(decl)) => {
            if let Some(conn) = state.conns.get_mut(&addr) {
                handshake::handle_mod_declaration(conn, decl);
            }
        }
        _ if !ready => {
            trace!(client_id, tag = msg.tag(), "message before handshake ignored");
        }
        GameMessage::HostGameRequest { mut settings } => {
            let hook = state.hooks.before_create(&mut settings);
            if hook.cancel {
                let reason = hook
                    .reason
                    .unwrap_or(DisconnectReason::Custom("Room creation was canceled".into()));
                push_reliable(
                    state,
                    addr,
                    vec![GameMessage::JoinGameError { reason }],
                    now,
                    out,
                );
                return;
            }
            let code = state.rooms.generate_code();
            match state.rooms.create_room(code, settings, now) {
                Ok(_) => {
                    push_reliable(
                        state,
                        addr,
                        vec![GameMessage::HostGameResponse { code }],
                        now,
                        out,
                    );
                }
                Err(err) => warn!(client_id, %err, "room creation failed"),
            }
        }
        GameMessage::JoinGameRequest { code } => {
            handle_join(state, addr, client_id, code, now, out);
        }
        GameMessage::GameData { code, children } => {
            handle_game_data(state, addr, client_id, code, None, children, now, out);
        }
        GameMessage::GameDataTo {
            code,
            target,
            children,
        } => {
            handle_game_data(state, addr, client_id, code, Some(target), children, now, out);
        }
        msg @ (GameMessage::StartGame { .. }
        | GameMessage::EndGame { .. }
        | GameMessage::AlterGame { .. }
        | GameMessage::KickPlayerRequest { .. }) => {
            handle_host_only(state, addr, client_id, msg, now, out);
        }
        GameMessage::GetGameListRequest { filter, .. } => {
            let games = relay::game_listing(&state.rooms, &state.conns, &filter, now);
            push_reliable(
                state,
                addr,
                vec![GameMessage::GetGameListResponse { games }],
                now,
                out,
            );
        }
        GameMessage::Reactor(_) => {
            trace!(client_id, "unexpected reactor message ignored");
        }
        other => {
            debug!(client_id, tag = other.tag(), "unhandled root child");
        }
    }
}

fn handle_join(
    state: &mut ServerState,
    addr: SocketAddr,
    client_id: i32,
    code: GameCode,
    now: Instant,
    out: &mut Vec<Outbound>,
) {
    if state.rooms.get(&code).is_none() {
        push_reliable(
            state,
            addr,
            vec![GameMessage::JoinGameError {
                reason: DisconnectReason::GameNotFound,
            }],
            now,
            out,
        );
        return;
    }

    // Mod policy gate, before any room state changes.
    if let Some(options) = state.config.reactor.options() {
        let verdict = match (state.rooms.get(&code), state.conns.get(&addr)) {
            (Some(room), Some(joiner)) => {
                let host = room
                    .host_id
                    .filter(|host_id| *host_id != client_id)
                    .and_then(|host_id| state.conns.by_client_id(host_id));
                handshake::validate_join(joiner, host, &options)
            }
            _ => Ok(()),
        };
        if let Err(reason) = verdict {
            remove_client(state, addr, Some(reason), now, out);
            return;
        }
    }

    let hook = match state.rooms.get(&code) {
        Some(room) => state.hooks.before_join(room, client_id),
        None => return,
    };
    if hook.cancel {
        let reason = hook
            .reason
            .unwrap_or(DisconnectReason::Custom("The join was canceled".into()));
        push_reliable(state, addr, vec![GameMessage::JoinGameError { reason }], now, out);
        return;
    }

    // Leaving a previous room first keeps the membership invariant.
    let previous = state.conns.get(&addr).and_then(|conn| conn.room);
    if let Some(previous_code) = previous {
        if previous_code != code {
            if let Some(previous_room) = state.rooms.get_mut(&previous_code) {
                out.extend(relay::leave_room(
                    previous_room,
                    &mut state.conns,
                    client_id,
                    DisconnectReason::ExitGame,
                    now,
                ));
            }
        }
    }

    if let Some(room) = state.rooms.get_mut(&code) {
        out.extend(relay::handle_remote_join(room, &mut state.conns, addr, now));
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_game_data(
    state: &mut ServerState,
    addr: SocketAddr,
    client_id: i32,
    code: GameCode,
    target: Option<i32>,
    children: Vec<GameDataMessage>,
    now: Instant,
    out: &mut Vec<Outbound>,
) {
    let in_room = state
        .conns
        .get(&addr)
        .map(|conn| conn.room == Some(code))
        .unwrap_or(false);
    if !in_room {
        debug!(client_id, %code, "game data for a room the sender is not in");
        return;
    }

    if let Some(target) = target {
        if let Some(room) = state.rooms.get(&code) {
            out.extend(relay::forward_game_data_to(
                room,
                &mut state.conns,
                client_id,
                target,
                children,
                now,
            ));
        }
        return;
    }

    // Chat command interception: a `/`-prefixed chat rpc is canceled
    // and dispatched instead of relayed.
    let mut replies = Vec::new();
    let children: Vec<GameDataMessage> = children
        .into_iter()
        .filter(|child| {
            if !state.config.rooms.chat_commands {
                return true;
            }
            let GameDataMessage::Rpc(rpc) = child else {
                return true;
            };
            if rpc.call_id != RPC_SEND_CHAT {
                return true;
            }
            let Some(text) = rpc.chat_text() else {
                return true;
            };
            let Some(command) = text.strip_prefix('/') else {
                return true;
            };
            let mut ctx = CommandContext::new(code, client_id, &text);
            state.commands.dispatch(&mut ctx, command);
            replies.extend(ctx.into_replies());
            false
        })
        .collect();

    if let Some(room) = state.rooms.get_mut(&code) {
        if !children.is_empty() {
            out.extend(relay::forward_game_data(
                room,
                &mut state.conns,
                client_id,
                children,
                &state.config,
                now,
            ));
        }
        if !replies.is_empty() {
            let reply_children = chat::reply_children(&replies);
            out.extend(relay::broadcast_messages(
                room,
                &mut state.conns,
                &reply_children,
                &[],
                Some(client_id),
                &[],
                true,
                now,
            ));
        }
    }
}

fn handle_host_only(
    state: &mut ServerState,
    addr: SocketAddr,
    client_id: i32,
    msg: GameMessage,
    now: Instant,
    out: &mut Vec<Outbound>,
) {
    let Some(code) = state.conns.get(&addr).and_then(|conn| conn.room) else {
        debug!(client_id, tag = msg.tag(), "game control message outside a room");
        return;
    };
    let is_host = state
        .rooms
        .get(&code)
        .map(|room| room.is_host(client_id))
        .unwrap_or(false);
    if !is_host {
        warn!(client_id, %code, tag = msg.tag(), "game control message from non-host");
        remove_client(state, addr, Some(DisconnectReason::Hacking), now, out);
        return;
    }

    let mut kick: Option<(i32, bool)> = None;
    {
        let Some(room) = state.rooms.get_mut(&code) else {
            return;
        };
        match msg {
            GameMessage::StartGame { .. } => {
                info!(%code, "game started");
                room.state = RoomState::Started;
                out.extend(relay::broadcast_messages(
                    room,
                    &mut state.conns,
                    &[],
                    &[GameMessage::StartGame { code }],
                    None,
                    &[client_id],
                    true,
                    now,
                ));
            }
            GameMessage::EndGame { reason, show_ad, .. } => {
                info!(%code, reason, "game ended");
                room.state = RoomState::Ended;
                out.extend(relay::broadcast_messages(
                    room,
                    &mut state.conns,
                    &[],
                    &[GameMessage::EndGame {
                        code,
                        reason,
                        show_ad,
                    }],
                    None,
                    &[client_id],
                    true,
                    now,
                ));
            }
            GameMessage::AlterGame { alter_tag, value, .. } => {
                // Alter tag 1 toggles public listing.
                if alter_tag == 1 {
                    room.public = value != 0;
                }
                out.extend(relay::broadcast_messages(
                    room,
                    &mut state.conns,
                    &[],
                    &[GameMessage::AlterGame {
                        code,
                        alter_tag,
                        value,
                    }],
                    None,
                    &[client_id],
                    true,
                    now,
                ));
            }
            GameMessage::KickPlayerRequest { target, banned } => {
                if !room.members.contains_key(&target) {
                    debug!(%code, target, "kick for absent member dropped");
                    return;
                }
                if banned {
                    if let Some(target_addr) = state.conns.addr_of(target) {
                        room.bans.insert(target_addr.ip());
                    }
                }
                out.extend(relay::broadcast_messages(
                    room,
                    &mut state.conns,
                    &[],
                    &[GameMessage::KickPlayerNotify {
                        code,
                        target,
                        banned,
                    }],
                    None,
                    &[client_id, target],
                    true,
                    now,
                ));
                kick = Some((target, banned));
            }
            other => {
                debug!(tag = other.tag(), "not a game control message");
            }
        }
    }

    if let Some((target, banned)) = kick {
        if let Some(target_addr) = state.conns.addr_of(target) {
            let reason = if banned {
                DisconnectReason::Banned
            } else {
                DisconnectReason::Kicked
            };
            remove_client(state, target_addr, Some(reason), now, out);
        }
    }
}

/// Process-wide reliability/keepalive tick plus room sweep.
pub fn handle_tick(state: &mut ServerState, now: Instant) -> Vec<Outbound> {
    let mut out = Vec::new();
    let mut dead = Vec::new();
    for conn in state.conns.iter_mut() {
        let tick = conn.reliability_tick(now);
        for bytes in tick.send {
            out.push(Outbound {
                addr: conn.addr,
                bytes,
            });
        }
        if tick.dead {
            dead.push(conn.addr);
        }
    }
    for addr in dead {
        warn!(%addr, "liveness failure, removing connection");
        remove_client(state, addr, None, now, &mut out);
    }

    let grace = Duration::from_secs(state.config.rooms.create_timeout);
    state.rooms.sweep_empty(now, grace);
    out
}
