//! Out-of-band operator channel.
//!
//! Lines read from stdin are parsed into commands and handed to the
//! muxer loop over an mpsc channel, so operator actions serialize
//! with packet handling like everything else.

use std::time::Instant;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::chat::{self, tokenize};
use crate::protocol::packet::{DisconnectReason, GameMessage};
use crate::protocol::types::GameCode;
use crate::room::relay::{self, Outbound};

use super::handler::{remove_client, ServerState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListTarget {
    Clients,
    Rooms,
    Players(GameCode),
    Mods(i32),
    Pov(GameCode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Disconnect every connection matching the selector (client id,
    /// username, address, or room code).
    Disconnect {
        selector: String,
        reason: Option<String>,
        ban: bool,
    },
    Destroy {
        code: GameCode,
        reason: Option<String>,
    },
    List(ListTarget),
    Broadcast {
        text: String,
        room: Option<GameCode>,
    },
    Mem,
}

/// Parses one operator line. Quoting rules match chat tokenization.
pub fn parse(line: &str) -> Result<OperatorCommand, String> {
    let tokens = tokenize(line.trim());
    let Some((name, rest)) = tokens.split_first() else {
        return Err("empty command".to_string());
    };

    // Split positional arguments from --flags.
    let mut positional = Vec::new();
    let mut reason = None;
    let mut ban = false;
    let mut room = None;
    let mut iter = rest.iter();
    while let Some(token) = iter.next() {
        match token.as_str() {
            "--reason" => {
                reason = Some(
                    iter.next()
                        .ok_or_else(|| "--reason needs a value".to_string())?
                        .clone(),
                );
            }
            "--ban" => ban = true,
            "--room" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--room needs a value".to_string())?;
                room = Some(value.parse().map_err(|e| format!("{e}"))?);
            }
            _ => positional.push(token.clone()),
        }
    }

    match name.as_str() {
        "dc" => {
            let selector = positional
                .first()
                .ok_or_else(|| "usage: dc <selector> [--reason <text>] [--ban]".to_string())?
                .clone();
            Ok(OperatorCommand::Disconnect {
                selector,
                reason,
                ban,
            })
        }
        "destroy" => {
            let code = positional
                .first()
                .ok_or_else(|| "usage: destroy <code> [--reason <text>]".to_string())?
                .parse()
                .map_err(|e| format!("{e}"))?;
            Ok(OperatorCommand::Destroy { code, reason })
        }
        "list" => {
            let what = positional
                .first()
                .ok_or_else(|| "usage: list clients|rooms|players <code>|mods <id>|pov <code>".to_string())?;
            let target = match what.as_str() {
                "clients" => ListTarget::Clients,
                "rooms" => ListTarget::Rooms,
                "players" => ListTarget::Players(
                    positional
                        .get(1)
                        .ok_or_else(|| "list players needs a room code".to_string())?
                        .parse()
                        .map_err(|e| format!("{e}"))?,
                ),
                "mods" => ListTarget::Mods(
                    positional
                        .get(1)
                        .and_then(|raw| raw.parse().ok())
                        .ok_or_else(|| "list mods needs a client id".to_string())?,
                ),
                "pov" => ListTarget::Pov(
                    positional
                        .get(1)
                        .ok_or_else(|| "list pov needs a room code".to_string())?
                        .parse()
                        .map_err(|e| format!("{e}"))?,
                ),
                other => return Err(format!("unknown list target: {other}")),
            };
            Ok(OperatorCommand::List(target))
        }
        "broadcast" => {
            if positional.is_empty() {
                return Err("usage: broadcast <text> [--room <code>]".to_string());
            }
            Ok(OperatorCommand::Broadcast {
                text: positional.join(" "),
                room,
            })
        }
        "mem" => Ok(OperatorCommand::Mem),
        other => Err(format!("unknown command: {other}")),
    }
}

/// Reads operator lines from stdin until EOF.
pub fn spawn_stdin_reader(tx: mpsc::Sender<OperatorCommand>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match parse(&line) {
                Ok(cmd) => {
                    if tx.send(cmd).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!("operator: {err}"),
            }
        }
    });
}

/// Executes one operator command against the server state. Returns
/// the datagrams to send and the report lines to print.
pub fn execute(
    state: &mut ServerState,
    cmd: OperatorCommand,
    now: Instant,
) -> (Vec<Outbound>, Vec<String>) {
    let mut out = Vec::new();
    let mut report = Vec::new();

    match cmd {
        OperatorCommand::Disconnect {
            selector,
            reason,
            ban,
        } => {
            let selected: Vec<std::net::SocketAddr> = state
                .conns
                .iter()
                .filter(|conn| {
                    selector.parse::<i32>().ok() == Some(conn.client_id)
                        || conn.username == selector
                        || conn.addr.to_string() == selector
                        || selector
                            .parse::<GameCode>()
                            .ok()
                            .map(|code| conn.room == Some(code))
                            .unwrap_or(false)
                })
                .map(|conn| conn.addr)
                .collect();
            let count = selected.len();
            for addr in selected {
                if ban {
                    let in_room = state.conns.get(&addr).and_then(|conn| conn.room);
                    if let Some(code) = in_room {
                        if let Some(room) = state.rooms.get_mut(&code) {
                            room.bans.insert(addr.ip());
                        }
                    }
                }
                let disconnect_reason = reason
                    .clone()
                    .map(DisconnectReason::Custom)
                    .unwrap_or(DisconnectReason::Kicked);
                remove_client(state, addr, Some(disconnect_reason), now, &mut out);
            }
            report.push(format!("disconnected {count} connection(s)"));
        }
        OperatorCommand::Destroy { code, reason } => match state.rooms.destroy(&code) {
            Some(room) => {
                for (_, addr) in room.members.iter() {
                    if let Some(conn) = state.conns.get_mut(addr) {
                        conn.room = None;
                        let children = vec![GameMessage::RemoveGame {
                            reason: DisconnectReason::Destroy.code(),
                        }];
                        let bytes = conn.prepare_reliable(children, now);
                        out.push(Outbound { addr: *addr, bytes });
                    }
                }
                report.push(format!(
                    "destroyed {code} ({} member(s)){}",
                    room.members.len(),
                    reason.map(|r| format!(": {r}")).unwrap_or_default()
                ));
            }
            None => report.push(format!("no room with code {code}")),
        },
        OperatorCommand::List(target) => list(state, target, now, &mut report),
        OperatorCommand::Broadcast { text, room } => {
            let children = chat::reply_children(std::slice::from_ref(&text));
            let codes: Vec<GameCode> = match room {
                Some(code) => vec![code],
                None => state.rooms.iter().map(|room| room.code).collect(),
            };
            let mut receivers = 0usize;
            for code in codes {
                if let Some(room) = state.rooms.get(&code) {
                    receivers += room.members.len();
                    out.extend(relay::broadcast_messages(
                        room,
                        &mut state.conns,
                        &children,
                        &[],
                        None,
                        &[],
                        true,
                        now,
                    ));
                }
            }
            report.push(format!("broadcast to {receivers} player(s)"));
        }
        OperatorCommand::Mem => {
            let in_flight: usize = state.conns.iter().map(|c| c.in_flight_len()).sum();
            report.push(format!(
                "{} connection(s), {} room(s), {} tracked packet(s)",
                state.conns.len(),
                state.rooms.len(),
                in_flight
            ));
        }
    }
    (out, report)
}

fn list(state: &ServerState, target: ListTarget, now: Instant, report: &mut Vec<String>) {
    match target {
        ListTarget::Clients => {
            for conn in state.conns.iter() {
                report.push(format!(
                    "{} room={} rtt={:?}",
                    conn.identity(),
                    conn.room.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
                    conn.round_trip,
                ));
            }
            report.push(format!("{} connection(s)", state.conns.len()));
        }
        ListTarget::Rooms => {
            for room in state.rooms.iter() {
                report.push(format!(
                    "{} state={:?} players={}/{} public={} age={}s",
                    room.code,
                    room.state,
                    room.members.len(),
                    room.settings.max_players,
                    room.public,
                    room.age_seconds(now),
                ));
            }
            report.push(format!("{} room(s)", state.rooms.len()));
        }
        ListTarget::Players(code) => match state.rooms.get(&code) {
            Some(room) => {
                for (client_id, addr) in &room.members {
                    let name = state
                        .conns
                        .get(addr)
                        .map(|conn| conn.username.clone())
                        .unwrap_or_default();
                    let host = if room.is_host(*client_id) { " (host)" } else { "" };
                    report.push(format!("#{client_id} {name:?} {addr}{host}"));
                }
            }
            None => report.push(format!("no room with code {code}")),
        },
        ListTarget::Mods(client_id) => match state.conns.by_client_id(client_id) {
            Some(conn) => {
                for decl in conn.mods() {
                    report.push(format!(
                        "{} {} ({:?}, net id {})",
                        decl.id, decl.version, decl.side, decl.net_id
                    ));
                }
                report.push(format!("{} mod(s)", conn.mod_count()));
            }
            None => report.push(format!("no client with id {client_id}")),
        },
        ListTarget::Pov(code) => match state.rooms.get(&code) {
            Some(room) => {
                for (index, perspective) in room.perspectives.iter().enumerate() {
                    report.push(format!(
                        "perspective {index}: players {:?}",
                        perspective.players
                    ));
                }
                report.push(format!("{} perspective(s)", room.perspectives.len()));
            }
            None => report.push(format!("no room with code {code}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dc_with_flags() {
        let cmd = parse("dc 'big bob' --reason 'being mean' --ban").unwrap();
        assert_eq!(
            cmd,
            OperatorCommand::Disconnect {
                selector: "big bob".into(),
                reason: Some("being mean".into()),
                ban: true,
            }
        );
    }

    #[test]
    fn parse_destroy_and_list() {
        assert_eq!(
            parse("destroy ABCD").unwrap(),
            OperatorCommand::Destroy {
                code: "ABCD".parse().unwrap(),
                reason: None,
            }
        );
        assert_eq!(
            parse("list players ABCD").unwrap(),
            OperatorCommand::List(ListTarget::Players("ABCD".parse().unwrap()))
        );
        assert_eq!(
            parse("list mods 3").unwrap(),
            OperatorCommand::List(ListTarget::Mods(3))
        );
        assert_eq!(parse("mem").unwrap(), OperatorCommand::Mem);
    }

    #[test]
    fn parse_broadcast_room_flag() {
        let cmd = parse("broadcast 'server restarting soon' --room ABCD").unwrap();
        assert_eq!(
            cmd,
            OperatorCommand::Broadcast {
                text: "server restarting soon".into(),
                room: Some("ABCD".parse().unwrap()),
            }
        );
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!(parse("frobnicate").is_err());
        assert!(parse("list nothing").is_err());
        assert!(parse("dc").is_err());
        assert!(parse("").is_err());
    }
}
