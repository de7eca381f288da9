//! Hello/mod negotiation and join-time mod policy.
//!
//! States per connection: `New → HelloReceived → (ModsAwaited |
//! Ready) → Ready`. Anything a connection sends before Ready, other
//! than hello-family packets, is ignored upstream because it has no
//! identity yet.

use tracing::debug;

use crate::config::{Config, ModPolicy, ReactorOptions};
use crate::protocol::constants::HANDSHAKE_PLUGIN_CHUNK;
use crate::protocol::packet::game::{ModDeclaration, ModSide};
use crate::protocol::packet::{DisconnectReason, GameMessage, Hello, ReactorMessage};

use super::{Connection, HandshakeState};

/// Result of evaluating a hello.
#[derive(Debug)]
pub enum HelloOutcome {
    /// Identity accepted; each entry is the children of one reliable
    /// reply packet (handshake ack, then chunked plugin mirrors).
    Accept { replies: Vec<Vec<GameMessage>> },
    /// Identity rejected; disconnect with this reason.
    Reject(DisconnectReason),
}

const SERVER_BRAND: &str = concat!("hazeld ", env!("CARGO_PKG_VERSION"));

/// Applies a hello to a fresh connection.
pub fn handle_hello(conn: &mut Connection, hello: &Hello, config: &Config) -> HelloOutcome {
    conn.handshake = HandshakeState::HelloReceived;
    conn.username = hello.username.clone();
    conn.language = hello.language;
    conn.client_version = Some(hello.client_version);

    let accepted = config.accepted_versions();
    if !accepted.is_empty() && !accepted.contains(&hello.client_version) {
        return HelloOutcome::Reject(DisconnectReason::IncorrectVersion);
    }

    match &hello.modded {
        None => {
            if !config.reactor.allow_normal_clients() {
                return HelloOutcome::Reject(DisconnectReason::Custom(
                    "This server requires the mod framework".to_string(),
                ));
            }
            conn.handshake = HandshakeState::Ready;
            HelloOutcome::Accept {
                replies: Vec::new(),
            }
        }
        Some(modded) => {
            conn.uses_mod_framework = true;
            conn.declared_mod_count = modded.mod_count;

            let Some(options) = config.reactor.options() else {
                return HelloOutcome::Reject(DisconnectReason::Custom(
                    "The mod framework is not enabled on this server".to_string(),
                ));
            };

            let mut replies = vec![vec![GameMessage::Reactor(ReactorMessage::Handshake {
                server_brand: SERVER_BRAND.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                plugin_count: options.plugins.len() as u32,
            })]];
            for chunk in options.plugins.chunks(HANDSHAKE_PLUGIN_CHUNK) {
                replies.push(
                    chunk
                        .iter()
                        .map(|plugin| {
                            GameMessage::Reactor(ReactorMessage::PluginDeclaration {
                                id: plugin.id.clone(),
                                version: plugin.version.clone(),
                            })
                        })
                        .collect(),
                );
            }

            conn.handshake = if modded.mod_count == 0 {
                HandshakeState::Ready
            } else {
                HandshakeState::ModsAwaited
            };
            HelloOutcome::Accept { replies }
        }
    }
}

/// Accepts one mod declaration while in `ModsAwaited`. Declarations
/// past the declared count are silently discarded.
pub fn handle_mod_declaration(conn: &mut Connection, decl: ModDeclaration) {
    if conn.handshake != HandshakeState::ModsAwaited {
        debug!(
            conn = %conn.identity(),
            mod_id = %decl.id,
            "mod declaration outside handshake, discarded"
        );
        return;
    }
    if conn.mod_count() >= conn.declared_mod_count {
        return;
    }
    conn.add_mod(decl);
    if conn.mods_complete() {
        conn.handshake = HandshakeState::Ready;
    }
}

/// Version requirement matcher: `any`/`*` match everything, a
/// trailing `.x`/`.*` segment matches the prefix, anything else is
/// exact.
pub fn version_matches(requirement: &str, actual: &str) -> bool {
    if requirement == "any" || requirement == "*" {
        return true;
    }
    for suffix in [".x", ".*"] {
        if let Some(prefix) = requirement.strip_suffix(suffix) {
            return actual == prefix || actual.starts_with(&format!("{prefix}."));
        }
    }
    requirement == actual
}

fn policy_requirement(policy: &ModPolicy) -> (Option<&str>, bool, bool) {
    match policy {
        ModPolicy::Simple(true) => (None, false, false),
        ModPolicy::Simple(false) => (None, true, false),
        ModPolicy::Detailed(detail) => {
            (detail.version.as_deref(), detail.banned, detail.optional)
        }
    }
}

/// Validates a joiner against the server-wide mod policy and,
/// optionally, the room host's mod set. Invoked on JoinGame.
pub fn validate_join(
    conn: &Connection,
    host: Option<&Connection>,
    options: &ReactorOptions,
) -> Result<(), DisconnectReason> {
    if conn.uses_mod_framework
        && (conn.handshake != HandshakeState::Ready || !conn.mods_complete())
    {
        return Err(DisconnectReason::Custom(
            "Haven't received all of your mods yet".to_string(),
        ));
    }

    for (mod_id, policy) in &options.mods {
        let (version, banned, optional) = policy_requirement(policy);
        match conn.mod_by_id(mod_id) {
            None => {
                if !banned && !optional {
                    return Err(DisconnectReason::Custom(format!(
                        "Missing required mod: {} ({})",
                        mod_id,
                        version.unwrap_or("any")
                    )));
                }
            }
            Some(declared) => {
                if banned {
                    return Err(DisconnectReason::Custom(format!(
                        "Banned mod: {} ({})",
                        declared.id, declared.version
                    )));
                }
                if let Some(requirement) = version {
                    if !version_matches(requirement, &declared.version) {
                        return Err(DisconnectReason::Custom(format!(
                            "Invalid version for mod {}: {} (valid: {})",
                            declared.id, declared.version, requirement
                        )));
                    }
                }
            }
        }
    }

    if !options.allow_extra_mods {
        for declared in conn.mods() {
            if !options.mods.contains_key(&declared.id) {
                return Err(DisconnectReason::Custom(format!(
                    "Mod not allowed: {} ({})",
                    declared.id, declared.version
                )));
            }
        }
    }

    if options.require_host_mods {
        if let Some(host) = host {
            validate_against_host(conn, host, options)?;
        }
    }

    Ok(())
}

fn skip_for_host_check(side: ModSide, options: &ReactorOptions) -> bool {
    side == ModSide::Clientside && options.block_client_side_only
}

fn validate_against_host(
    conn: &Connection,
    host: &Connection,
    options: &ReactorOptions,
) -> Result<(), DisconnectReason> {
    for host_mod in host.mods() {
        if skip_for_host_check(host_mod.side, options) {
            continue;
        }
        match conn.mod_by_id(&host_mod.id) {
            None => {
                return Err(DisconnectReason::Custom(format!(
                    "Missing mod required by the host: {} ({})",
                    host_mod.id, host_mod.version
                )));
            }
            Some(declared) if declared.version != host_mod.version => {
                return Err(DisconnectReason::Custom(format!(
                    "Invalid version for mod {}: {} (host has {})",
                    declared.id, declared.version, host_mod.version
                )));
            }
            Some(_) => {}
        }
    }
    for declared in conn.mods() {
        if skip_for_host_check(declared.side, options) {
            continue;
        }
        if host.mod_by_id(&declared.id).is_none() {
            return Err(DisconnectReason::Custom(format!(
                "Mod not present on the host: {} ({})",
                declared.id, declared.version
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::config::{ModPolicyOptions, PluginMirror, ReactorConfig};
    use crate::protocol::packet::game::ModDeclaration;
    use crate::protocol::packet::root::ModdedHello;
    use crate::protocol::ClientVersion;

    fn conn() -> Connection {
        Connection::new(1, "127.0.0.1:7777".parse().unwrap())
    }

    fn hello(modded: Option<ModdedHello>) -> Hello {
        let mut hello = Hello::new(1, ClientVersion::new(2021, 6, 30, 0), "bob", 0);
        hello.modded = modded;
        hello
    }

    fn decl(id: &str, version: &str, side: ModSide) -> ModDeclaration {
        ModDeclaration {
            net_id: 0,
            id: id.to_string(),
            version: version.to_string(),
            side,
        }
    }

    fn options_with(mods: BTreeMap<String, ModPolicy>) -> ReactorOptions {
        ReactorOptions {
            mods,
            ..ReactorOptions::default()
        }
    }

    #[test]
    fn plain_hello_goes_ready() {
        let mut c = conn();
        let outcome = handle_hello(&mut c, &hello(None), &Config::default());
        assert!(matches!(outcome, HelloOutcome::Accept { .. }));
        assert_eq!(c.handshake, HandshakeState::Ready);
        assert_eq!(c.username, "bob");
    }

    #[test]
    fn plain_hello_rejected_when_mods_required() {
        let mut c = conn();
        let config = Config {
            reactor: ReactorConfig::Enabled(true),
            ..Config::default()
        };
        let outcome = handle_hello(&mut c, &hello(None), &config);
        assert!(matches!(
            outcome,
            HelloOutcome::Reject(DisconnectReason::Custom(_))
        ));
    }

    #[test]
    fn wrong_version_rejected() {
        let mut c = conn();
        let config = Config {
            versions: vec!["2022.3.29".to_string()],
            ..Config::default()
        };
        let outcome = handle_hello(&mut c, &hello(None), &config);
        assert!(matches!(
            outcome,
            HelloOutcome::Reject(DisconnectReason::IncorrectVersion)
        ));
    }

    #[test]
    fn modded_hello_rejected_when_reactor_off() {
        let mut c = conn();
        let outcome = handle_hello(
            &mut c,
            &hello(Some(ModdedHello {
                protocol_version: 1,
                mod_count: 1,
            })),
            &Config::default(),
        );
        assert!(matches!(
            outcome,
            HelloOutcome::Reject(DisconnectReason::Custom(_))
        ));
    }

    #[test]
    fn modded_hello_replies_and_awaits_mods() {
        let mut c = conn();
        let config = Config {
            reactor: ReactorConfig::Enabled(true),
            ..Config::default()
        };
        let outcome = handle_hello(
            &mut c,
            &hello(Some(ModdedHello {
                protocol_version: 1,
                mod_count: 2,
            })),
            &config,
        );
        match outcome {
            HelloOutcome::Accept { replies } => {
                assert_eq!(replies.len(), 1); // handshake ack, no plugins
            }
            other => panic!("expected accept, got {other:?}"),
        }
        assert_eq!(c.handshake, HandshakeState::ModsAwaited);
        assert!(c.uses_mod_framework);

        handle_mod_declaration(&mut c, decl("mod.a", "1.0.0", ModSide::Both));
        assert_eq!(c.handshake, HandshakeState::ModsAwaited);
        handle_mod_declaration(&mut c, decl("mod.b", "1.0.0", ModSide::Both));
        assert_eq!(c.handshake, HandshakeState::Ready);

        // Excess declarations are discarded.
        handle_mod_declaration(&mut c, decl("mod.c", "1.0.0", ModSide::Both));
        assert_eq!(c.mod_count(), 2);
    }

    #[test]
    fn plugin_mirror_list_is_chunked() {
        let mut c = conn();
        let mut options = ReactorOptions::default();
        for i in 0..9 {
            options.plugins.push(PluginMirror {
                id: format!("plugin.{i}"),
                version: "1.0.0".to_string(),
            });
        }
        let config = Config {
            reactor: ReactorConfig::Detailed(options),
            ..Config::default()
        };
        let outcome = handle_hello(
            &mut c,
            &hello(Some(ModdedHello {
                protocol_version: 1,
                mod_count: 0,
            })),
            &config,
        );
        match outcome {
            HelloOutcome::Accept { replies } => {
                // Ack + ceil(9 / 4) plugin packets.
                assert_eq!(replies.len(), 4);
                assert!(replies[1..].iter().all(|chunk| chunk.len() <= 4));
            }
            other => panic!("expected accept, got {other:?}"),
        }
        // Zero declared mods: immediately ready.
        assert_eq!(c.handshake, HandshakeState::Ready);
    }

    #[test]
    fn version_matcher() {
        assert!(version_matches("any", "9.9.9"));
        assert!(version_matches("*", "1.0.0"));
        assert!(version_matches("1.0.x", "1.0.3"));
        assert!(version_matches("1.0.x", "1.0"));
        assert!(!version_matches("1.0.x", "1.10.0"));
        assert!(version_matches("2.1.0", "2.1.0"));
        assert!(!version_matches("2.1.0", "2.1.1"));
    }

    #[test]
    fn missing_required_mod_names_it() {
        let c = conn();
        let mut mods = BTreeMap::new();
        mods.insert("modA".to_string(), ModPolicy::Simple(true));
        let err = validate_join(&c, None, &options_with(mods)).unwrap_err();
        match err {
            DisconnectReason::Custom(text) => {
                assert!(text.contains("modA"), "{text}");
                assert!(text.contains("any"), "{text}");
            }
            other => panic!("expected custom reason, got {other:?}"),
        }
    }

    #[test]
    fn banned_mod_rejected() {
        let mut c = conn();
        c.add_mod(decl("mod.cheats", "0.1.0", ModSide::Both));
        let mut mods = BTreeMap::new();
        mods.insert("mod.cheats".to_string(), ModPolicy::Simple(false));
        assert!(validate_join(&c, None, &options_with(mods)).is_err());
        // Absent banned mod is fine.
        let c2 = conn();
        let mut mods = BTreeMap::new();
        mods.insert("mod.cheats".to_string(), ModPolicy::Simple(false));
        assert!(validate_join(&c2, None, &options_with(mods)).is_ok());
    }

    #[test]
    fn version_range_enforced() {
        let mut c = conn();
        c.add_mod(decl("mod.a", "2.0.0", ModSide::Both));
        let mut mods = BTreeMap::new();
        mods.insert(
            "mod.a".to_string(),
            ModPolicy::Detailed(ModPolicyOptions {
                version: Some("1.0.x".to_string()),
                ..ModPolicyOptions::default()
            }),
        );
        assert!(validate_join(&c, None, &options_with(mods)).is_err());
    }

    #[test]
    fn optional_mod_may_be_absent() {
        let c = conn();
        let mut mods = BTreeMap::new();
        mods.insert(
            "mod.optional".to_string(),
            ModPolicy::Detailed(ModPolicyOptions {
                optional: true,
                ..ModPolicyOptions::default()
            }),
        );
        assert!(validate_join(&c, None, &options_with(mods)).is_ok());
    }

    #[test]
    fn extra_mods_rejected_when_configured() {
        let mut c = conn();
        c.add_mod(decl("mod.extra", "1.0.0", ModSide::Both));
        let options = ReactorOptions {
            allow_extra_mods: false,
            ..ReactorOptions::default()
        };
        assert!(validate_join(&c, None, &options).is_err());
    }

    #[test]
    fn host_mods_compared_both_ways() {
        let options = ReactorOptions {
            require_host_mods: true,
            ..ReactorOptions::default()
        };

        let mut host = conn();
        host.add_mod(decl("mod.sync", "1.0.0", ModSide::Both));

        // Joiner missing the host's mod.
        let joiner = conn();
        assert!(validate_join(&joiner, Some(&host), &options).is_err());

        // Joiner carrying a mod the host lacks.
        let mut joiner = conn();
        joiner.add_mod(decl("mod.sync", "1.0.0", ModSide::Both));
        joiner.add_mod(decl("mod.other", "1.0.0", ModSide::Serverside));
        assert!(validate_join(&joiner, Some(&host), &options).is_err());

        // Matching sets pass.
        let mut joiner = conn();
        joiner.add_mod(decl("mod.sync", "1.0.0", ModSide::Both));
        assert!(validate_join(&joiner, Some(&host), &options).is_ok());
    }

    #[test]
    fn client_side_only_skipped_when_blocked() {
        let options = ReactorOptions {
            require_host_mods: true,
            block_client_side_only: true,
            ..ReactorOptions::default()
        };
        let mut host = conn();
        host.add_mod(decl("mod.cosmetic", "1.0.0", ModSide::Clientside));
        let joiner = conn();
        assert!(validate_join(&joiner, Some(&host), &options).is_ok());
    }
}
