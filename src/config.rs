use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};
use tracing::warn;

use crate::protocol::types::code::CodeScheme;
use crate::protocol::ClientVersion;

const DEFAULT_CONFIG_PATH: &str = "config/hazeld.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub socket: SocketConfig,
    /// Accepted client version strings, e.g. `"2021.6.30"`.
    pub versions: Vec<String>,
    pub rooms: RoomsConfig,
    pub reactor: ReactorConfig,
    pub optimizations: OptimizationsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SocketConfig {
    pub port: u16,
    /// Forward game-data children with unrecognised tags instead of
    /// dropping them.
    pub accept_unknown_game_data: bool,
    /// Reserved; parsed but not acted on.
    pub message_ordering: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            port: 22023,
            accept_unknown_game_data: false,
            message_ordering: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameCodeScheme {
    V1,
    V2,
}

impl From<GameCodeScheme> for CodeScheme {
    fn from(scheme: GameCodeScheme) -> Self {
        match scheme {
            GameCodeScheme::V1 => CodeScheme::V1,
            GameCodeScheme::V2 => CodeScheme::V2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoomsConfig {
    pub game_codes: GameCodeScheme,
    /// Enable the `/`-prefixed chat command dispatcher.
    pub chat_commands: bool,
    pub server_as_host: bool,
    /// Seconds an empty room is kept alive before being swept.
    pub create_timeout: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            game_codes: GameCodeScheme::V2,
            chat_commands: true,
            server_as_host: false,
            create_timeout: 10,
        }
    }
}

/// Mod-framework policy. `reactor = false` rejects modded clients,
/// `reactor = true` accepts them with default options, and a table
/// form spells the options out.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ReactorConfig {
    Enabled(bool),
    Detailed(ReactorOptions),
}

impl Default for ReactorConfig {
    fn default() -> Self {
        ReactorConfig::Enabled(false)
    }
}

impl ReactorConfig {
    pub fn enabled(&self) -> bool {
        !matches!(self, ReactorConfig::Enabled(false))
    }

    /// Effective options; `reactor = true` maps to the defaults.
    pub fn options(&self) -> Option<ReactorOptions> {
        match self {
            ReactorConfig::Enabled(false) => None,
            ReactorConfig::Enabled(true) => Some(ReactorOptions::default()),
            ReactorConfig::Detailed(options) => Some(options.clone()),
        }
    }

    pub fn allow_normal_clients(&self) -> bool {
        match self {
            ReactorConfig::Enabled(true) => false,
            ReactorConfig::Enabled(false) => true,
            ReactorConfig::Detailed(options) => options.allow_normal_clients,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReactorOptions {
    pub allow_normal_clients: bool,
    /// Joiners must carry the host's non-client-side mods and vice
    /// versa.
    pub require_host_mods: bool,
    /// Skip client-side-only mods during host-mod comparison.
    pub block_client_side_only: bool,
    /// Accept client mods absent from the `mods` table.
    pub allow_extra_mods: bool,
    pub mods: BTreeMap<String, ModPolicy>,
    /// Server plugins mirrored as mods during the handshake.
    pub plugins: Vec<PluginMirror>,
}

impl Default for ReactorOptions {
    fn default() -> Self {
        Self {
            allow_normal_clients: false,
            require_host_mods: false,
            block_client_side_only: false,
            allow_extra_mods: true,
            mods: BTreeMap::new(),
            plugins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ModPolicy {
    /// `true` = required, `false` = banned.
    Simple(bool),
    Detailed(ModPolicyOptions),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct ModPolicyOptions {
    /// Version requirement: exact, `"1.2.x"` prefix wildcard, or
    /// `"any"` / `"*"`.
    pub version: Option<String>,
    pub banned: bool,
    pub optional: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PluginMirror {
    pub id: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct OptimizationsConfig {
    pub disable_perspectives: bool,
    pub movement: MovementConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MovementConfig {
    pub reuse_buffer: bool,
    pub update_rate: u32,
    pub vision_checks: bool,
    pub dead_checks: bool,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            reuse_buffer: true,
            update_rate: 1,
            vision_checks: false,
            dead_checks: true,
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Self {
        Self::load_from_path(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from an explicit path, falling back to
    /// defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    Config::default()
                }
            },
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                } else {
                    warn!("Config not found at {}. Using defaults", path.display());
                }
                Config::default()
            }
        }
    }

    /// Accepted client versions, skipping (and logging) entries that
    /// fail to parse. An empty config list accepts any version.
    pub fn accepted_versions(&self) -> Vec<ClientVersion> {
        self.versions
            .iter()
            .filter_map(|raw| match raw.parse() {
                Ok(version) => Some(version),
                Err(err) => {
                    warn!("Ignoring bad version entry {raw:?}: {err}");
                    None
                }
            })
            .collect()
    }
}
