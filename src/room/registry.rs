//! Room allocation and lifecycle.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::protocol::packet::GameSettings;
use crate::protocol::types::code::CodeScheme;
use crate::protocol::types::GameCode;

use super::{Room, RoomState};

#[derive(Debug, thiserror::Error)]
pub enum CreateRoomError {
    #[error("game code {0} is already in use")]
    CodeInUse(GameCode),
}

/// Owns every live room, keyed by game code.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: HashMap<GameCode, Room>,
    scheme: CodeScheme,
    rng: StdRng,
}

impl RoomRegistry {
    pub fn new(scheme: CodeScheme) -> Self {
        Self {
            rooms: HashMap::new(),
            scheme,
            rng: StdRng::from_entropy(),
        }
    }

    /// Draws an unused code under the configured scheme. The
    /// reserved local value is never produced.
    pub fn generate_code(&mut self) -> GameCode {
        loop {
            let code = GameCode::random(self.scheme, &mut self.rng);
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    pub fn create_room(
        &mut self,
        code: GameCode,
        settings: GameSettings,
        now: Instant,
    ) -> Result<&mut Room, CreateRoomError> {
        if self.rooms.contains_key(&code) {
            return Err(CreateRoomError::CodeInUse(code));
        }
        info!(%code, "room created");
        Ok(self
            .rooms
            .entry(code)
            .or_insert_with(|| Room::new(code, settings, now)))
    }

    pub fn get(&self, code: &GameCode) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn get_mut(&mut self, code: &GameCode) -> Option<&mut Room> {
        self.rooms.get_mut(code)
    }

    /// Marks the room destroyed and detaches it from the registry.
    /// Member connections are not touched; the caller detaches them.
    pub fn destroy(&mut self, code: &GameCode) -> Option<Room> {
        let mut room = self.rooms.remove(code)?;
        room.state = RoomState::Destroyed;
        info!(%code, "room destroyed");
        Some(room)
    }

    /// Rooms that have sat empty past the grace period.
    pub fn sweep_empty(&mut self, now: Instant, grace: Duration) -> Vec<GameCode> {
        let expired: Vec<GameCode> = self
            .rooms
            .values()
            .filter(|room| {
                room.empty_since
                    .map(|since| now.duration_since(since) >= grace)
                    .unwrap_or(false)
            })
            .map(|room| room.code)
            .collect();
        for code in &expired {
            self.destroy(code);
        }
        expired
    }

    /// Publicly listable rooms: everything but the reserved local
    /// lobby.
    pub fn listable(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values().filter(|room| !room.code.is_local())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
