//! Narrow pre-operation hooks.
//!
//! Collaborators (the out-of-scope plugin host, tests) can veto or
//! alter a join or room creation before the relay commits to it.
//! One explicit method per operation keeps control flow and
//! authorship obvious; this is deliberately not a pub/sub bus.

use crate::protocol::packet::{DisconnectReason, GameSettings};
use crate::room::Room;

/// Verdict of a pre-operation hook.
#[derive(Debug, Default)]
pub struct HookOutcome {
    pub cancel: bool,
    /// Reason handed to the client when canceled; a generic one is
    /// used when absent.
    pub reason: Option<DisconnectReason>,
}

impl HookOutcome {
    pub fn proceed() -> Self {
        Self::default()
    }

    pub fn cancel_with(reason: DisconnectReason) -> Self {
        Self {
            cancel: true,
            reason: Some(reason),
        }
    }
}

pub trait RelayHooks {
    /// Runs before a room is created. The settings may be altered in
    /// place.
    fn before_create(&mut self, _settings: &mut GameSettings) -> HookOutcome {
        HookOutcome::proceed()
    }

    /// Runs before a connection is admitted into a room.
    fn before_join(&mut self, _room: &Room, _client_id: i32) -> HookOutcome {
        HookOutcome::proceed()
    }
}

/// Default no-op hook set.
#[derive(Debug, Default)]
pub struct NoHooks;

impl RelayHooks for NoHooks {}
