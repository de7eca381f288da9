//! Filtered sub-views of a room.
//!
//! A perspective lets a subset of players see an altered stream
//! without changing base-room state. Children a member sends pass
//! through the perspective's decoder first, then its outgoing filter
//! decides what reaches the base room; the perspective's own members
//! still see everything the decoder let through. Cancellation is
//! two-phase: the decoder verdict and the outgoing verdict apply to
//! independent copies of each child.

use std::collections::{BTreeSet, HashSet};

use crate::protocol::packet::GameDataMessage;

/// Predicate over game-data children. Cancels a child when its tag,
/// or its rpc call id, is in the blocked set.
#[derive(Debug, Default, Clone)]
pub struct MessageFilter {
    pub blocked_tags: HashSet<u8>,
    pub blocked_rpc_calls: HashSet<u8>,
}

impl MessageFilter {
    pub fn cancels(&self, child: &GameDataMessage) -> bool {
        if self.blocked_tags.contains(&child.tag()) {
            return true;
        }
        if let GameDataMessage::Rpc(rpc) = child {
            if self.blocked_rpc_calls.contains(&rpc.call_id) {
                return true;
            }
        }
        false
    }

    pub fn block_rpc(mut self, call_id: u8) -> Self {
        self.blocked_rpc_calls.insert(call_id);
        self
    }

    pub fn block_tag(mut self, tag: u8) -> Self {
        self.blocked_tags.insert(tag);
        self
    }
}

#[derive(Debug)]
pub struct Perspective {
    pub players: BTreeSet<i32>,
    /// Applied while decoding children a member sends (phase one).
    pub incoming_filter: MessageFilter,
    /// Applied before surviving children reach the base room
    /// (phase two).
    pub outgoing_filter: MessageFilter,
}

impl Perspective {
    pub fn new(players: impl IntoIterator<Item = i32>) -> Self {
        Self {
            players: players.into_iter().collect(),
            incoming_filter: MessageFilter::default(),
            outgoing_filter: MessageFilter::default(),
        }
    }

    pub fn with_outgoing_filter(mut self, filter: MessageFilter) -> Self {
        self.outgoing_filter = filter;
        self
    }

    pub fn contains(&self, client_id: i32) -> bool {
        self.players.contains(&client_id)
    }
}
