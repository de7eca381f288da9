//! Nonce bookkeeping, ack tracking and the retransmit/keepalive tick.
//!
//! This layer owns no sockets. Every operation returns the bytes the
//! transport should put on the wire, so the whole state machine is
//! exercisable without I/O.

use std::time::Instant;

use bytes::Bytes;

use crate::protocol::constants::{RECEIVED_WINDOW, RESEND_AFTER, SENT_WINDOW};
use crate::protocol::packet::{GameMessage, RootPacket};

use super::{Connection, SentPacket};

/// Verdict on an inbound nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceOutcome {
    /// First sighting; process the packet.
    Fresh,
    /// Already seen (or reordered behind the window); drop the body
    /// but still acknowledge.
    Duplicate,
}

/// What the transport should do after a reliability tick.
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Datagrams to (re)send, keepalive ping included.
    pub send: Vec<Bytes>,
    /// The in-flight window is saturated with unacked packets; the
    /// connection should be dropped.
    pub dead: bool,
}

impl Connection {
    fn next_nonce(&mut self) -> u16 {
        self.next_nonce = self.next_nonce.wrapping_add(1);
        self.next_nonce
    }

    fn track(&mut self, nonce: u16, bytes: Bytes, now: Instant) {
        self.in_flight.push_front(SentPacket {
            nonce,
            bytes,
            sent_at: now,
            acked: false,
        });
        self.in_flight.truncate(SENT_WINDOW);
    }

    /// Serializes `children` as a Reliable packet under a fresh nonce
    /// and tracks it for retransmission.
    pub fn prepare_reliable(&mut self, children: Vec<GameMessage>, now: Instant) -> Bytes {
        let nonce = self.next_nonce();
        let bytes = RootPacket::Reliable { nonce, children }.to_bytes();
        self.track(nonce, bytes.clone(), now);
        bytes
    }

    /// Serializes `children` as an unreliable frame; nothing is
    /// tracked.
    pub fn prepare_unreliable(&self, children: Vec<GameMessage>) -> Bytes {
        RootPacket::Unreliable { children }.to_bytes()
    }

    /// Serializes a nonce-bearing packet produced by `build` and
    /// tracks it. Used for keepalive pings.
    pub fn prepare_tracked(&mut self, build: impl FnOnce(u16) -> RootPacket, now: Instant) -> Bytes {
        let nonce = self.next_nonce();
        let bytes = build(nonce).to_bytes();
        self.track(nonce, bytes.clone(), now);
        bytes
    }

    /// Applies an inbound nonce: dedupe check, window update, and the
    /// Acknowledge that must go straight back.
    ///
    /// `process_anyway` is the documented exception for reliable
    /// packets carrying a mod declaration: known-broken clients send
    /// those under nonce 0, which would otherwise always be
    /// suppressed as a duplicate.
    pub fn accept_nonce(&mut self, nonce: u16, process_anyway: bool) -> (NonceOutcome, Bytes) {
        let ack = RootPacket::Ack {
            nonce,
            missing: self.missing_mask(nonce),
        }
        .to_bytes();

        if nonce <= self.last_seen_nonce && !(nonce == 0 && process_anyway) {
            return (NonceOutcome::Duplicate, ack);
        }

        if nonce > self.last_seen_nonce {
            self.last_seen_nonce = nonce;
        }
        self.received_nonces.push_front(nonce);
        self.received_nonces.truncate(RECEIVED_WINDOW);
        (NonceOutcome::Fresh, ack)
    }

    /// Bit i set means nonce−i−1 is absent from the received window.
    /// Nonces below 1 never existed and are not reported missing.
    fn missing_mask(&self, nonce: u16) -> u8 {
        let mut mask = 0u8;
        for i in 0..8u16 {
            let wanted = match nonce.checked_sub(i + 1) {
                Some(n) if n >= 1 => n,
                _ => break,
            };
            if !self.received_nonces.contains(&wanted) {
                mask |= 1 << i;
            }
        }
        mask
    }

    /// Marks the matching in-flight packet acked and updates the
    /// round-trip estimate. Unknown nonces are ignored.
    pub fn handle_ack(&mut self, nonce: u16, now: Instant) {
        if let Some(sent) = self
            .in_flight
            .iter_mut()
            .find(|sent| sent.nonce == nonce && !sent.acked)
        {
            sent.acked = true;
            self.round_trip = Some(now.duration_since(sent.sent_at));
        }
    }

    /// One reliability tick: keepalive ping, retransmits, liveness
    /// verdict.
    pub fn reliability_tick(&mut self, now: Instant) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        let ping = self.prepare_tracked(|nonce| RootPacket::Ping { nonce }, now);
        outcome.send.push(ping);

        for sent in self.in_flight.iter_mut() {
            if !sent.acked && now.duration_since(sent.sent_at) > RESEND_AFTER {
                sent.sent_at = now;
                outcome.send.push(sent.bytes.clone());
            }
        }

        if self.in_flight.len() == SENT_WINDOW && self.in_flight.iter().all(|sent| !sent.acked) {
            outcome.dead = true;
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::protocol::packet::Direction;
    use crate::protocol::types::GameCode;

    fn conn() -> Connection {
        Connection::new(1, "127.0.0.1:9999".parse().unwrap())
    }

    fn start_game() -> GameMessage {
        GameMessage::StartGame {
            code: GameCode::from_raw(0x41414141),
        }
    }

    #[test]
    fn nonces_start_at_one_and_increase() {
        let mut c = conn();
        let now = Instant::now();
        c.prepare_reliable(vec![start_game()], now);
        c.prepare_reliable(vec![start_game()], now);
        assert_eq!(c.in_flight.len(), 2);
        // Newest first.
        assert_eq!(c.in_flight[0].nonce, 2);
        assert_eq!(c.in_flight[1].nonce, 1);
    }

    #[test]
    fn in_flight_window_is_bounded() {
        let mut c = conn();
        let now = Instant::now();
        for _ in 0..12 {
            c.prepare_reliable(vec![start_game()], now);
        }
        assert_eq!(c.in_flight.len(), SENT_WINDOW);
        assert_eq!(c.in_flight[0].nonce, 12);
        // The oldest four were discarded.
        assert_eq!(c.in_flight[SENT_WINDOW - 1].nonce, 5);
    }

    #[test]
    fn duplicate_nonce_still_acked() {
        let mut c = conn();
        let (first, ack1) = c.accept_nonce(5, false);
        let (second, ack2) = c.accept_nonce(5, false);
        assert_eq!(first, NonceOutcome::Fresh);
        assert_eq!(second, NonceOutcome::Duplicate);

        for ack in [ack1, ack2] {
            let mut slice = ack.clone();
            match RootPacket::decode(&mut slice, Direction::Clientbound).unwrap() {
                RootPacket::Ack { nonce, .. } => assert_eq!(nonce, 5),
                other => panic!("expected ack, got {other:?}"),
            }
        }
    }

    #[test]
    fn last_seen_nonce_non_decreasing() {
        let mut c = conn();
        c.accept_nonce(3, false);
        assert_eq!(c.last_seen_nonce, 3);
        let (outcome, _) = c.accept_nonce(2, false);
        assert_eq!(outcome, NonceOutcome::Duplicate);
        assert_eq!(c.last_seen_nonce, 3);
        c.accept_nonce(7, false);
        assert_eq!(c.last_seen_nonce, 7);
    }

    #[test]
    fn nonce_zero_mod_declaration_exception() {
        let mut c = conn();
        c.accept_nonce(4, false);
        // Ordinary nonce 0 is a duplicate...
        let (plain, _) = c.accept_nonce(0, false);
        assert_eq!(plain, NonceOutcome::Duplicate);
        // ...but a mod declaration under nonce 0 is processed.
        let (excepted, _) = c.accept_nonce(0, true);
        assert_eq!(excepted, NonceOutcome::Fresh);
        assert_eq!(c.last_seen_nonce, 4);
    }

    #[test]
    fn ack_records_round_trip() {
        let mut c = conn();
        let now = Instant::now();
        c.prepare_reliable(vec![start_game()], now);
        c.handle_ack(1, now + Duration::from_millis(40));
        assert!(c.in_flight[0].acked);
        assert_eq!(c.round_trip, Some(Duration::from_millis(40)));
    }

    #[test]
    fn tick_retransmits_stale_unacked() {
        let mut c = conn();
        let start = Instant::now();
        let original = c.prepare_reliable(vec![start_game()], start);

        // Young packet: ping only.
        let outcome = c.reliability_tick(start + Duration::from_millis(100));
        assert_eq!(outcome.send.len(), 1);
        assert!(!outcome.dead);

        // Stale packet: ping + identical bytes, sent_at reset.
        let later = start + Duration::from_millis(700);
        let outcome = c.reliability_tick(later);
        assert!(outcome.send.iter().any(|b| b[..] == original[..]));
        let resent = c.in_flight.iter().find(|s| s.nonce == 1).unwrap();
        assert_eq!(resent.sent_at, later);
    }

    #[test]
    fn saturated_window_declares_dead() {
        let mut c = conn();
        let start = Instant::now();
        let mut now = start;
        let mut dead = false;
        for _ in 0..SENT_WINDOW + 1 {
            now += Duration::from_millis(2000);
            let outcome = c.reliability_tick(now);
            if outcome.dead {
                dead = true;
                break;
            }
        }
        assert!(dead, "eight unacked packets should kill the connection");
    }

    #[test]
    fn acked_packet_not_retransmitted() {
        let mut c = conn();
        let start = Instant::now();
        c.prepare_reliable(vec![start_game()], start);
        c.handle_ack(1, start + Duration::from_millis(10));
        let outcome = c.reliability_tick(start + Duration::from_millis(800));
        // Only the keepalive ping goes out.
        assert_eq!(outcome.send.len(), 1);
    }

    #[test]
    fn missing_mask_reports_window_gaps() {
        let mut c = conn();
        c.accept_nonce(1, false);
        c.accept_nonce(2, false);
        let (_, ack) = c.accept_nonce(4, false);
        let mut slice = ack;
        match RootPacket::decode(&mut slice, Direction::Clientbound).unwrap() {
            RootPacket::Ack { nonce, missing } => {
                assert_eq!(nonce, 4);
                // nonce-1 (=3) is missing; nonce-2 (=2) and nonce-3
                // (=1) were received; nothing below nonce 1 exists.
                assert_ne!(missing & 0b0000_0001, 0);
                assert_eq!(missing & 0b0000_0010, 0);
                assert_eq!(missing & 0b0000_0100, 0);
                assert_eq!(missing & 0b1111_1000, 0);
            }
            other => panic!("expected ack, got {other:?}"),
        }
    }
}
