//! Receive-side ARQ state machine.
//!
//! [`Receiver`] enforces the delivery contract:
//!
//! - Only the **expected** DATA packet (`id == next_expected_id`) is
//!   delivered upward; delivery is strictly in id order with no duplicates.
//! - A packet **behind** the expectation pointer was already delivered — its
//!   ack evidently got lost, so it is re-acked (never re-delivered) to let
//!   the sender make progress.
//! - A packet **ahead** of the expectation pointer is discarded without an
//!   ack; the sender's timeout will recover the missing lower id first.  No
//!   reorder buffer is kept — a modest throughput cost for a much simpler
//!   receiver.
//!
//! Corrupt datagrams never reach this module: the decode step discards them,
//! and the absence of an ack makes corruption indistinguishable from loss.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility (same pattern as [`crate::sender`]).

use crate::packet::{Packet, PacketKind};

/// What the caller must do with one inbound DATA packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvOutcome {
    /// The expected packet: hand `payload` to the application and ack `id`.
    Deliver { id: u64, payload: Vec<u8> },
    /// Already-delivered id: ack `id` again, deliver nothing.
    AckDuplicate { id: u64 },
    /// Ahead of expectation (or not a DATA packet): drop, no ack.
    Discard,
}

/// Receive-side state for one session.
#[derive(Debug)]
pub struct Receiver {
    /// Lowest id not yet delivered to the application.
    ///
    /// Ids below this are the de-duplication record: with in-order-only
    /// acceptance, "already delivered" is exactly `id < next_expected_id`,
    /// so no set of seen ids needs to be kept.
    next_expected_id: u64,
}

impl Receiver {
    /// Create a receiver expecting the session's first id.
    pub fn new() -> Self {
        Self {
            next_expected_id: 1,
        }
    }

    /// Classify one validly decoded inbound packet.
    pub fn on_packet(&mut self, packet: Packet) -> RecvOutcome {
        if packet.kind != PacketKind::Data {
            // The receiving role consumes DATA; a stray ACK means both roles
            // share a port on the remote end.  Nothing to do with it here.
            return RecvOutcome::Discard;
        }
        self.on_data(packet.id, packet.payload)
    }

    /// Classify a DATA packet by its position relative to the expectation
    /// pointer.
    pub fn on_data(&mut self, id: u64, payload: Vec<u8>) -> RecvOutcome {
        if id == self.next_expected_id {
            self.next_expected_id += 1;
            RecvOutcome::Deliver { id, payload }
        } else if id < self.next_expected_id {
            RecvOutcome::AckDuplicate { id }
        } else {
            RecvOutcome::Discard
        }
    }

    /// Lowest id not yet delivered.
    pub fn next_expected_id(&self) -> u64 {
        self.next_expected_id
    }

    /// Number of packets delivered so far.
    pub fn delivered(&self) -> u64 {
        self.next_expected_id - 1
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state() {
        let r = Receiver::new();
        assert_eq!(r.next_expected_id(), 1);
        assert_eq!(r.delivered(), 0);
    }

    #[test]
    fn expected_packet_delivered_and_pointer_advances() {
        let mut r = Receiver::new();
        let out = r.on_data(1, b"hello".to_vec());
        assert_eq!(
            out,
            RecvOutcome::Deliver {
                id: 1,
                payload: b"hello".to_vec()
            }
        );
        assert_eq!(r.next_expected_id(), 2);
    }

    #[test]
    fn sequence_delivers_in_order() {
        let mut r = Receiver::new();
        for id in 1..=5u64 {
            let out = r.on_data(id, vec![id as u8]);
            assert!(matches!(out, RecvOutcome::Deliver { .. }));
        }
        assert_eq!(r.delivered(), 5);
    }

    #[test]
    fn duplicate_is_reacked_not_redelivered() {
        let mut r = Receiver::new();
        r.on_data(1, b"once".to_vec());

        let out = r.on_data(1, b"once".to_vec());
        assert_eq!(out, RecvOutcome::AckDuplicate { id: 1 });
        assert_eq!(r.next_expected_id(), 2, "duplicate must not move the pointer");
    }

    #[test]
    fn ahead_of_expectation_discarded_without_ack() {
        let mut r = Receiver::new();
        let out = r.on_data(3, b"early".to_vec());
        assert_eq!(out, RecvOutcome::Discard);
        assert_eq!(r.next_expected_id(), 1);
    }

    #[test]
    fn gap_then_fill_resumes_delivery() {
        let mut r = Receiver::new();
        assert!(matches!(r.on_data(1, b"a".to_vec()), RecvOutcome::Deliver { .. }));
        // id 3 overtakes id 2 in the network: dropped, no ack.
        assert_eq!(r.on_data(3, b"c".to_vec()), RecvOutcome::Discard);
        // The retransmitted id 2 fills the gap.
        assert!(matches!(r.on_data(2, b"b".to_vec()), RecvOutcome::Deliver { .. }));
        // And id 3's own retransmission is now in order.
        assert!(matches!(r.on_data(3, b"c".to_vec()), RecvOutcome::Deliver { .. }));
        assert_eq!(r.delivered(), 3);
    }

    #[test]
    fn stray_ack_packet_discarded() {
        let mut r = Receiver::new();
        assert_eq!(r.on_packet(Packet::ack(1)), RecvOutcome::Discard);
        assert_eq!(r.next_expected_id(), 1);
    }

    #[test]
    fn data_packet_via_on_packet() {
        let mut r = Receiver::new();
        let out = r.on_packet(Packet::data(1, b"payload".to_vec()));
        assert!(matches!(out, RecvOutcome::Deliver { .. }));
    }
}
