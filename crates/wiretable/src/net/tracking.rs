use std::collections::VecDeque;

use super::protocol::{PacketHeader, sequence_greater_than};

/// Remembers recent incoming sequences so duplicates can be dropped, and
/// builds the ack fields echoed back to the peer.
#[derive(Debug)]
pub struct ReceiveTracker {
    last_received: u32,
    received_bitfield: u32,
    recent_sequences: VecDeque<u32>,
    max_recent: usize,
}

impl Default for ReceiveTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveTracker {
    pub fn new() -> Self {
        Self {
            last_received: 0,
            received_bitfield: 0,
            recent_sequences: VecDeque::with_capacity(128),
            max_recent: 128,
        }
    }

    pub fn record_received(&mut self, sequence: u32) -> bool {
        if self.recent_sequences.contains(&sequence) {
            return false;
        }

        if self.recent_sequences.len() >= self.max_recent {
            self.recent_sequences.pop_front();
        }
        self.recent_sequences.push_back(sequence);

        if sequence_greater_than(sequence, self.last_received) {
            let diff = sequence.wrapping_sub(self.last_received);
            if diff <= 32 {
                // Bit k-1 marks `last_received - k`.
                self.received_bitfield =
                    self.received_bitfield.checked_shl(diff).unwrap_or(0) | (1 << (diff - 1));
            } else {
                self.received_bitfield = 0;
            }
            self.last_received = sequence;
        } else {
            let diff = self.last_received.wrapping_sub(sequence);
            if diff > 0 && diff <= 32 {
                self.received_bitfield |= 1 << (diff - 1);
            }
        }

        true
    }

    pub fn ack_data(&self) -> (u32, u32) {
        (self.last_received, self.received_bitfield)
    }
}

/// Sequence numbering and duplicate filtering for one side of a connected
/// channel. Delivery of table data is confirmed by tick acks, not by these
/// packet acks.
#[derive(Debug)]
pub struct PacketSequencer {
    send_sequence: u32,
    receive_tracker: ReceiveTracker,
}

impl Default for PacketSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketSequencer {
    pub fn new() -> Self {
        Self {
            // Zero doubles as "nothing received yet" in acks.
            send_sequence: 1,
            receive_tracker: ReceiveTracker::new(),
        }
    }

    /// Header for the next outgoing packet, piggybacking our acks.
    pub fn next_header(&mut self) -> PacketHeader {
        let sequence = self.send_sequence;
        self.send_sequence = self.send_sequence.wrapping_add(1).max(1);

        let (ack, ack_bitfield) = self.receive_tracker.ack_data();
        PacketHeader::new(sequence, ack, ack_bitfield)
    }

    /// Records an incoming header. Returns false for duplicates, which the
    /// caller should discard.
    pub fn process_header(&mut self, header: &PacketHeader) -> bool {
        self.receive_tracker.record_received(header.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_tracker_bitfield() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(1);
        tracker.record_received(2);
        tracker.record_received(3);

        let (ack, bitfield) = tracker.ack_data();
        assert_eq!(ack, 3);
        assert_eq!(bitfield & 0b11, 0b11);
    }

    #[test]
    fn test_receive_tracker_out_of_order() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(3);
        tracker.record_received(1);
        tracker.record_received(2);

        let (ack, bitfield) = tracker.ack_data();
        assert_eq!(ack, 3);
        assert_eq!(bitfield & 0b11, 0b11);
    }

    #[test]
    fn test_duplicate_detection() {
        let mut tracker = ReceiveTracker::new();

        assert!(tracker.record_received(1));
        assert!(!tracker.record_received(1));
        assert!(tracker.record_received(2));
    }

    #[test]
    fn test_sequencer_exchange() {
        let mut server = PacketSequencer::new();
        let mut client = PacketSequencer::new();

        let first = server.next_header();
        let second = server.next_header();
        assert_eq!((first.sequence, second.sequence), (1, 2));

        assert!(client.process_header(&second));
        assert!(client.process_header(&first));
        assert!(!client.process_header(&first));

        let reply = client.next_header();
        assert_eq!(reply.ack, 2);
        assert_eq!(reply.ack_bitfield & 1, 1);

        assert!(server.process_header(&reply));
        assert!(!server.process_header(&reply));
    }

    #[test]
    fn test_sequence_skips_zero_on_wrap() {
        let mut sequencer = PacketSequencer::new();
        sequencer.send_sequence = u32::MAX;
        assert_eq!(sequencer.next_header().sequence, u32::MAX);
        assert_eq!(sequencer.next_header().sequence, 1);
    }
}
