// Copyright (C) 2025, Cloudflare, Inc.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::time::Duration;
use std::time::Instant;

use crate::frame::AckBlock;
use crate::frame::AckFrame;
use crate::interval_set::IntervalSet;

/// Packet numbers received from the peer that this endpoint still has to
/// acknowledge, for a single packet number space.
#[derive(Clone, Debug)]
pub struct AckState {
    pub acks: IntervalSet,

    /// The largest packet number received so far.
    pub largest_received_packet_num: Option<u64>,

    /// When the largest packet number was received.
    pub largest_recv_packet_time: Option<Instant>,

    purge_threshold: u64,
}

impl AckState {
    pub fn new(purge_threshold: u64) -> Self {
        AckState {
            acks: IntervalSet::default(),
            largest_received_packet_num: None,
            largest_recv_packet_time: None,
            purge_threshold,
        }
    }

    /// Tracks a packet received from the peer.
    pub fn on_packet_received(&mut self, pkt_num: u64, now: Instant) {
        self.acks.push_item(pkt_num);

        if self
            .largest_received_packet_num
            .map_or(true, |largest| largest < pkt_num)
        {
            self.largest_received_packet_num = Some(pkt_num);
            self.largest_recv_packet_time = Some(now);
        }
    }

    /// Builds an ACK frame covering everything that is still tracked.
    pub fn ack_frame(&self, ack_delay: Duration) -> Option<AckFrame> {
        let largest_acked = self.acks.last()?;

        let blocks = self
            .acks
            .iter()
            .rev()
            .map(|r| AckBlock::new(*r.start(), *r.end()))
            .collect();

        Some(AckFrame {
            largest_acked,
            ack_delay,
            blocks,
        })
    }
}

/// Forgets the ranges of an ACK frame sent by this endpoint, once the
/// packet carrying it has been acknowledged by the peer.
///
/// The blocks are withdrawn from the lowest to the highest, then everything
/// more than `purge_threshold` packet numbers below the frame's largest
/// acknowledged packet is dropped as well, so the set stays bounded even if
/// some ACK frames are never confirmed.
///
/// This may withdraw the interval holding the largest received packet. Its
/// receive time is kept, and the next received packet refreshes it, as long
/// as the peer only ever increases its packet numbers.
pub fn common_ack_visitor_for_ack_frame(
    ack_state: &mut AckState, frame: &AckFrame,
) {
    for block in frame.blocks.iter().rev() {
        ack_state.acks.withdraw(block.start..=block.end);
    }

    if let Some(first) = frame.blocks.first() {
        let largest_acked = first.end;

        if largest_acked > ack_state.purge_threshold {
            ack_state
                .acks
                .withdraw(0..=largest_acked - ack_state.purge_threshold);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::recovery::ACK_PURGE_THRESHOLD;

    fn received(state: &mut AckState, pkts: &[u64], now: Instant) {
        for pn in pkts {
            state.on_packet_received(*pn, now);
        }
    }

    #[test]
    fn receive_tracks_largest() {
        let mut state = AckState::new(ACK_PURGE_THRESHOLD);
        let now = Instant::now();

        received(&mut state, &[3, 4, 1], now);
        assert_eq!(state.largest_received_packet_num, Some(4));
        assert_eq!(state.largest_recv_packet_time, Some(now));

        let later = now + Duration::from_millis(5);
        state.on_packet_received(2, later);
        assert_eq!(state.largest_recv_packet_time, Some(now));

        state.on_packet_received(9, later);
        assert_eq!(state.largest_received_packet_num, Some(9));
        assert_eq!(state.largest_recv_packet_time, Some(later));
    }

    #[test]
    fn ack_frame_blocks_descending() {
        let mut state = AckState::new(ACK_PURGE_THRESHOLD);
        assert_eq!(state.ack_frame(Duration::ZERO), None);

        received(&mut state, &[1, 2, 3, 7, 8, 12], Instant::now());

        let frame = state.ack_frame(Duration::from_micros(100)).unwrap();
        assert_eq!(frame.largest_acked, 12);
        assert_eq!(frame.blocks.as_slice(), &[
            AckBlock::new(12, 12),
            AckBlock::new(7, 8),
            AckBlock::new(1, 3),
        ]);
        assert_eq!(frame.ack_delay, Duration::from_micros(100));
    }

    #[test]
    fn withdraw_confirmed_blocks() {
        let mut state = AckState::new(ACK_PURGE_THRESHOLD);
        let now = Instant::now();

        received(&mut state, &[1, 2, 3, 7, 8], now);
        let sent = state.ack_frame(Duration::ZERO).unwrap();

        // More packets arrive before the ACK frame is confirmed.
        received(&mut state, &[9, 10], now);

        common_ack_visitor_for_ack_frame(&mut state, &sent);

        assert_eq!(state.acks.iter().collect::<Vec<_>>(), vec![9..=10]);
        assert_eq!(state.largest_received_packet_num, Some(10));
    }

    #[test]
    fn purge_below_threshold() {
        let mut state = AckState::new(ACK_PURGE_THRESHOLD);
        let now = Instant::now();

        received(&mut state, &[0, 1, 2, 5, 6, 18, 30, 31, 40], now);

        let confirmed = AckFrame::new(40, Duration::ZERO, &[
            AckBlock::new(40, 40),
            AckBlock::new(30, 31),
        ])
        .unwrap();

        common_ack_visitor_for_ack_frame(&mut state, &confirmed);

        // Everything at or below 40 - 10 = 30 is gone.
        assert!(state.acks.is_empty());

        received(&mut state, &[35, 41, 42], now);
        let confirmed =
            AckFrame::new(42, Duration::ZERO, &[AckBlock::new(42, 42)])
                .unwrap();

        common_ack_visitor_for_ack_frame(&mut state, &confirmed);

        assert_eq!(state.acks.iter().collect::<Vec<_>>(), vec![
            35..=35,
            41..=41
        ]);
    }

    #[test]
    fn no_purge_under_threshold() {
        let mut state = AckState::new(ACK_PURGE_THRESHOLD);

        received(&mut state, &[0, 1, 2, 9], Instant::now());

        let confirmed =
            AckFrame::new(9, Duration::ZERO, &[AckBlock::new(9, 9)]).unwrap();

        common_ack_visitor_for_ack_frame(&mut state, &confirmed);

        assert_eq!(state.acks.iter().collect::<Vec<_>>(), vec![0..=2]);
    }
}
