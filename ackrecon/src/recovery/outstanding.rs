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

use std::collections::HashSet;
use std::collections::VecDeque;

use crate::packet::Epoch;
use crate::Error;
use crate::Result;

use super::PacketEvent;
use super::Sent;

/// The ledger of outstanding packets across all packet number spaces.
///
/// Packets of different spaces are interleaved in send order. Within a
/// space, packet numbers strictly increase.
#[derive(Default)]
pub struct Outstandings {
    pub(crate) packets: VecDeque<Sent>,

    pub(crate) initial_packets_count: usize,

    pub(crate) handshake_packets_count: usize,

    /// Number of packets in the ledger carrying an associated event.
    pub(crate) cloned_packets_count: usize,

    /// Events whose payload has not been acked nor declared lost yet.
    pub(crate) packet_events: HashSet<PacketEvent>,
}

impl Outstandings {
    /// Appends a newly sent packet.
    ///
    /// Handshake packets are only counted for the first packet carrying a
    /// given event, so that the counters match what acknowledgement will
    /// subtract.
    pub fn push(&mut self, pkt: Sent) -> Result<()> {
        if let Some(idx) = self.last_packet_index(pkt.epoch) {
            if self.packets[idx].pkt_num >= pkt.pkt_num {
                return Err(Error::InvalidPacketNumber);
            }
        }

        if pkt.is_handshake && pkt.epoch == Epoch::Application {
            return Err(Error::InvalidState);
        }

        let first_of_event = match pkt.associated_event {
            Some(event) => {
                self.cloned_packets_count += 1;

                self.packet_events.insert(event)
            },

            None => true,
        };

        if pkt.is_handshake && first_of_event {
            match pkt.epoch {
                Epoch::Initial => self.initial_packets_count += 1,

                Epoch::Handshake => self.handshake_packets_count += 1,

                Epoch::Application => unreachable!(),
            }
        }

        self.packets.push_back(pkt);

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Sent> {
        self.packets.iter()
    }

    pub fn initial_packets_count(&self) -> usize {
        self.initial_packets_count
    }

    pub fn handshake_packets_count(&self) -> usize {
        self.handshake_packets_count
    }

    pub fn cloned_packets_count(&self) -> usize {
        self.cloned_packets_count
    }

    pub fn packet_events(&self) -> &HashSet<PacketEvent> {
        &self.packet_events
    }

    /// Returns whether acking or losing `pkt` still has to be processed,
    /// i.e. no other transmission of the same payload was handled first.
    pub fn needs_process(&self, pkt: &Sent) -> bool {
        pkt.associated_event
            .map_or(true, |event| self.packet_events.contains(&event))
    }

    /// Index of the most recently sent packet of `epoch`.
    pub(crate) fn last_packet_index(&self, epoch: Epoch) -> Option<usize> {
        self.packets.iter().rposition(|p| p.epoch == epoch)
    }

    /// One past the index of the newest packet of `epoch` in `[0, end)` with
    /// a packet number at most `pkt_num`, or 0 if there is none.
    ///
    /// Packet numbers only grow within a space, so other spaces' packets are
    /// stepped over rather than compared.
    pub(crate) fn upper_bound(
        &self, end: usize, epoch: Epoch, pkt_num: u64,
    ) -> usize {
        let mut idx = end;

        while idx > 0 {
            let pkt = &self.packets[idx - 1];

            if pkt.epoch == epoch && pkt.pkt_num <= pkt_num {
                break;
            }

            idx -= 1;
        }

        idx
    }

    /// Applies the counter changes of a fully processed ACK frame.
    pub(crate) fn on_packets_acked(
        &mut self, initial: usize, handshake: usize, cloned: usize,
    ) {
        assert!(
            self.initial_packets_count >= initial,
            "acked {} initial packets, {} outstanding",
            initial,
            self.initial_packets_count
        );
        assert!(
            self.handshake_packets_count >= handshake,
            "acked {} handshake packets, {} outstanding",
            handshake,
            self.handshake_packets_count
        );
        assert!(
            self.cloned_packets_count >= cloned,
            "acked {} cloned packets, {} outstanding",
            cloned,
            self.cloned_packets_count
        );

        self.initial_packets_count -= initial;
        self.handshake_packets_count -= handshake;
        self.cloned_packets_count -= cloned;

        self.check_counts();
    }

    /// Removes the packet at `idx` after it was declared lost.
    ///
    /// Returns the packet and whether its loss still has to be processed.
    pub(crate) fn remove_lost(&mut self, idx: usize) -> Option<(Sent, bool)> {
        let pkt = self.packets.remove(idx)?;

        let needs_process = self.needs_process(&pkt);

        if pkt.is_handshake && needs_process {
            let count = match pkt.epoch {
                Epoch::Initial => &mut self.initial_packets_count,

                Epoch::Handshake => &mut self.handshake_packets_count,

                Epoch::Application => panic!(
                    "handshake packet {} in application space",
                    pkt.pkt_num
                ),
            };

            assert!(*count > 0, "lost untracked handshake packet");
            *count -= 1;
        }

        if let Some(event) = pkt.associated_event {
            assert!(self.cloned_packets_count > 0, "lost untracked clone");
            self.cloned_packets_count -= 1;

            self.packet_events.remove(&event);
        }

        self.check_counts();

        Some((pkt, needs_process))
    }

    fn check_counts(&self) {
        assert!(
            self.packets.len() >=
                self.initial_packets_count + self.handshake_packets_count,
            "handshake counters exceed {} outstanding packets",
            self.packets.len()
        );
        assert!(
            self.packets.len() >= self.cloned_packets_count,
            "cloned counter exceeds {} outstanding packets",
            self.packets.len()
        );
    }
}
