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

use std::cmp;
use std::time::Instant;

use crate::frame::Frame;
use crate::packet::Epoch;

use super::congestion::AckEvent;
use super::Recovery;
use super::Sent;
use super::PERSISTENT_CONGESTION_THRESHOLD;
use super::TIME_THRESHOLD_DIVIDEND;
use super::TIME_THRESHOLD_DIVISOR;

/// Packets declared lost while handling a single ACK frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LossEvent {
    pub lost_bytes: u64,

    pub lost_packets: usize,

    pub largest_lost_packet_num: Option<u64>,

    pub smallest_lost_sent_time: Option<Instant>,

    pub largest_lost_sent_time: Option<Instant>,

    pub persistent_congestion: bool,

    pub loss_time: Instant,
}

impl LossEvent {
    pub fn new(loss_time: Instant) -> Self {
        LossEvent {
            lost_bytes: 0,
            lost_packets: 0,
            largest_lost_packet_num: None,
            smallest_lost_sent_time: None,
            largest_lost_sent_time: None,
            persistent_congestion: false,
            loss_time,
        }
    }

    pub fn add_lost_packet(&mut self, pkt: &Sent) {
        self.lost_bytes += pkt.size as u64;
        self.lost_packets += 1;

        self.largest_lost_packet_num = Some(
            self.largest_lost_packet_num
                .map_or(pkt.pkt_num, |pn| cmp::max(pn, pkt.pkt_num)),
        );

        self.smallest_lost_sent_time = Some(
            self.smallest_lost_sent_time
                .map_or(pkt.time_sent, |t| cmp::min(t, pkt.time_sent)),
        );

        self.largest_lost_sent_time = Some(
            self.largest_lost_sent_time
                .map_or(pkt.time_sent, |t| cmp::max(t, pkt.time_sent)),
        );
    }
}

/// Loss hook run once per ACK frame: records the space's largest acked
/// packet and runs loss detection against it.
///
/// `lost_visitor` is called for each frame of every lost packet whose
/// payload was not already handled through another transmission.
pub fn handle_ack_for_loss<F>(
    r: &mut Recovery, ack: &AckEvent, epoch: Epoch, now: Instant,
    lost_visitor: F,
) -> Option<LossEvent>
where
    F: FnMut(&Sent, &Frame),
{
    if let Some(largest_acked) = ack.largest_acked_packet {
        let largest = &mut r.epochs[epoch].largest_acked_packet;

        *largest = Some(largest.map_or(largest_acked, |l| l.max(largest_acked)));
    }

    let largest_acked = r.epochs[epoch].largest_acked_packet?;

    detect_lost_packets(r, largest_acked, epoch, now, lost_visitor)
}

/// Declares lost every packet of `epoch` at or below `largest_acked` that is
/// either too far behind it in packet number or was sent too long ago.
///
/// Remaining candidates set the space's loss time.
pub fn detect_lost_packets<F>(
    r: &mut Recovery, largest_acked: u64, epoch: Epoch, now: Instant,
    mut lost_visitor: F,
) -> Option<LossEvent>
where
    F: FnMut(&Sent, &Frame),
{
    let loss_delay = cmp::max(r.rtt_stats.latest_rtt, r.rtt()) *
        TIME_THRESHOLD_DIVIDEND /
        TIME_THRESHOLD_DIVISOR;

    let reorder_threshold = r.config.packet_reorder_threshold;

    let mut loss: Option<LossEvent> = None;
    let mut loss_time: Option<Instant> = None;

    let mut i = 0;

    while i < r.outstandings.packets.len() {
        let pkt = &r.outstandings.packets[i];

        if pkt.epoch != epoch || pkt.pkt_num > largest_acked {
            i += 1;
            continue;
        }

        let lost = largest_acked - pkt.pkt_num >= reorder_threshold ||
            now.saturating_duration_since(pkt.time_sent) > loss_delay;

        if !lost {
            let candidate = pkt.time_sent + loss_delay;

            loss_time = Some(loss_time.map_or(candidate, |t| t.min(candidate)));

            i += 1;
            continue;
        }

        let Some((pkt, needs_process)) = r.outstandings.remove_lost(i) else {
            break;
        };

        trace!("{} packet {} lost on epoch {}", r.trace_id, pkt.pkt_num, epoch);

        if needs_process {
            for frame in &pkt.frames {
                lost_visitor(&pkt, frame);
            }
        }

        loss.get_or_insert_with(|| LossEvent::new(now))
            .add_lost_packet(&pkt);
    }

    r.epochs[epoch].loss_time = loss_time;

    if let Some(loss) = &loss {
        debug!(
            "{} lost {} packets ({} bytes) on epoch {}",
            r.trace_id, loss.lost_packets, loss.lost_bytes, epoch
        );
    }

    loss
}

/// Returns whether the time between the first and last lost packets spans
/// long enough to treat the losses as persistent congestion.
pub fn is_persistent_congestion(
    r: &Recovery, smallest_lost_sent_time: Instant,
    largest_lost_sent_time: Instant,
) -> bool {
    if !r.rtt_stats.has_first_rtt_sample() {
        return false;
    }

    let congestion_period = r.pto() * PERSISTENT_CONGESTION_THRESHOLD;

    largest_lost_sent_time.saturating_duration_since(smallest_lost_sent_time) >=
        congestion_period
}
