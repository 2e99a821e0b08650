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

use std::time::Instant;

use crate::frame::AckFrame;
use crate::frame::Frame;
use crate::packet::Epoch;

use super::congestion::AckEvent;
use super::congestion::AckPacket;
use super::loss;
use super::loss::LossEvent;
use super::Recovery;
use super::Sent;
use super::DEFAULT_RX_PACKETS_BEFORE_ACK;

/// Reconciles an ACK frame received in `epoch` against the outstanding
/// packets.
///
/// Acked packets are removed from the ledger. For every acked packet whose
/// payload was not already handled through another transmission,
/// `ack_visitor` is called once per frame it carried. After the ledger was
/// updated, `loss_visitor` runs exactly once and may declare packets lost.
/// The congestion controller, if any, is then notified at most once.
///
/// `ack_receive_time` is when the frame arrived, `now` is the current time.
/// Both are only ever compared to the packets' send times.
///
/// # Panics
///
/// Panics if the outstanding counters would become inconsistent, if a
/// handshake packet is found in the application space, or if the loss
/// visitor returns an event without sent times.
pub fn process_ack_frame<A, L>(
    r: &mut Recovery, epoch: Epoch, frame: &AckFrame, mut ack_visitor: A,
    mut loss_visitor: L, ack_receive_time: Instant, now: Instant,
) where
    A: FnMut(&Sent, &Frame, &AckFrame),
    L: FnMut(&mut Recovery, &AckEvent, Epoch) -> Option<LossEvent>,
{
    let mut ack = AckEvent::new(ack_receive_time);
    ack.acked_packets.reserve(DEFAULT_RX_PACKETS_BEFORE_ACK);

    let mut initial_packets_acked = 0;
    let mut handshake_packets_acked = 0;
    let mut cloned_packets_acked = 0;

    let mut last_acked_packet_sent_time: Option<Instant> = None;

    let Recovery {
        outstandings,
        loss_state,
        rtt_stats,
        trace_id,
        ..
    } = &mut *r;

    // Everything at or past `cursor` was already examined by an earlier,
    // higher block.
    let mut cursor = outstandings
        .last_packet_index(epoch)
        .map_or(0, |idx| idx + 1);

    for block in &frame.blocks {
        if cursor == 0 {
            break;
        }

        let found = outstandings.upper_bound(cursor, epoch, block.end);

        if found == 0 {
            trace!(
                "{} no outstanding packet at or below {} on epoch {}",
                trace_id,
                block.end,
                epoch
            );

            break;
        }

        // `[i, hi)` is the run of matched packets not erased yet.
        let mut i = found;
        let mut hi = found;

        while i > 0 {
            let pkt = &mut outstandings.packets[i - 1];

            if pkt.epoch != epoch {
                if hi != i {
                    outstandings.packets.drain(i..hi);
                }

                i -= 1;
                hi = i;

                continue;
            }

            if !block.contains(pkt.pkt_num) {
                break;
            }

            trace!(
                "{} packet newly acked {} on epoch {}",
                trace_id,
                pkt.pkt_num,
                epoch
            );

            let needs_process = pkt.associated_event.map_or(true, |event| {
                outstandings.packet_events.contains(&event)
            });

            if pkt.is_handshake && needs_process {
                match pkt.epoch {
                    Epoch::Initial => initial_packets_acked += 1,

                    Epoch::Handshake => handshake_packets_acked += 1,

                    Epoch::Application => panic!(
                        "handshake packet {} in application space",
                        pkt.pkt_num
                    ),
                }
            }

            ack.acked_bytes += pkt.size as u64;

            if pkt.associated_event.is_some() {
                cloned_packets_acked += 1;
            }

            let rtt_sample = ack_receive_time
                .max(now)
                .saturating_duration_since(pkt.time_sent);

            if pkt.pkt_num == frame.largest_acked {
                rtt_stats.update_rtt(rtt_sample, frame.ack_delay);
            }

            if needs_process {
                for f in &pkt.frames {
                    ack_visitor(pkt, f, frame);
                }

                if let Some(event) = pkt.associated_event {
                    outstandings.packet_events.remove(&event);
                }
            }

            if ack
                .largest_acked_packet
                .map_or(true, |largest| largest < pkt.pkt_num)
            {
                ack.largest_acked_packet = Some(pkt.pkt_num);
                ack.largest_acked_packet_sent_time = Some(pkt.time_sent);
                ack.largest_acked_packet_app_limited = pkt.is_app_limited;
            }

            if ack_receive_time > pkt.time_sent {
                ack.mrtt_sample = Some(
                    ack.mrtt_sample
                        .map_or(rtt_sample, |mrtt| mrtt.min(rtt_sample)),
                );
            }

            loss_state.total_bytes_acked += pkt.size as u64;
            loss_state.total_bytes_sent_at_last_ack = loss_state.total_bytes_sent;
            loss_state.total_bytes_acked_at_last_ack =
                loss_state.total_bytes_acked;
            loss_state.last_acked_time = Some(ack_receive_time);

            last_acked_packet_sent_time.get_or_insert(pkt.time_sent);

            ack.acked_packets.push(AckPacket {
                sent_time: pkt.time_sent,
                encoded_size: pkt.size,
                last_acked_packet_info: pkt.last_acked_packet_info.take(),
                total_bytes_sent_then: pkt.total_bytes_sent,
                is_app_limited: pkt.is_app_limited,
            });

            i -= 1;
        }

        if hi != i {
            outstandings.packets.drain(i..hi);
        }

        cursor = i;
    }

    if let Some(sent_time) = last_acked_packet_sent_time {
        loss_state.last_acked_packet_sent_time = Some(sent_time);
    }

    outstandings.on_packets_acked(
        initial_packets_acked,
        handshake_packets_acked,
        cloned_packets_acked,
    );

    let mut loss = loss_visitor(r, &ack, epoch);

    if let Some(loss) = loss.as_mut() {
        let (Some(smallest), Some(largest)) =
            (loss.smallest_lost_sent_time, loss.largest_lost_sent_time)
        else {
            panic!("loss event without lost packet sent times");
        };

        loss.persistent_congestion =
            loss::is_persistent_congestion(r, smallest, largest);
    }

    if ack.largest_acked_packet.is_none() && loss.is_none() {
        return;
    }

    if let Some(cc) = r.congestion_controller.as_mut() {
        cc.on_packet_ack_or_loss(ack, loss);
    }
}
