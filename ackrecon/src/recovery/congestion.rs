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

use super::loss::LossEvent;
use super::LastAckedPacketInfo;

/// A packet acknowledged by an ACK frame, as seen by the congestion
/// controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckPacket {
    pub sent_time: Instant,

    pub encoded_size: usize,

    pub last_acked_packet_info: Option<LastAckedPacketInfo>,

    /// Connection total of bytes sent when the packet was sent.
    pub total_bytes_sent_then: u64,

    pub is_app_limited: bool,
}

/// Summary of everything a single ACK frame acknowledged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckEvent {
    pub ack_time: Instant,

    pub acked_bytes: u64,

    /// Newly acked packets, in descending packet number order.
    pub acked_packets: Vec<AckPacket>,

    pub largest_acked_packet: Option<u64>,

    pub largest_acked_packet_sent_time: Option<Instant>,

    pub largest_acked_packet_app_limited: bool,

    /// The smallest RTT sample among packets acked after they were sent.
    pub mrtt_sample: Option<Duration>,
}

impl AckEvent {
    pub fn new(ack_time: Instant) -> Self {
        AckEvent {
            ack_time,
            acked_bytes: 0,
            acked_packets: Vec::new(),
            largest_acked_packet: None,
            largest_acked_packet_sent_time: None,
            largest_acked_packet_app_limited: false,
            mrtt_sample: None,
        }
    }
}

/// Congestion control algorithm driven by recovery.
pub trait CongestionController {
    /// Called at most once per ACK frame, with everything the frame acked and
    /// the losses it revealed.
    fn on_packet_ack_or_loss(&mut self, ack: AckEvent, loss: Option<LossEvent>);

    /// Current congestion window, in bytes.
    fn congestion_window(&self) -> usize;

    fn on_packet_sent(&mut self, _bytes: usize) {}
}
