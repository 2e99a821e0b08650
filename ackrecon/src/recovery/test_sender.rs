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

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use std::time::Instant;

use crate::frame::AckBlock;
use crate::frame::AckFrame;
use crate::frame::Frame;
use crate::packet::Epoch;
use crate::recovery::ack::process_ack_frame;
use crate::recovery::congestion::AckEvent;
use crate::recovery::congestion::CongestionController;
use crate::recovery::loss::LossEvent;
use crate::recovery::PacketEvent;
use crate::recovery::Recovery;
use crate::recovery::RecoveryConfig;
use crate::recovery::Sent;
use crate::Config;

/// Calls delivered to a [`RecordingController`].
pub(crate) type Notifications = Rc<RefCell<Vec<(AckEvent, Option<LossEvent>)>>>;

/// Congestion controller that records every notification it receives.
pub(crate) struct RecordingController {
    pub(crate) notifications: Notifications,

    pub(crate) cwnd: usize,
}

impl CongestionController for RecordingController {
    fn on_packet_ack_or_loss(&mut self, ack: AckEvent, loss: Option<LossEvent>) {
        self.notifications.borrow_mut().push((ack, loss));
    }

    fn congestion_window(&self) -> usize {
        self.cwnd
    }
}

/// Drives a [`Recovery`] instance with a fake clock.
pub(crate) struct TestSender {
    pub(crate) recovery: Recovery,

    pub(crate) now: Instant,

    pub(crate) notifications: Notifications,

    next_pkt: [u64; Epoch::count()],
}

impl TestSender {
    pub(crate) fn new() -> Self {
        let config = Config::new();
        let recovery_config = RecoveryConfig::from_config(&config);

        let notifications = Notifications::default();

        let mut recovery = Recovery::new_with_config(&recovery_config, "");
        recovery.set_congestion_controller(Box::new(RecordingController {
            notifications: notifications.clone(),
            cwnd: 12_000,
        }));

        TestSender {
            recovery,
            now: Instant::now(),
            notifications,
            next_pkt: [0; Epoch::count()],
        }
    }

    /// A sender without a congestion controller attached.
    pub(crate) fn without_cc() -> Self {
        let config = Config::new();
        let recovery_config = RecoveryConfig::from_config(&config);

        TestSender {
            recovery: Recovery::new_with_config(&recovery_config, ""),
            now: Instant::now(),
            notifications: Notifications::default(),
            next_pkt: [0; Epoch::count()],
        }
    }

    pub(crate) fn advance_time(&mut self, d: Duration) {
        self.now += d;
    }

    fn next_sent(&mut self, epoch: Epoch, size: usize) -> Sent {
        let pkt_num = self.next_pkt[epoch];
        self.next_pkt[epoch] += 1;

        let mut pkt = Sent::new(epoch, pkt_num, size, self.now);
        pkt.frames.push(Frame::Stream {
            stream_id: 0,
            offset: pkt_num * size as u64,
            length: size,
            fin: false,
        });

        pkt
    }

    /// Sends a packet, returning its packet number.
    pub(crate) fn send(&mut self, epoch: Epoch, size: usize) -> u64 {
        let pkt = self.next_sent(epoch, size);
        let pkt_num = pkt.pkt_num;

        self.recovery.on_packet_sent(pkt).unwrap();

        pkt_num
    }

    /// Sends a packet carrying a copy of the payload first sent in packet
    /// `original`.
    pub(crate) fn send_clone(
        &mut self, epoch: Epoch, size: usize, original: u64,
    ) -> u64 {
        let mut pkt = self.next_sent(epoch, size);
        let pkt_num = pkt.pkt_num;

        pkt.associated_event = Some(PacketEvent {
            epoch,
            pkt_num: original,
        });

        self.recovery.on_packet_sent(pkt).unwrap();

        pkt_num
    }

    /// Builds an ACK frame from inclusive `(start, end)` blocks, listed from
    /// the highest.
    pub(crate) fn ack_frame(blocks: &[(u64, u64)]) -> AckFrame {
        let blocks: Vec<AckBlock> =
            blocks.iter().map(|&(s, e)| AckBlock::new(s, e)).collect();

        AckFrame::new(blocks[0].end, Duration::ZERO, &blocks).unwrap()
    }

    /// Acks `blocks` at the current time, with no loss detection.
    ///
    /// Returns the packet numbers visited by the ack visitor.
    pub(crate) fn ack(&mut self, epoch: Epoch, blocks: &[(u64, u64)]) -> Vec<u64> {
        let frame = Self::ack_frame(blocks);
        let now = self.now;

        let mut visited = Vec::new();

        process_ack_frame(
            &mut self.recovery,
            epoch,
            &frame,
            |pkt, _, _| visited.push(pkt.pkt_num),
            |_, _, _| None,
            now,
            now,
        );

        visited
    }

    pub(crate) fn pkt_nums(&self, epoch: Epoch) -> Vec<u64> {
        self.recovery
            .outstandings()
            .iter()
            .filter(|p| p.epoch == epoch)
            .map(|p| p.pkt_num)
            .collect()
    }
}
