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

//! Acknowledgement reconciliation, loss hand-off and pacing for QUIC senders.
//!
//! ackrecon keeps track of the packets a QUIC endpoint has sent but not yet
//! seen acknowledged, and reconciles them against the ACK frames received
//! from the peer. Newly acknowledged packets are removed and reported once
//! to the congestion controller, together with any losses the acknowledgement
//! revealed. A pacer then turns the congestion window into write batches.
//!
//! The application is responsible for encoding and decoding packets and for
//! providing a congestion control algorithm.
//!
//! ## Tracking sent packets
//!
//! A [`Connection`] is created from a [`Config`], which is shared among
//! multiple connections:
//!
//! ```
//! let mut config = ackrecon::Config::new();
//! config.set_min_burst_packets(10);
//!
//! let conn = ackrecon::Connection::new(&config, "conn-1");
//! ```
//!
//! Every packet written to the network is recorded together with the frames
//! it carried:
//!
//! ```
//! # let config = ackrecon::Config::new();
//! # let mut conn = ackrecon::Connection::new(&config, "conn-1");
//! use ackrecon::Epoch;
//! use ackrecon::Frame;
//! use ackrecon::Sent;
//!
//! let now = std::time::Instant::now();
//!
//! let mut pkt = Sent::new(Epoch::Application, 0, 1200, now);
//! pkt.frames.push(Frame::Ping);
//!
//! conn.on_packet_sent(pkt)?;
//! # Ok::<(), ackrecon::Error>(())
//! ```
//!
//! ## Handling ACK frames
//!
//! ACK frames received from the peer are passed to
//! [`on_ack_frame_received()`]. Frames carried by acknowledged packets can
//! then be collected with [`take_acked_frames()`], and frames carried by lost
//! packets, which need to be retransmitted, with [`take_lost_frames()`]:
//!
//! ```
//! # let config = ackrecon::Config::new();
//! # let mut conn = ackrecon::Connection::new(&config, "conn-1");
//! # let now = std::time::Instant::now();
//! # let mut pkt = ackrecon::Sent::new(ackrecon::Epoch::Application, 0, 1200, now);
//! # pkt.frames.push(ackrecon::Frame::Ping);
//! # conn.on_packet_sent(pkt)?;
//! use std::time::Duration;
//!
//! use ackrecon::AckBlock;
//! use ackrecon::AckFrame;
//! use ackrecon::Epoch;
//!
//! let frame =
//!     AckFrame::new(0, Duration::from_millis(1), &[AckBlock::new(0, 0)])?;
//!
//! conn.on_ack_frame_received(Epoch::Application, &frame, now, now);
//!
//! assert_eq!(conn.take_acked_frames(Epoch::Application).len(), 1);
//! assert!(conn.take_lost_frames(Epoch::Application).is_empty());
//! # Ok::<(), ackrecon::Error>(())
//! ```
//!
//! ## Pacing
//!
//! Once a congestion controller is attached with
//! [`set_congestion_controller()`], its window is paced over the RTT.
//! [`time_until_next_write()`] tells when the next batch may be written, and
//! [`write_batch_size()`] how many packets it may contain.
//!
//! [`on_ack_frame_received()`]: struct.Connection.html#method.on_ack_frame_received
//! [`take_acked_frames()`]: struct.Connection.html#method.take_acked_frames
//! [`take_lost_frames()`]: struct.Connection.html#method.take_lost_frames
//! [`set_congestion_controller()`]: struct.Connection.html#method.set_congestion_controller
//! [`time_until_next_write()`]: struct.Connection.html#method.time_until_next_write
//! [`write_batch_size()`]: struct.Connection.html#method.write_batch_size

#![allow(clippy::upper_case_acronyms)]

#[macro_use]
extern crate log;

use std::cmp;
use std::time::Duration;
use std::time::Instant;

/// The minimum size of outgoing UDP payloads.
pub const MAX_SEND_UDP_PAYLOAD_SIZE: usize = 1200;

/// Stores configuration shared between multiple connections.
#[derive(Clone, Debug)]
pub struct Config {
    max_send_udp_payload_size: usize,

    min_cwnd_in_mss: usize,

    pacing: bool,

    pacing_timer_tick_interval: Duration,

    min_burst_packets: u64,

    write_connection_data_packets_limit: u64,

    ack_purge_threshold: u64,

    packet_reorder_threshold: u64,

    initial_rtt: Duration,
}

impl Config {
    /// Creates a config object with default values.
    pub fn new() -> Config {
        Config {
            max_send_udp_payload_size: MAX_SEND_UDP_PAYLOAD_SIZE,
            min_cwnd_in_mss: recovery::MINIMUM_WINDOW_PACKETS,
            pacing: true,
            pacing_timer_tick_interval: recovery::PACING_TIMER_TICK_INTERVAL,
            min_burst_packets: recovery::MIN_BURST_PACKETS,
            write_connection_data_packets_limit:
                recovery::WRITE_CONNECTION_DATA_PACKETS_LIMIT,
            ack_purge_threshold: recovery::ACK_PURGE_THRESHOLD,
            packet_reorder_threshold: recovery::INITIAL_PACKET_THRESHOLD,
            initial_rtt: recovery::rtt::INITIAL_RTT,
        }
    }

    /// Sets the maximum outgoing UDP payload size.
    ///
    /// The default and minimum value is `1200`.
    pub fn set_max_send_udp_payload_size(&mut self, v: usize) {
        self.max_send_udp_payload_size = cmp::max(v, MAX_SEND_UDP_PAYLOAD_SIZE);
    }

    /// Sets the smallest congestion window, in packets, assumed when
    /// computing the pacing rate.
    ///
    /// The default value is `2`.
    pub fn set_min_cwnd_in_mss(&mut self, v: usize) {
        self.min_cwnd_in_mss = cmp::max(v, 1);
    }

    /// Configures whether to enable pacing.
    ///
    /// The default value is `true`.
    pub fn enable_pacing(&mut self, v: bool) {
        self.pacing = v;
    }

    /// Sets the granularity of the pacing timer.
    ///
    /// The default value is 1ms.
    pub fn set_pacing_timer_tick_interval(&mut self, v: Duration) {
        self.pacing_timer_tick_interval = v;
    }

    /// Sets the smallest number of packets written in a paced batch.
    ///
    /// The default value is `5`.
    pub fn set_min_burst_packets(&mut self, v: u64) {
        self.min_burst_packets = v;
    }

    /// Sets how many packets may be written at once when pacing is off, and
    /// the cap on accumulated pacing tokens.
    ///
    /// The default value is `5`.
    pub fn set_write_connection_data_packets_limit(&mut self, v: u64) {
        self.write_connection_data_packets_limit = v;
    }

    /// Sets how many packet numbers below the largest acknowledged one are
    /// still reported in ACK frames once the peer confirmed receiving them.
    ///
    /// The default value is `10`.
    pub fn set_ack_purge_threshold(&mut self, v: u64) {
        self.ack_purge_threshold = v;
    }

    /// Sets how far behind the largest acknowledged packet a packet can be
    /// before it is declared lost.
    ///
    /// The default value is `3`.
    pub fn set_packet_reorder_threshold(&mut self, v: u64) {
        self.packet_reorder_threshold = cmp::max(v, 1);
    }

    /// Sets the RTT used before the first sample is taken.
    ///
    /// The default value is 333ms.
    pub fn set_initial_rtt(&mut self, v: Duration) {
        self.initial_rtt = v;
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection sender state.
pub struct Connection {
    recovery: Recovery,

    ack_states: [AckState; Epoch::count()],

    pacer: Pacer,

    acked_frames: [Vec<Frame>; Epoch::count()],

    lost_frames: [Vec<Frame>; Epoch::count()],

    trace_id: String,
}

impl Connection {
    /// Creates a new connection without a congestion controller.
    pub fn new(config: &Config, trace_id: &str) -> Connection {
        let recovery_config = RecoveryConfig::from_config(config);

        let ack_state = AckState::new(recovery_config.ack_purge_threshold);

        Connection {
            recovery: Recovery::new_with_config(&recovery_config, trace_id),

            ack_states: [ack_state.clone(), ack_state.clone(), ack_state],

            pacer: Pacer::new(&recovery_config, recovery_config.min_cwnd_in_mss),

            acked_frames: Default::default(),

            lost_frames: Default::default(),

            trace_id: trace_id.to_string(),
        }
    }

    /// Attaches the congestion controller notified of acks and losses.
    pub fn set_congestion_controller(
        &mut self, cc: Box<dyn CongestionController>,
    ) {
        self.recovery.set_congestion_controller(cc);
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn recovery(&self) -> &Recovery {
        &self.recovery
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    pub fn ack_state(&self, epoch: Epoch) -> &AckState {
        &self.ack_states[epoch]
    }

    /// Records a packet received from the peer, to be acknowledged later.
    pub fn on_packet_received(
        &mut self, epoch: Epoch, pkt_num: u64, now: Instant,
    ) {
        self.ack_states[epoch].on_packet_received(pkt_num, now);
    }

    /// Builds an ACK frame for the packets received in `epoch`.
    pub fn ack_frame(&self, epoch: Epoch, ack_delay: Duration) -> Option<AckFrame> {
        self.ack_states[epoch].ack_frame(ack_delay)
    }

    /// Records a packet written to the network.
    pub fn on_packet_sent(&mut self, pkt: Sent) -> Result<()> {
        self.recovery.on_packet_sent(pkt)?;

        self.pacer.on_packet_sent();

        Ok(())
    }

    /// Processes an ACK frame received from the peer in `epoch`.
    ///
    /// When one of the acked packets carried an ACK frame, the ranges that
    /// frame reported are no longer acknowledged again. Losses detected
    /// against the new largest acked packet drain the pacing tokens.
    pub fn on_ack_frame_received(
        &mut self, epoch: Epoch, frame: &AckFrame, ack_receive_time: Instant,
        now: Instant,
    ) {
        let ack_state = &mut self.ack_states[epoch];
        let acked_frames = &mut self.acked_frames[epoch];
        let lost_frames = &mut self.lost_frames[epoch];

        let mut lost = false;

        recovery::ack::process_ack_frame(
            &mut self.recovery,
            epoch,
            frame,
            |_, acked, _| {
                if let Frame::ACK(sent_ack) = acked {
                    ack_state::common_ack_visitor_for_ack_frame(
                        ack_state, sent_ack,
                    );
                }

                acked_frames.push(acked.clone());
            },
            |r, ack, epoch| {
                let loss =
                    recovery::loss::handle_ack_for_loss(r, ack, epoch, now, |_, f| {
                        if f.retransmittable() {
                            lost_frames.push(f.clone());
                        }
                    });

                lost = loss.is_some();

                loss
            },
            ack_receive_time,
            now,
        );

        if lost {
            self.pacer.on_packets_loss();
        }

        self.refresh_pacing_rate(now);
    }

    /// Takes the frames of packets acknowledged in `epoch` so far.
    pub fn take_acked_frames(&mut self, epoch: Epoch) -> Vec<Frame> {
        std::mem::take(&mut self.acked_frames[epoch])
    }

    /// Takes the retransmittable frames of packets declared lost in `epoch`
    /// so far.
    pub fn take_lost_frames(&mut self, epoch: Epoch) -> Vec<Frame> {
        std::mem::take(&mut self.lost_frames[epoch])
    }

    /// Recomputes the pacing rate from the current congestion window and
    /// RTT. Tokens are reset to a full batch when the rate changed.
    pub fn refresh_pacing_rate(&mut self, now: Instant) {
        if !self.recovery.config().pacing {
            return;
        }

        let Some(cwnd) = self.recovery.congestion_window() else {
            return;
        };

        let prev = self.pacer.pacing_rate();

        self.pacer.refresh_pacing_rate(cwnd, self.recovery.rtt(), now);

        if self.pacer.pacing_rate() != prev {
            trace!(
                "{} pacing rate changed {:?} -> {:?}",
                self.trace_id,
                prev,
                self.pacer.pacing_rate()
            );

            self.pacer.reset_pacing_tokens();
        }
    }

    /// Time until the next write batch is allowed.
    pub fn time_until_next_write(&self, now: Instant) -> Duration {
        if !self.recovery.config().pacing {
            return Duration::ZERO;
        }

        self.pacer.get_time_until_next_write(now)
    }

    /// Number of packets that may be written now.
    pub fn write_batch_size(&mut self, now: Instant) -> u64 {
        if !self.recovery.config().pacing {
            return self.recovery.config().write_connection_data_packets_limit;
        }

        self.pacer.update_and_get_write_batch_size(now)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} ", self.trace_id)?;
        write!(f, "recovery={:?} ", self.recovery)?;
        write!(f, "pacer={:?}", self.pacer)?;

        Ok(())
    }
}

pub use crate::ack_state::common_ack_visitor_for_ack_frame;
pub use crate::ack_state::AckState;

pub use crate::error::Error;
pub use crate::error::Result;

pub use crate::frame::AckBlock;
pub use crate::frame::AckFrame;
pub use crate::frame::Frame;

pub use crate::interval_set::IntervalSet;

pub use crate::packet::Epoch;

pub use crate::recovery::ack::process_ack_frame;
pub use crate::recovery::congestion::AckEvent;
pub use crate::recovery::congestion::AckPacket;
pub use crate::recovery::congestion::CongestionController;
pub use crate::recovery::loss::LossEvent;
pub use crate::recovery::pacer::Pacer;
pub use crate::recovery::pacer::PacingRate;
pub use crate::recovery::pacer::PacingRateCalculator;
pub use crate::recovery::LastAckedPacketInfo;
pub use crate::recovery::LossState;
pub use crate::recovery::PacketEvent;
pub use crate::recovery::Recovery;
pub use crate::recovery::RecoveryConfig;
pub use crate::recovery::Sent;


mod ack_state;
mod error;
mod frame;
mod interval_set;
mod packet;
pub mod recovery;
