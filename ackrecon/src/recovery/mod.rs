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
use std::time::Duration;
use std::time::Instant;

use smallvec::SmallVec;

use crate::frame;
use crate::packet::Epoch;
use crate::Config;
use crate::Result;

pub mod ack;
pub mod congestion;
pub mod loss;
pub mod outstanding;
pub mod pacer;
pub mod rtt;

#[cfg(test)]
mod test_sender;

use self::congestion::CongestionController;
use self::outstanding::Outstandings;
use self::rtt::RttStats;

// Loss Recovery
pub(crate) const INITIAL_PACKET_THRESHOLD: u64 = 3;

// Packets sent more than 9/8 of an RTT before the newest acked one are lost.
pub(crate) const TIME_THRESHOLD_DIVIDEND: u32 = 9;
pub(crate) const TIME_THRESHOLD_DIVISOR: u32 = 8;

pub(crate) const GRANULARITY: Duration = Duration::from_millis(1);

pub(crate) const PERSISTENT_CONGESTION_THRESHOLD: u32 = 3;

/// How far below the largest acknowledged packet received intervals are
/// purged once an ACK frame is confirmed.
pub const ACK_PURGE_THRESHOLD: u64 = 10;

// Pacing
pub(crate) const MINIMUM_WINDOW_PACKETS: usize = 2;

pub(crate) const MIN_BURST_PACKETS: u64 = 5;

pub(crate) const PACING_TIMER_TICK_INTERVAL: Duration = Duration::from_millis(1);

pub(crate) const WRITE_CONNECTION_DATA_PACKETS_LIMIT: u64 = 5;

// Room for the acks a peer usually sends per ACK frame.
const DEFAULT_RX_PACKETS_BEFORE_ACK: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecoveryConfig {
    pub max_send_udp_payload_size: usize,
    pub min_cwnd_in_mss: usize,
    pub pacing: bool,
    pub pacing_timer_tick_interval: Duration,
    pub min_burst_packets: u64,
    pub write_connection_data_packets_limit: u64,
    pub ack_purge_threshold: u64,
    pub packet_reorder_threshold: u64,
    pub initial_rtt: Duration,
}

impl RecoveryConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_send_udp_payload_size: config.max_send_udp_payload_size,
            min_cwnd_in_mss: config.min_cwnd_in_mss,
            pacing: config.pacing,
            pacing_timer_tick_interval: config.pacing_timer_tick_interval,
            min_burst_packets: config.min_burst_packets,
            write_connection_data_packets_limit: config
                .write_connection_data_packets_limit,
            ack_purge_threshold: config.ack_purge_threshold,
            packet_reorder_threshold: config.packet_reorder_threshold,
            initial_rtt: config.initial_rtt,
        }
    }
}

/// Identifies the logical payload shared by an original packet and all of
/// its clones, i.e. the packet number of the first transmission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PacketEvent {
    pub epoch: Epoch,

    pub pkt_num: u64,
}

/// Connection totals at the time of the previous acknowledgement, attached
/// to each sent packet and handed to the congestion controller unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastAckedPacketInfo {
    pub sent_time: Instant,

    pub ack_time: Instant,

    pub total_bytes_sent: u64,

    pub total_bytes_acked: u64,
}

/// An outstanding packet: sent, and neither acknowledged nor lost yet.
#[derive(Clone)]
pub struct Sent {
    pub pkt_num: u64,

    pub epoch: Epoch,

    pub frames: SmallVec<[frame::Frame; 1]>,

    pub time_sent: Instant,

    /// Encoded size of the packet, in bytes.
    pub size: usize,

    pub is_handshake: bool,

    /// Whether the packet was sent while the congestion window was not the
    /// limiting factor.
    pub is_app_limited: bool,

    /// Set on every transmission of data that was cloned into more than one
    /// packet.
    pub associated_event: Option<PacketEvent>,

    /// Total bytes sent on the connection, including this packet.
    pub total_bytes_sent: u64,

    pub last_acked_packet_info: Option<LastAckedPacketInfo>,
}

impl Sent {
    pub fn new(epoch: Epoch, pkt_num: u64, size: usize, now: Instant) -> Sent {
        Sent {
            pkt_num,
            epoch,
            frames: SmallVec::new(),
            time_sent: now,
            size,
            is_handshake: epoch != Epoch::Application,
            is_app_limited: false,
            associated_event: None,
            total_bytes_sent: 0,
            last_acked_packet_info: None,
        }
    }
}

impl std::fmt::Debug for Sent {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "pkt_num={:?} ", self.pkt_num)?;
        write!(f, "epoch={:?} ", self.epoch)?;
        write!(f, "pkt_sent_time={:?} ", self.time_sent)?;
        write!(f, "pkt_size={:?} ", self.size)?;
        write!(f, "is_handshake={} ", self.is_handshake)?;
        write!(f, "is_app_limited={} ", self.is_app_limited)?;
        write!(f, "associated_event={:?} ", self.associated_event)?;
        write!(f, "total_bytes_sent={}", self.total_bytes_sent)?;

        Ok(())
    }
}

/// Connection-wide byte and time accounting updated by acknowledgements.
#[derive(Clone, Debug, Default)]
pub struct LossState {
    pub total_bytes_sent: u64,

    pub total_bytes_acked: u64,

    pub total_bytes_sent_at_last_ack: u64,

    pub total_bytes_acked_at_last_ack: u64,

    /// Send time of the earliest packet acked by the most recent ACK frame.
    pub last_acked_packet_sent_time: Option<Instant>,

    pub last_acked_time: Option<Instant>,
}

#[derive(Default)]
pub(crate) struct RecoveryEpoch {
    /// The largest packet number acknowledged in the packet number space so
    /// far.
    pub(crate) largest_acked_packet: Option<u64>,

    /// The time at which the next packet in that packet number space can be
    /// considered lost based on exceeding the reordering window in time.
    pub(crate) loss_time: Option<Instant>,
}

/// Per-connection recovery state: the outstanding ledger, RTT and byte
/// accounting, and the attached congestion controller.
pub struct Recovery {
    pub(crate) outstandings: Outstandings,

    pub(crate) epochs: [RecoveryEpoch; Epoch::count()],

    pub loss_state: LossState,

    pub rtt_stats: RttStats,

    pub(crate) congestion_controller: Option<Box<dyn CongestionController>>,

    pub(crate) config: RecoveryConfig,

    pub(crate) trace_id: String,
}

impl Recovery {
    pub fn new_with_config(
        recovery_config: &RecoveryConfig, trace_id: &str,
    ) -> Self {
        Self {
            outstandings: Outstandings::default(),

            epochs: Default::default(),

            loss_state: LossState::default(),

            rtt_stats: RttStats::new(recovery_config.initial_rtt),

            congestion_controller: None,

            config: *recovery_config,

            trace_id: trace_id.to_string(),
        }
    }

    pub fn new(config: &Config, trace_id: &str) -> Self {
        Self::new_with_config(&RecoveryConfig::from_config(config), trace_id)
    }

    pub fn set_congestion_controller(
        &mut self, cc: Box<dyn CongestionController>,
    ) {
        self.congestion_controller = Some(cc);
    }

    pub fn congestion_controller(&self) -> Option<&dyn CongestionController> {
        self.congestion_controller.as_deref()
    }

    pub fn congestion_window(&self) -> Option<usize> {
        self.congestion_controller
            .as_ref()
            .map(|cc| cc.congestion_window())
    }

    pub fn outstandings(&self) -> &Outstandings {
        &self.outstandings
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Records a packet that was just written to the network.
    ///
    /// The packet's byte snapshot and last-acked info are filled in from the
    /// current loss state before it enters the ledger.
    pub fn on_packet_sent(&mut self, mut pkt: Sent) -> Result<()> {
        let size = pkt.size;
        let total_bytes_sent = self.loss_state.total_bytes_sent + size as u64;

        pkt.total_bytes_sent = total_bytes_sent;

        if let (Some(sent_time), Some(ack_time)) = (
            self.loss_state.last_acked_packet_sent_time,
            self.loss_state.last_acked_time,
        ) {
            pkt.last_acked_packet_info = Some(LastAckedPacketInfo {
                sent_time,
                ack_time,
                total_bytes_sent: self.loss_state.total_bytes_sent_at_last_ack,
                total_bytes_acked: self.loss_state.total_bytes_acked_at_last_ack,
            });
        }

        trace!("{} packet sent {:?}", self.trace_id, pkt);

        self.outstandings.push(pkt)?;

        self.loss_state.total_bytes_sent = total_bytes_sent;

        if let Some(cc) = self.congestion_controller.as_mut() {
            cc.on_packet_sent(size);
        }

        Ok(())
    }

    pub fn get_largest_acked_on_epoch(&self, epoch: Epoch) -> Option<u64> {
        self.epochs[epoch].largest_acked_packet
    }

    pub fn loss_time(&self, epoch: Epoch) -> Option<Instant> {
        self.epochs[epoch].loss_time
    }

    pub fn rtt(&self) -> Duration {
        self.rtt_stats.rtt()
    }

    pub fn pto(&self) -> Duration {
        self.rtt() +
            cmp::max(self.rtt_stats.rttvar * 4, GRANULARITY) +
            self.rtt_stats.max_ack_delay
    }
}

impl std::fmt::Debug for Recovery {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "outstanding={} ", self.outstandings.len())?;
        write!(f, "latest_rtt={:?} ", self.rtt_stats.latest_rtt)?;
        write!(f, "srtt={:?} ", self.rtt_stats.smoothed_rtt)?;
        write!(f, "min_rtt={:?} ", self.rtt_stats.min_rtt)?;
        write!(f, "rttvar={:?} ", self.rtt_stats.rttvar)?;
        write!(f, "bytes_sent={} ", self.loss_state.total_bytes_sent)?;
        write!(f, "bytes_acked={} ", self.loss_state.total_bytes_acked)?;

        if let Some(cwnd) = self.congestion_window() {
            write!(f, "cwnd={cwnd} ")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::recovery::test_sender::TestSender;

    #[test]
    fn sent_snapshots_loss_state() {
        let mut s = TestSender::new();

        s.send(Epoch::Application, 1000);
        s.send(Epoch::Application, 500);

        let sizes: Vec<u64> = s
            .recovery
            .outstandings()
            .iter()
            .map(|p| p.total_bytes_sent)
            .collect();
        assert_eq!(sizes, vec![1000, 1500]);
        assert_eq!(s.recovery.loss_state.total_bytes_sent, 1500);

        // Nothing was acked yet.
        assert!(s
            .recovery
            .outstandings()
            .iter()
            .all(|p| p.last_acked_packet_info.is_none()));
    }

    #[test]
    fn sent_after_ack_carries_last_acked_info() {
        let mut s = TestSender::new();

        let t0 = s.now;
        s.send(Epoch::Application, 1000);
        s.advance_time(Duration::from_millis(20));
        s.ack(Epoch::Application, &[(0, 0)]);

        s.send(Epoch::Application, 700);

        let pkt = s.recovery.outstandings().iter().next_back().unwrap();
        assert_eq!(
            pkt.last_acked_packet_info,
            Some(LastAckedPacketInfo {
                sent_time: t0,
                ack_time: s.now,
                total_bytes_sent: 1000,
                total_bytes_acked: 1000,
            })
        );
        assert_eq!(pkt.total_bytes_sent, 1700);
    }

    #[test]
    fn rejected_packet_leaves_totals() {
        let mut s = TestSender::new();

        s.send(Epoch::Application, 1000);

        let now = s.now;
        let dup = Sent::new(Epoch::Application, 0, 1000, now);
        assert_eq!(
            s.recovery.on_packet_sent(dup),
            Err(crate::Error::InvalidPacketNumber)
        );
        assert_eq!(s.recovery.loss_state.total_bytes_sent, 1000);
    }

    #[test]
    fn pto_includes_max_ack_delay() {
        let mut s = TestSender::new();

        s.recovery
            .rtt_stats
            .update_rtt(Duration::from_millis(100), Duration::from_millis(10));

        // srtt 90ms, rttvar 45ms, max_ack_delay 10ms.
        assert_eq!(s.recovery.pto(), Duration::from_millis(90 + 180 + 10));
    }
}
