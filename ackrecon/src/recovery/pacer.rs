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

//! Pacer
//!
//! Spreads the congestion window over the round trip by releasing packets in
//! batches. Each batch is made available once per write interval, and unused
//! batches accumulate as tokens up to a cap.

use std::cmp;
use std::time::Duration;
use std::time::Instant;

use super::RecoveryConfig;

/// A batch size and the interval at which one batch may be written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacingRate {
    pub interval: Duration,

    pub burst_size: u64,
}

/// Computes a pacing rate from the configuration, the congestion window in
/// bytes, the minimum congestion window in packets and the RTT.
pub type PacingRateCalculator =
    Box<dyn Fn(&RecoveryConfig, usize, usize, Duration) -> PacingRate>;

/// Default pacing rate: the whole congestion window per RTT, with batches
/// no smaller than the configured minimum burst and intervals no shorter
/// than a timer tick.
///
/// A zero RTT leaves pacing off.
pub fn calculate_pacing_rate(
    config: &RecoveryConfig, cwnd_bytes: usize, min_cwnd_in_mss: usize,
    rtt: Duration,
) -> PacingRate {
    let tick = config.pacing_timer_tick_interval;

    if rtt.is_zero() {
        return PacingRate {
            interval: Duration::ZERO,
            burst_size: config.write_connection_data_packets_limit,
        };
    }

    let cwnd_in_packets = cmp::max(
        min_cwnd_in_mss as u64,
        (cwnd_bytes / config.max_send_udp_payload_size) as u64,
    )
    .max(1);

    let burst_per_tick =
        (cwnd_in_packets as u128 * tick.as_nanos() / rtt.as_nanos()) as u64;

    let burst_size = cmp::max(config.min_burst_packets, burst_per_tick);

    let interval = Duration::from_nanos(
        (rtt.as_nanos() * burst_size as u128 / cwnd_in_packets as u128) as u64,
    );

    PacingRate {
        interval: cmp::max(tick, interval),
        burst_size,
    }
}

pub struct Pacer {
    config: RecoveryConfig,

    min_cwnd_in_mss: usize,

    batch_size: u64,

    write_interval: Duration,

    pacing_rate_calculator: PacingRateCalculator,

    /// Batch size returned by the last write.
    cached_batch_size: u64,

    tokens: u64,

    last_write_time: Option<Instant>,
}

impl Pacer {
    pub fn new(config: &RecoveryConfig, min_cwnd_in_mss: usize) -> Self {
        let write_limit = config.write_connection_data_packets_limit;

        Pacer {
            config: *config,
            min_cwnd_in_mss,
            batch_size: write_limit,
            write_interval: Duration::ZERO,
            pacing_rate_calculator: Box::new(calculate_pacing_rate),
            cached_batch_size: write_limit,
            tokens: write_limit,
            last_write_time: None,
        }
    }

    pub fn set_pacing_rate_calculator(
        &mut self, calculator: PacingRateCalculator,
    ) {
        self.pacing_rate_calculator = calculator;
    }

    /// Recomputes the batch size and write interval from the congestion
    /// window and RTT. Tokens are left alone.
    pub fn refresh_pacing_rate(
        &mut self, cwnd_bytes: usize, rtt: Duration, now: Instant,
    ) {
        if rtt < self.config.pacing_timer_tick_interval {
            self.write_interval = Duration::ZERO;
            self.batch_size = self.config.write_connection_data_packets_limit;
        } else {
            let rate = (self.pacing_rate_calculator)(
                &self.config,
                cwnd_bytes,
                self.min_cwnd_in_mss,
                rtt,
            );

            self.write_interval = rate.interval;
            self.batch_size = rate.burst_size;
        }

        trace!(
            "pacing rate refreshed at {:?}: cwnd={} rtt={:?} interval={:?} batch={}",
            now,
            cwnd_bytes,
            rtt,
            self.write_interval,
            self.batch_size
        );
    }

    /// Paces at a fixed rate, in bytes per second.
    pub fn set_pacing_rate(&mut self, rate_bps: u64) {
        if rate_bps == 0 {
            self.write_interval = Duration::ZERO;
            self.batch_size = self.config.write_connection_data_packets_limit;
        } else {
            let mss = self.config.max_send_udp_payload_size as u128;
            let tick = self.config.pacing_timer_tick_interval.as_nanos();

            let bytes_per_tick = rate_bps as u128 * tick / 1_000_000_000;

            self.batch_size = cmp::max(
                self.config.min_burst_packets,
                (bytes_per_tick / mss) as u64,
            );

            self.write_interval = Duration::from_nanos(
                (self.batch_size as u128 * mss * 1_000_000_000 /
                    rate_bps as u128) as u64,
            );
        }

        self.cached_batch_size = self.batch_size;
    }

    pub fn pacing_rate(&self) -> PacingRate {
        PacingRate {
            interval: self.write_interval,
            burst_size: self.batch_size,
        }
    }

    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    pub fn reset_pacing_tokens(&mut self) {
        self.tokens = self.batch_size;
    }

    pub fn on_packets_loss(&mut self) {
        self.tokens = 0;
    }

    pub fn on_packet_sent(&mut self) {
        self.tokens = self.tokens.saturating_sub(1);
    }

    /// Time until the next batch may be written.
    pub fn get_time_until_next_write(&self, now: Instant) -> Duration {
        match self.last_write_time {
            Some(last) if !self.write_interval.is_zero() =>
                (last + self.write_interval).saturating_duration_since(now),

            _ => Duration::ZERO,
        }
    }

    /// Returns how many packets may be written now, accruing tokens for the
    /// intervals elapsed since the previous write.
    pub fn update_and_get_write_batch_size(&mut self, now: Instant) -> u64 {
        let last_write_time = self.last_write_time.replace(now);

        if self.write_interval.is_zero() {
            self.cached_batch_size = self.batch_size;

            return self.batch_size;
        }

        let Some(last_write_time) = last_write_time else {
            self.cached_batch_size = self.tokens;

            return self.tokens;
        };

        let elapsed = cmp::max(
            now.saturating_duration_since(last_write_time),
            self.write_interval,
        );

        let intervals =
            (elapsed.as_nanos() / self.write_interval.as_nanos()) as u64;

        let max_tokens = cmp::max(
            self.batch_size,
            self.config.write_connection_data_packets_limit,
        );

        self.tokens = self
            .tokens
            .saturating_add(intervals.saturating_mul(self.batch_size))
            .min(max_tokens);

        self.cached_batch_size = self.tokens;

        self.tokens
    }

    pub fn get_cached_write_batch_size(&self) -> u64 {
        self.cached_batch_size
    }
}

impl std::fmt::Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "interval={:?} ", self.write_interval)?;
        write!(f, "batch={} ", self.batch_size)?;
        write!(f, "tokens={} ", self.tokens)?;
        write!(f, "last_write={:?}", self.last_write_time)?;

        Ok(())
    }
}
