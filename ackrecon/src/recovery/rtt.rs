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

pub(crate) const INITIAL_RTT: Duration = Duration::from_millis(333);

/// Round-trip time estimator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RttStats {
    /// The most recent RTT sample, after ack delay adjustment.
    pub latest_rtt: Duration,

    pub smoothed_rtt: Option<Duration>,

    pub rttvar: Duration,

    /// The minimum raw RTT sample observed.
    pub min_rtt: Option<Duration>,

    /// The largest ack delay reported by the peer.
    pub max_ack_delay: Duration,

    initial_rtt: Duration,
}

impl RttStats {
    pub fn new(initial_rtt: Duration) -> Self {
        RttStats {
            latest_rtt: Duration::ZERO,
            smoothed_rtt: None,
            rttvar: initial_rtt / 2,
            min_rtt: None,
            max_ack_delay: Duration::ZERO,
            initial_rtt,
        }
    }

    pub fn has_first_rtt_sample(&self) -> bool {
        self.smoothed_rtt.is_some()
    }

    /// Feeds a new RTT sample.
    ///
    /// The ack delay is only subtracted when it leaves the sample above the
    /// minimum RTT, or when this is the first sample.
    pub fn update_rtt(&mut self, rtt_sample: Duration, ack_delay: Duration) {
        let min_rtt = match self.min_rtt {
            Some(min_rtt) => min_rtt.min(rtt_sample),
            None => rtt_sample,
        };

        self.min_rtt = Some(min_rtt);

        self.max_ack_delay = self.max_ack_delay.max(ack_delay);

        let first_sample = self.smoothed_rtt.is_none();

        let adjusted_rtt = if rtt_sample > ack_delay &&
            (rtt_sample > min_rtt + ack_delay || first_sample)
        {
            rtt_sample - ack_delay
        } else {
            rtt_sample
        };

        self.latest_rtt = adjusted_rtt;

        match self.smoothed_rtt {
            None => {
                self.smoothed_rtt = Some(adjusted_rtt);

                self.rttvar = adjusted_rtt / 2;
            },

            Some(srtt) => {
                let rttvar_sample = if srtt > adjusted_rtt {
                    srtt - adjusted_rtt
                } else {
                    adjusted_rtt - srtt
                };

                self.rttvar = self.rttvar * 3 / 4 + rttvar_sample / 4;

                self.smoothed_rtt = Some(srtt * 7 / 8 + adjusted_rtt / 8);
            },
        }
    }

    /// Returns the smoothed RTT, or the configured initial RTT before the
    /// first sample.
    pub fn rtt(&self) -> Duration {
        self.smoothed_rtt.unwrap_or(self.initial_rtt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state() {
        let stats = RttStats::new(INITIAL_RTT);

        assert!(!stats.has_first_rtt_sample());
        assert_eq!(stats.rtt(), INITIAL_RTT);
        assert_eq!(stats.rttvar, INITIAL_RTT / 2);
        assert_eq!(stats.min_rtt, None);
    }

    #[test]
    fn first_sample_subtracts_ack_delay() {
        let mut stats = RttStats::new(INITIAL_RTT);

        stats.update_rtt(Duration::from_millis(100), Duration::from_millis(20));

        assert_eq!(stats.min_rtt, Some(Duration::from_millis(100)));
        assert_eq!(stats.latest_rtt, Duration::from_millis(80));
        assert_eq!(stats.smoothed_rtt, Some(Duration::from_millis(80)));
        assert_eq!(stats.rttvar, Duration::from_millis(40));
        assert_eq!(stats.max_ack_delay, Duration::from_millis(20));
    }

    #[test]
    fn ack_delay_kept_near_min_rtt() {
        let mut stats = RttStats::new(INITIAL_RTT);

        stats.update_rtt(Duration::from_millis(100), Duration::ZERO);

        // 105ms is not above min_rtt + ack_delay, so it is used raw.
        stats.update_rtt(Duration::from_millis(105), Duration::from_millis(10));
        assert_eq!(stats.latest_rtt, Duration::from_millis(105));

        // 120ms is, so the delay is subtracted.
        stats.update_rtt(Duration::from_millis(120), Duration::from_millis(10));
        assert_eq!(stats.latest_rtt, Duration::from_millis(110));
    }

    #[test]
    fn smoothing() {
        let mut stats = RttStats::new(INITIAL_RTT);

        stats.update_rtt(Duration::from_millis(100), Duration::ZERO);
        stats.update_rtt(Duration::from_millis(60), Duration::ZERO);

        // 7/8 * 100ms + 1/8 * 60ms
        assert_eq!(stats.smoothed_rtt, Some(Duration::from_millis(95)));
        // 3/4 * 50ms + 1/4 * 40ms
        assert_eq!(stats.rttvar, Duration::from_micros(47_500));
        assert_eq!(stats.min_rtt, Some(Duration::from_millis(60)));
        assert_eq!(stats.rtt(), Duration::from_millis(95));
    }

    #[test]
    fn max_ack_delay_only_grows() {
        let mut stats = RttStats::new(INITIAL_RTT);

        stats.update_rtt(Duration::from_millis(50), Duration::from_millis(5));
        stats.update_rtt(Duration::from_millis(50), Duration::from_millis(2));

        assert_eq!(stats.max_ack_delay, Duration::from_millis(5));
    }
}
