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

use smallvec::SmallVec;

use crate::Error;
use crate::Result;

/// An inclusive range of packet numbers `[start, end]` acknowledged by an
/// ACK frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckBlock {
    pub start: u64,
    pub end: u64,
}

impl AckBlock {
    pub fn new(start: u64, end: u64) -> AckBlock {
        AckBlock { start, end }
    }

    pub fn contains(&self, pkt_num: u64) -> bool {
        self.start <= pkt_num && pkt_num <= self.end
    }
}

/// An ACK frame, either read from the peer or written by this endpoint.
///
/// Blocks are sorted by descending `end` and never overlap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckFrame {
    pub largest_acked: u64,

    pub ack_delay: Duration,

    pub blocks: SmallVec<[AckBlock; 4]>,
}

impl AckFrame {
    /// Creates an ACK frame, validating the block layout.
    ///
    /// Blocks must be non-empty, each must satisfy `start <= end`, they must
    /// be sorted by descending `end` without overlapping, and the first one
    /// must end at `largest_acked`.
    pub fn new(
        largest_acked: u64, ack_delay: Duration, blocks: &[AckBlock],
    ) -> Result<AckFrame> {
        let first = blocks.first().ok_or(Error::InvalidAckRange)?;

        if first.end != largest_acked {
            return Err(Error::InvalidAckRange);
        }

        let mut prev: Option<&AckBlock> = None;

        for b in blocks {
            if b.start > b.end {
                return Err(Error::InvalidAckRange);
            }

            if let Some(prev) = prev {
                if b.end >= prev.start {
                    return Err(Error::InvalidAckRange);
                }
            }

            prev = Some(b);
        }

        Ok(AckFrame {
            largest_acked,
            ack_delay,
            blocks: blocks.iter().copied().collect(),
        })
    }
}

/// A frame carried by a sent packet.
///
/// Only the fields that acknowledgement and loss handling look at are kept,
/// wire encoding happens elsewhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Padding {
        len: usize,
    },

    Ping,

    ACK(AckFrame),

    Crypto {
        offset: u64,
        length: usize,
    },

    Stream {
        stream_id: u64,
        offset: u64,
        length: usize,
        fin: bool,
    },

    MaxData {
        max: u64,
    },

    HandshakeDone,
}

impl Frame {
    /// Whether the frame has to be sent again when its packet is lost.
    pub fn retransmittable(&self) -> bool {
        !matches!(self, Frame::Padding { .. } | Frame::Ping | Frame::ACK(..))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_frame_valid() {
        let blocks = [AckBlock::new(90, 100), AckBlock::new(50, 70)];
        let frame = AckFrame::new(100, Duration::from_micros(25), &blocks)
            .unwrap();

        assert_eq!(frame.largest_acked, 100);
        assert_eq!(frame.blocks.as_slice(), &blocks);
        assert!(frame.blocks[0].contains(95));
        assert!(!frame.blocks[1].contains(71));
    }

    #[test]
    fn ack_frame_empty() {
        assert_eq!(
            AckFrame::new(0, Duration::ZERO, &[]),
            Err(Error::InvalidAckRange)
        );
    }

    #[test]
    fn ack_frame_inverted_block() {
        assert_eq!(
            AckFrame::new(10, Duration::ZERO, &[AckBlock::new(10, 5)]),
            Err(Error::InvalidAckRange)
        );
    }

    #[test]
    fn ack_frame_unsorted_or_overlapping() {
        let unsorted = [AckBlock::new(1, 3), AckBlock::new(7, 9)];
        assert_eq!(
            AckFrame::new(3, Duration::ZERO, &unsorted),
            Err(Error::InvalidAckRange)
        );

        let overlapping = [AckBlock::new(5, 9), AckBlock::new(2, 5)];
        assert_eq!(
            AckFrame::new(9, Duration::ZERO, &overlapping),
            Err(Error::InvalidAckRange)
        );
    }

    #[test]
    fn ack_frame_largest_mismatch() {
        assert_eq!(
            AckFrame::new(11, Duration::ZERO, &[AckBlock::new(5, 10)]),
            Err(Error::InvalidAckRange)
        );
    }

    #[test]
    fn retransmittable() {
        assert!(!Frame::Padding { len: 10 }.retransmittable());
        assert!(!Frame::Ping.retransmittable());
        assert!(Frame::HandshakeDone.retransmittable());
    }
}
