//! Round choreography shared by the ring collectives.
//!
//! Every round sends exactly one segment to the next rank and receives one
//! from the previous rank, joined so neither side can block the other. The
//! segment received in round `r` is the one sent in round `r + 1`, so the
//! received frame is carried forward and re-sent as is, with only its header
//! rewritten. Persisting that frame into local memory (a device copy on the
//! accelerator path) runs alongside the next round's exchange.

use super::helpers::{Exchange, Expected, behind, frame_len};
use crate::device::stage::SegmentStage;
use crate::error::Result;
use crate::memory::{StagingBuf, StagingPool};
use crate::partition::{Segment, SegmentLayout};
use crate::protocol::{HEADER_SIZE, SegmentHeader};
use crate::reduce::Element;
use crate::types::Phase;
use std::collections::VecDeque;
use std::sync::Arc;

/// State for one collective call on one rank.
pub(crate) struct RingCall<'a> {
    pub exchange: Exchange<'a>,
    pub pool: &'a Arc<StagingPool>,
    pub early: &'a mut VecDeque<Vec<u8>>,
    pub layout: SegmentLayout,
}

/// The frame that the next round will send.
pub(crate) struct Carry {
    frame: StagingBuf,
    segment: Segment,
    /// Payload not yet written back to local memory.
    dirty: bool,
}

impl RingCall<'_> {
    pub(crate) fn rank(&self) -> usize {
        self.exchange.group.rank() as usize
    }

    pub(crate) fn world(&self) -> usize {
        self.layout.parts()
    }

    /// Read segment `idx` out of local memory into a fresh frame.
    pub(crate) fn load<T: Element, S: SegmentStage<T>>(
        &self,
        stage: &mut S,
        idx: usize,
    ) -> Result<Carry> {
        let segment = self.layout.segment(idx);
        let mut frame = self.pool.checkout(frame_len(segment.len * T::SIZE));
        stage.load(segment, &mut frame[HEADER_SIZE..])?;
        Ok(Carry {
            frame,
            segment,
            dirty: false,
        })
    }

    /// Write back whatever the last round left pending.
    pub(crate) fn finish<T: Element, S: SegmentStage<T>>(stage: &mut S, carry: Carry) -> Result<()> {
        if carry.dirty {
            stage.store(carry.segment, &carry.frame[HEADER_SIZE..])?;
        }
        Ok(())
    }

    /// Run the `world - 1` rounds of one phase.
    ///
    /// Reduce-scatter round `r`: send segment `rank - r - 1`, receive segment
    /// `rank - r - 2` and add local data into it. All-gather round `r`: send
    /// segment `rank - r`, receive segment `rank - r - 1` verbatim.
    pub(crate) async fn run_phase<T: Element, S: SegmentStage<T>>(
        &mut self,
        stage: &mut S,
        phase: Phase,
        mut carry: Carry,
    ) -> Result<Carry> {
        let rank = self.rank();
        let world = self.world();

        for step in 0..world.saturating_sub(1) {
            let (send_idx, recv_idx) = match phase {
                Phase::ReduceScatter => (behind(rank, world, step + 1), behind(rank, world, step + 2)),
                Phase::AllGather => (behind(rank, world, step), behind(rank, world, step + 1)),
            };
            debug_assert_eq!(send_idx, carry.segment.index);
            let recv_seg = self.layout.segment(recv_idx);
            let round = step as u32;

            SegmentHeader {
                call_seq: self.exchange.call_seq,
                total_len: self.exchange.total_len,
                round,
                phase,
                dtype: T::DTYPE,
                segment: send_idx as u32,
            }
            .write_to(&mut carry.frame);

            tracing::trace!(
                rank,
                %phase,
                round,
                send_segment = send_idx,
                recv_segment = recv_idx,
                send_bytes = carry.segment.len * T::SIZE,
                "ring round"
            );

            let frame: &[u8] = &carry.frame;
            let write_back = carry.dirty.then_some(carry.segment);
            let exchange = &self.exchange;
            let early = &mut *self.early;
            let expected = Expected {
                phase,
                round,
                segment: recv_idx,
                payload_bytes: recv_seg.len * T::SIZE,
            };

            let (exchanged, stored) = tokio::join!(
                async {
                    tokio::try_join!(
                        exchange.send_next(phase, round, frame),
                        exchange.recv_prev(early, expected),
                    )
                },
                async {
                    match write_back {
                        Some(seg) => stage.store(seg, &frame[HEADER_SIZE..]),
                        None => Ok(()),
                    }
                },
            );
            let ((), received) = exchanged?;
            stored?;

            let mut next = self.pool.adopt(received);
            if phase == Phase::ReduceScatter {
                stage.accumulate(recv_seg, &mut next[HEADER_SIZE..])?;
            }
            carry = Carry {
                frame: next,
                segment: recv_seg,
                dirty: true,
            };
        }

        Ok(carry)
    }
}
