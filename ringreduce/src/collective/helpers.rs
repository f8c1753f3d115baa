use crate::error::{Result, RingError};
use crate::group::Group;
use crate::protocol::{HEADER_SIZE, SegmentHeader};
use crate::types::{DataType, Phase, Rank};
use std::collections::VecDeque;
use std::time::Duration;

/// Per-call parameters shared by every send and receive of one collective.
pub(crate) struct Exchange<'a> {
    pub group: &'a Group,
    pub operation: &'static str,
    pub timeout: Duration,
    pub call_seq: u64,
    pub total_len: u64,
    pub dtype: DataType,
    pub verify_lengths: bool,
}

/// What the next frame from the previous rank must look like.
pub(crate) struct Expected {
    pub phase: Phase,
    pub round: u32,
    pub segment: usize,
    pub payload_bytes: usize,
}

impl Exchange<'_> {
    fn failed(&self, phase: Phase, round: u32, peer: Rank, reason: String) -> RingError {
        RingError::CommunicationFailed {
            operation: self.operation,
            phase,
            round,
            peer,
            rank: self.group.rank(),
            reason,
        }
    }

    /// Send a complete frame to the next rank, with timeout.
    pub(crate) async fn send_next(&self, phase: Phase, round: u32, frame: &[u8]) -> Result<()> {
        let dest = self.group.next();
        match tokio::time::timeout(self.timeout, self.group.transport().send(dest, frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.failed(phase, round, dest, e.to_string())),
            Err(_) => Err(self.failed(
                phase,
                round,
                dest,
                format!("send timed out after {}ms", self.timeout.as_millis()),
            )),
        }
    }

    /// Receive the frame for `expected` from the previous rank.
    ///
    /// Frames left over from an earlier, aborted call are discarded. Frames
    /// from a later call (a peer that already moved on) are parked in `early`
    /// and replayed when this rank reaches that call.
    pub(crate) async fn recv_prev(
        &self,
        early: &mut VecDeque<Vec<u8>>,
        expected: Expected,
    ) -> Result<Vec<u8>> {
        let src = self.group.prev();
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            let frame = match self.take_parked(early) {
                Some(frame) => frame,
                None => {
                    match tokio::time::timeout_at(deadline, self.group.transport().recv(src)).await
                    {
                        Ok(Ok(frame)) => frame,
                        Ok(Err(e)) => {
                            return Err(self.failed(
                                expected.phase,
                                expected.round,
                                src,
                                e.to_string(),
                            ));
                        }
                        Err(_) => {
                            return Err(self.failed(
                                expected.phase,
                                expected.round,
                                src,
                                format!("recv timed out after {}ms", self.timeout.as_millis()),
                            ));
                        }
                    }
                }
            };

            let (header, payload) = SegmentHeader::split(&frame)?;
            let payload_len = payload.len();
            if header.call_seq < self.call_seq {
                tracing::warn!(
                    rank = self.group.rank(),
                    peer = src,
                    stale_call = header.call_seq,
                    call = self.call_seq,
                    "discarding segment from an aborted collective"
                );
                continue;
            }
            if header.call_seq > self.call_seq {
                tracing::debug!(
                    rank = self.group.rank(),
                    peer = src,
                    early_call = header.call_seq,
                    call = self.call_seq,
                    "parking segment for a later collective"
                );
                early.push_back(frame);
                continue;
            }

            self.validate(src, &header, payload_len, &expected)?;
            return Ok(frame);
        }
    }

    fn take_parked(&self, early: &mut VecDeque<Vec<u8>>) -> Option<Vec<u8>> {
        while let Some(front) = early.front() {
            let seq = SegmentHeader::split(front).ok().map(|(h, _)| h.call_seq);
            match seq {
                Some(seq) if seq == self.call_seq => return early.pop_front(),
                Some(seq) if seq > self.call_seq => return None,
                _ => {
                    early.pop_front();
                }
            }
        }
        None
    }

    fn validate(
        &self,
        src: Rank,
        header: &SegmentHeader,
        payload_len: usize,
        expected: &Expected,
    ) -> Result<()> {
        if self.verify_lengths {
            if header.dtype != self.dtype {
                return Err(RingError::PreconditionViolation {
                    peer: src,
                    reason: format!(
                        "peer reduces {} elements, this rank reduces {}",
                        header.dtype, self.dtype
                    ),
                });
            }
            if header.total_len != self.total_len {
                return Err(RingError::PreconditionViolation {
                    peer: src,
                    reason: format!(
                        "peer buffer holds {} elements, this rank holds {}",
                        header.total_len, self.total_len
                    ),
                });
            }
        }
        if header.phase != expected.phase
            || header.round != expected.round
            || header.segment as usize != expected.segment
        {
            return Err(RingError::Protocol {
                peer: src,
                reason: format!(
                    "expected {} round {} segment {}, got {} round {} segment {}",
                    expected.phase,
                    expected.round,
                    expected.segment,
                    header.phase,
                    header.round,
                    header.segment
                ),
            });
        }
        if payload_len != expected.payload_bytes {
            return Err(RingError::BufferSizeMismatch {
                expected: expected.payload_bytes,
                actual: payload_len,
            });
        }
        Ok(())
    }
}

/// Frame length for a segment of `payload_bytes`.
pub(crate) fn frame_len(payload_bytes: usize) -> usize {
    HEADER_SIZE + payload_bytes
}

/// Ring position `steps` places behind `rank`.
pub(crate) fn behind(rank: usize, world: usize, steps: usize) -> usize {
    (rank + world - steps % world) % world
}
