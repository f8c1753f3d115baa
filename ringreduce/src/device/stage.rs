//! Segment staging between a collective's accumulator and the wire.
//!
//! The ring engine only ever moves whole segments. A [`SegmentStage`] knows
//! how to read a segment out as little-endian bytes, fold a received segment
//! into local data, and write a finished segment back.

use super::DeviceBuffer;
use crate::error::Result;
use crate::memory::StagingBuf;
use crate::partition::Segment;
use crate::reduce::{self, Element};

pub(crate) trait SegmentStage<T: Element>: Send {
    /// Encode segment `seg` into `out` (exactly `seg.len * T::SIZE` bytes).
    fn load(&mut self, seg: Segment, out: &mut [u8]) -> Result<()>;

    /// `incoming[i] = local[i] + incoming[i]` over segment `seg`.
    ///
    /// Local data is left untouched; the engine persists the sum with
    /// [`store`](Self::store), possibly while the next round is on the wire.
    fn accumulate(&mut self, seg: Segment, incoming: &mut [u8]) -> Result<()>;

    /// Overwrite segment `seg` with `bytes`.
    fn store(&mut self, seg: Segment, bytes: &[u8]) -> Result<()>;
}

/// Host memory: segments are encoded and decoded in place.
pub(crate) struct HostStage<'a, T: Element> {
    data: &'a mut [T],
}

impl<'a, T: Element> HostStage<'a, T> {
    pub(crate) fn new(data: &'a mut [T]) -> Self {
        Self { data }
    }
}

impl<T: Element> SegmentStage<T> for HostStage<'_, T> {
    fn load(&mut self, seg: Segment, out: &mut [u8]) -> Result<()> {
        let src = &self.data[seg.range()];
        if out.len() != src.len() * T::SIZE {
            return Err(crate::error::RingError::BufferSizeMismatch {
                expected: src.len() * T::SIZE,
                actual: out.len(),
            });
        }
        for (v, chunk) in src.iter().zip(out.chunks_exact_mut(T::SIZE)) {
            v.write_le(chunk);
        }
        Ok(())
    }

    fn accumulate(&mut self, seg: Segment, incoming: &mut [u8]) -> Result<()> {
        reduce::sum_into(incoming, &self.data[seg.range()])
    }

    fn store(&mut self, seg: Segment, bytes: &[u8]) -> Result<()> {
        reduce::copy_into(&mut self.data[seg.range()], bytes)
    }
}

/// Accelerator memory: every segment crosses a device/host copy sized to
/// that segment, bounced through a scratch buffer from the staging pool.
pub(crate) struct DeviceStage<'a, T: Element> {
    buf: &'a mut DeviceBuffer<T>,
    scratch: StagingBuf,
}

impl<'a, T: Element> DeviceStage<'a, T> {
    pub(crate) fn new(buf: &'a mut DeviceBuffer<T>, scratch: StagingBuf) -> Self {
        Self { buf, scratch }
    }
}

impl<T: Element> SegmentStage<T> for DeviceStage<'_, T> {
    fn load(&mut self, seg: Segment, out: &mut [u8]) -> Result<()> {
        self.buf.read_bytes(seg.offset, out)
    }

    fn accumulate(&mut self, seg: Segment, incoming: &mut [u8]) -> Result<()> {
        self.scratch.resize(seg.len * T::SIZE);
        self.buf.read_bytes(seg.offset, &mut self.scratch)?;
        reduce::sum_bytes::<T>(incoming, &self.scratch)
    }

    fn store(&mut self, seg: Segment, bytes: &[u8]) -> Result<()> {
        self.buf.write_bytes(seg.offset, bytes)
    }
}
