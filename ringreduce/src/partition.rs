//! Segment partitioning of a buffer across ring members.

use std::ops::Range;

/// Element lengths of the `parts` segments that tile `[0, count)`.
///
/// The first `count % parts` segments are one element longer than the rest,
/// so lengths never differ by more than one.
pub fn partition(count: usize, parts: usize) -> Vec<usize> {
    SegmentLayout::new(count, parts).lengths()
}

/// One contiguous slice of the buffer, owned by ring position `index` once the
/// reduce-scatter phase finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub offset: usize,
    pub len: usize,
}

impl Segment {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Segment boundaries for one collective call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentLayout {
    /// Start offset of each segment, plus a trailing `count` sentinel.
    pub offsets: Vec<usize>,
}

impl SegmentLayout {
    /// Partition `count` elements into `parts` segments.
    ///
    /// `parts` of zero is treated as one.
    pub fn new(count: usize, parts: usize) -> Self {
        let parts = parts.max(1);
        let base = count / parts;
        let rem = count % parts;
        let mut offsets = Vec::with_capacity(parts + 1);
        let mut off = 0;
        for i in 0..parts {
            offsets.push(off);
            off += base + usize::from(i < rem);
        }
        offsets.push(off);
        debug_assert_eq!(off, count);
        Self { offsets }
    }

    /// Layout where every segment has exactly `segment_len` elements.
    pub fn uniform(segment_len: usize, parts: usize) -> Self {
        let parts = parts.max(1);
        Self {
            offsets: (0..=parts).map(|i| i * segment_len).collect(),
        }
    }

    pub fn parts(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn total(&self) -> usize {
        self.offsets[self.parts()]
    }

    pub fn chunk_count(&self, idx: usize) -> usize {
        self.offsets[idx + 1] - self.offsets[idx]
    }

    pub fn segment(&self, idx: usize) -> Segment {
        Segment {
            index: idx,
            offset: self.offsets[idx],
            len: self.chunk_count(idx),
        }
    }

    pub fn lengths(&self) -> Vec<usize> {
        (0..self.parts()).map(|i| self.chunk_count(i)).collect()
    }

    /// Largest segment, which sizes the staging scratch for a call.
    pub fn max_len(&self) -> usize {
        (0..self.parts())
            .map(|i| self.chunk_count(i))
            .max()
            .unwrap_or(0)
    }
}
