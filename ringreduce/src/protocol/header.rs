use crate::error::{Result, RingError};
use crate::types::{DataType, Phase};

/// Size of the segment header in bytes.
pub const HEADER_SIZE: usize = 32;

/// 32-byte header prepended to every segment on the wire.
///
/// ```text
/// [0..8]   call_seq: u64 LE   (per-group collective call counter)
/// [8..16]  total_len: u64 LE  (sender's element count for the whole buffer)
/// [16..20] round: u32 LE
/// [20]     phase: u8
/// [21]     dtype: u8
/// [22..24] reserved: u16 (must be 0)
/// [24..28] segment: u32 LE    (segment index carried by the payload)
/// [28..32] reserved: u32 (must be 0)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub call_seq: u64,
    pub total_len: u64,
    pub round: u32,
    pub phase: Phase,
    pub dtype: DataType,
    pub segment: u32,
}

impl SegmentHeader {
    /// Encode header to 32 bytes (little-endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.write_to(&mut buf);
        buf
    }

    /// Write the header into the first [`HEADER_SIZE`] bytes of a frame.
    pub fn write_to(&self, frame: &mut [u8]) {
        let buf = &mut frame[..HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.call_seq.to_le_bytes());
        buf[8..16].copy_from_slice(&self.total_len.to_le_bytes());
        buf[16..20].copy_from_slice(&self.round.to_le_bytes());
        buf[20] = self.phase as u8;
        buf[21] = self.dtype as u8;
        buf[22..24].fill(0);
        buf[24..28].copy_from_slice(&self.segment.to_le_bytes());
        buf[28..32].fill(0);
    }

    /// Decode header from 32 bytes.
    ///
    /// Returns `None` if the phase or dtype byte is invalid.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Option<Self> {
        let u64_at = |i: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[i..i + 8]);
            u64::from_le_bytes(raw)
        };
        let u32_at = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Some(SegmentHeader {
            call_seq: u64_at(0),
            total_len: u64_at(8),
            round: u32_at(16),
            phase: Phase::from_u8(buf[20])?,
            dtype: DataType::from_u8(buf[21])?,
            segment: u32_at(24),
        })
    }

    /// Split a received frame into its header and payload.
    pub fn split(frame: &[u8]) -> Result<(Self, &[u8])> {
        let Some((head, payload)) = frame.split_first_chunk::<HEADER_SIZE>() else {
            return Err(RingError::DecodeFailed(format!(
                "frame of {} bytes is shorter than the {HEADER_SIZE}-byte segment header",
                frame.len()
            )));
        };
        let header = Self::decode(head).ok_or_else(|| {
            RingError::DecodeFailed(format!(
                "invalid phase ({}) or dtype ({}) in segment header",
                head[20], head[21]
            ))
        })?;
        Ok((header, payload))
    }
}
