pub mod header;

pub use header::{HEADER_SIZE, SegmentHeader};
