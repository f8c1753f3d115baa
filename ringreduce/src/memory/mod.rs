mod buffer;
mod staging;

pub use buffer::Buffer;
pub use staging::{StagingBuf, StagingPool};
