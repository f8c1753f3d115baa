//! Bandwidth-optimal ring allreduce over a fixed-size process group.
//!
//! Each rank holds a buffer; after [`Collectives::ring_allreduce`] every rank
//! holds the element-wise sum of all of them. The buffer is split into one
//! segment per rank, summed around the ring in a reduce-scatter phase, and
//! circulated again in an all-gather phase, so each rank sends and receives
//! `2 (n - 1) / n` of the buffer no matter how large the group is.
//!
//! Buffers may live in host memory or on an accelerator behind an
//! [`AcceleratorRuntime`]; accelerator segments are staged through host
//! memory one segment at a time.

mod collective;
pub mod collectives;
pub mod config;
pub mod device;
pub mod error;
pub mod group;
pub mod harness;
pub mod memory;
pub mod partition;
pub mod protocol;
pub mod reduce;
pub mod transport;
pub mod types;

pub use collectives::{CollectiveStats, Collectives};
pub use config::{CollectiveConfig, TcpGroupConfig};
#[cfg(feature = "cuda")]
pub use device::CudaRuntime;
pub use device::{AcceleratorRuntime, DeviceBuffer, DeviceContext, SimulatedAccelerator};
pub use error::{Result, RingError};
pub use group::Group;
pub use memory::Buffer;
pub use partition::{SegmentLayout, partition};
pub use reduce::Element;
pub use transport::{LocalTransport, TcpTransport, Transport};
pub use types::{DataType, DeviceId, DeviceSelector, Location, Phase, Rank};
