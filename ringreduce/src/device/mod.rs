mod accelerator;
mod context;
#[cfg(feature = "cuda")]
mod cuda;
mod simulated;
pub(crate) mod stage;

pub use accelerator::{AcceleratorRuntime, DeviceBuffer};
pub use context::DeviceContext;
#[cfg(feature = "cuda")]
pub use cuda::CudaRuntime;
pub use simulated::{CopyStats, SimulatedAccelerator};
