use super::{AcceleratorRuntime, DeviceBuffer};
use crate::error::{Result, RingError};
use crate::memory::Buffer;
use crate::reduce::Element;
use crate::types::{DeviceId, DeviceSelector, Location};
use std::sync::Arc;

/// The memory the collectives operate on, fixed at initialization.
#[derive(Clone)]
pub enum DeviceContext {
    /// Plain host memory; segments are encoded straight from the buffer.
    Host,
    /// One accelerator device; segments are staged through host scratch.
    Accelerator {
        device: DeviceId,
        runtime: Arc<dyn AcceleratorRuntime>,
    },
}

impl DeviceContext {
    pub fn host() -> Self {
        DeviceContext::Host
    }

    /// Select `device` on `runtime`, failing if the runtime does not have it.
    pub fn accelerator(runtime: Arc<dyn AcceleratorRuntime>, device: DeviceId) -> Result<Self> {
        let available = runtime.device_count().map_err(|e| {
            RingError::Config(format!(
                "{} runtime unavailable while selecting device {device}: {e}",
                runtime.name()
            ))
        })?;
        if device >= available {
            return Err(RingError::Config(format!(
                "accelerator {device} unavailable: {} runtime reports {available} device(s)",
                runtime.name()
            )));
        }
        Ok(DeviceContext::Accelerator { device, runtime })
    }

    /// Resolve a selector, using `runtime` for accelerator selections.
    pub fn from_selector(
        selector: DeviceSelector,
        runtime: Option<Arc<dyn AcceleratorRuntime>>,
    ) -> Result<Self> {
        match selector {
            DeviceSelector::Host => Ok(DeviceContext::Host),
            DeviceSelector::Accelerator(device) => match runtime {
                Some(rt) => Self::accelerator(rt, device),
                None => Err(RingError::Config(format!(
                    "accelerator {device} requested but no accelerator runtime is available"
                ))),
            },
        }
    }

    pub fn location(&self) -> Location {
        match self {
            DeviceContext::Host => Location::Host,
            DeviceContext::Accelerator { device, .. } => Location::Device(*device),
        }
    }

    pub fn is_accelerator(&self) -> bool {
        matches!(self, DeviceContext::Accelerator { .. })
    }

    /// Place `data` in this context's memory.
    pub fn upload<T: Element>(&self, data: &[T]) -> Result<Buffer<T>> {
        match self {
            DeviceContext::Host => Ok(Buffer::Host(data.to_vec())),
            DeviceContext::Accelerator { device, runtime } => {
                DeviceBuffer::from_host(Arc::clone(runtime), *device, data).map(Buffer::Device)
            }
        }
    }

    /// Buffer of `len` copies of `value` in this context's memory.
    pub fn filled<T: Element>(&self, len: usize, value: T) -> Result<Buffer<T>> {
        self.upload(&vec![value; len])
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceContext::Host => f.write_str("Host"),
            DeviceContext::Accelerator { device, runtime } => f
                .debug_struct("Accelerator")
                .field("device", device)
                .field("runtime", &runtime.name())
                .finish(),
        }
    }
}
