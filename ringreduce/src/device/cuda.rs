//! CUDA accelerator runtime.
//!
//! Uses cudarc 0.19's driver API. Copies are synchronous; the ring engine
//! overlaps them with network traffic at the task level.

use super::AcceleratorRuntime;
use crate::error::{Result, RingError};
use crate::types::DeviceId;
use cudarc::driver::sys::CUdeviceptr;
use cudarc::driver::{CudaContext, result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

/// Accelerator runtime for NVIDIA GPUs.
///
/// One primary context per device ordinal, created on first use and bound to
/// the calling thread before every driver call.
pub struct CudaRuntime {
    contexts: StdMutex<HashMap<DeviceId, Arc<CudaContext>>>,
}

impl CudaRuntime {
    pub fn new() -> Result<Arc<Self>> {
        result::init().map_err(|e| RingError::device_with_source("cuInit failed", e))?;
        Ok(Arc::new(Self {
            contexts: StdMutex::new(HashMap::new()),
        }))
    }

    fn bind(&self, device: DeviceId) -> Result<()> {
        let ctx = {
            let mut contexts = self.contexts.lock().unwrap_or_else(|p| p.into_inner());
            match contexts.get(&device) {
                Some(ctx) => Arc::clone(ctx),
                None => {
                    let ctx = CudaContext::new(device as usize).map_err(|e| {
                        RingError::device_with_source(
                            format!("failed to create CUDA context for GPU {device}"),
                            e,
                        )
                    })?;
                    contexts.insert(device, Arc::clone(&ctx));
                    ctx
                }
            }
        };
        ctx.bind_to_thread()
            .map_err(|e| RingError::device_with_source("CUDA bind_to_thread failed", e))
    }
}

impl AcceleratorRuntime for CudaRuntime {
    fn name(&self) -> &str {
        "cuda"
    }

    fn device_count(&self) -> Result<u32> {
        let n = result::device::get_count()
            .map_err(|e| RingError::device_with_source("cuDeviceGetCount failed", e))?;
        Ok(n.max(0) as u32)
    }

    fn alloc(&self, device: DeviceId, bytes: usize) -> Result<u64> {
        self.bind(device)?;
        let ptr = unsafe { result::malloc_sync(bytes) }.map_err(|e| {
            RingError::device_with_source(format!("cuMemAlloc of {bytes} bytes failed"), e)
        })?;
        Ok(ptr as u64)
    }

    unsafe fn free(&self, device: DeviceId, ptr: u64) -> Result<()> {
        self.bind(device)?;
        unsafe { result::free_sync(ptr as CUdeviceptr) }
            .map_err(|e| RingError::device_with_source("cuMemFree failed", e))
    }

    unsafe fn copy_to_host(&self, device: DeviceId, src: u64, dst: &mut [u8]) -> Result<()> {
        self.bind(device)?;
        unsafe { result::memcpy_dtoh_sync(dst, src as CUdeviceptr) }
            .map_err(|e| RingError::device_with_source("cuMemcpyDtoH failed", e))
    }

    unsafe fn copy_to_device(&self, device: DeviceId, src: &[u8], dst: u64) -> Result<()> {
        self.bind(device)?;
        unsafe { result::memcpy_htod_sync(dst as CUdeviceptr, src) }
            .map_err(|e| RingError::device_with_source("cuMemcpyHtoD failed", e))
    }

    unsafe fn copy_device_to_device(
        &self,
        device: DeviceId,
        src: u64,
        dst: u64,
        bytes: usize,
    ) -> Result<()> {
        self.bind(device)?;
        unsafe { result::memcpy_dtod_sync(dst as CUdeviceptr, src as CUdeviceptr, bytes) }
            .map_err(|e| RingError::device_with_source("cuMemcpyDtoD failed", e))
    }
}
