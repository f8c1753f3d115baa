use crate::error::{Result, RingError};
use crate::reduce::Element;
use crate::types::DeviceId;
use std::marker::PhantomData;
use std::sync::Arc;

/// Device memory runtime consumed by the collectives.
///
/// Pointers are opaque `u64` device addresses. Zero is never a valid
/// allocation; [`DeviceBuffer`] uses it for empty buffers and never hands it
/// to the runtime.
///
/// Implementations:
/// - [`SimulatedAccelerator`](super::SimulatedAccelerator): host-heap backed,
///   for tests and machines without a GPU.
/// - `CudaRuntime` (feature `cuda`): CUDA driver API through cudarc.
pub trait AcceleratorRuntime: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Number of devices this runtime can address.
    fn device_count(&self) -> Result<u32>;

    /// Allocate `bytes` (> 0) of device memory.
    fn alloc(&self, device: DeviceId, bytes: usize) -> Result<u64>;

    /// Release memory returned by [`alloc`](Self::alloc).
    ///
    /// # Safety
    /// `ptr` must come from `alloc` on the same device and not be freed twice.
    unsafe fn free(&self, device: DeviceId, ptr: u64) -> Result<()>;

    /// Copy `dst.len()` bytes from device address `src`.
    ///
    /// # Safety
    /// `src` must be valid for `dst.len()` bytes.
    unsafe fn copy_to_host(&self, device: DeviceId, src: u64, dst: &mut [u8]) -> Result<()>;

    /// Copy `src` into device memory at `dst`.
    ///
    /// # Safety
    /// `dst` must be valid for `src.len()` bytes.
    unsafe fn copy_to_device(&self, device: DeviceId, src: &[u8], dst: u64) -> Result<()>;

    /// Copy `bytes` between two allocations on the same device.
    ///
    /// # Safety
    /// Both ranges must be valid and must not overlap.
    unsafe fn copy_device_to_device(
        &self,
        device: DeviceId,
        src: u64,
        dst: u64,
        bytes: usize,
    ) -> Result<()>;
}

/// Owned device allocation holding `len` elements of `T`.
///
/// Freed on drop, so an output abandoned by a failed collective never leaks.
pub struct DeviceBuffer<T: Element> {
    runtime: Arc<dyn AcceleratorRuntime>,
    device: DeviceId,
    ptr: u64,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Element> DeviceBuffer<T> {
    /// Allocate room for `len` elements. Contents are unspecified.
    pub fn alloc(runtime: Arc<dyn AcceleratorRuntime>, device: DeviceId, len: usize) -> Result<Self> {
        let ptr = if len == 0 {
            0
        } else {
            runtime.alloc(device, len * T::SIZE)?
        };
        Ok(Self {
            runtime,
            device,
            ptr,
            len,
            _marker: PhantomData,
        })
    }

    /// Allocate and upload `data`.
    pub fn from_host(
        runtime: Arc<dyn AcceleratorRuntime>,
        device: DeviceId,
        data: &[T],
    ) -> Result<Self> {
        let mut buf = Self::alloc(runtime, device, data.len())?;
        buf.write_bytes(0, &crate::reduce::to_le_bytes(data))?;
        Ok(buf)
    }

    /// Download the whole buffer.
    pub fn to_host(&self) -> Result<Vec<T>> {
        let mut bytes = vec![0u8; self.byte_len()];
        self.read_bytes(0, &mut bytes)?;
        crate::reduce::from_le_bytes(&bytes)
    }

    /// Allocate a new buffer on the same device with identical contents.
    pub fn duplicate(&self) -> Result<Self> {
        let copy = Self::alloc(Arc::clone(&self.runtime), self.device, self.len)?;
        if self.len > 0 {
            // SAFETY: both allocations hold `byte_len` bytes and are distinct.
            unsafe {
                self.runtime.copy_device_to_device(
                    self.device,
                    self.ptr,
                    copy.ptr,
                    self.byte_len(),
                )?;
            }
        }
        Ok(copy)
    }

    /// Copy `dst.len()` bytes starting at element `offset` to the host.
    pub fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        if dst.is_empty() {
            return Ok(());
        }
        let start = self.check_range(offset, dst.len())?;
        // SAFETY: range checked against the allocation above.
        unsafe { self.runtime.copy_to_host(self.device, start, dst) }
    }

    /// Copy `src` into the buffer starting at element `offset`.
    pub fn write_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }
        let start = self.check_range(offset, src.len())?;
        // SAFETY: range checked against the allocation above.
        unsafe { self.runtime.copy_to_device(self.device, src, start) }
    }

    fn check_range(&self, offset: usize, bytes: usize) -> Result<u64> {
        let start = offset * T::SIZE;
        if bytes % T::SIZE != 0 || start + bytes > self.byte_len() {
            return Err(RingError::BufferSizeMismatch {
                expected: self.byte_len().saturating_sub(start),
                actual: bytes,
            });
        }
        Ok(self.ptr + start as u64)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len * T::SIZE
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Raw device address (zero for empty buffers).
    pub fn as_ptr(&self) -> u64 {
        self.ptr
    }

    pub fn runtime(&self) -> &Arc<dyn AcceleratorRuntime> {
        &self.runtime
    }
}

impl<T: Element> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        if self.ptr == 0 {
            return;
        }
        // SAFETY: `ptr` came from `alloc` on `device` and is freed exactly once.
        if let Err(e) = unsafe { self.runtime.free(self.device, self.ptr) } {
            tracing::warn!(device = self.device, ptr = self.ptr, error = %e, "device free failed");
        }
    }
}

impl<T: Element> std::fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("runtime", &self.runtime.name())
            .field("device", &self.device)
            .field("len", &self.len)
            .field("dtype", &T::DTYPE)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimulatedAccelerator;

    #[test]
    fn test_upload_download() {
        let rt = SimulatedAccelerator::new(1);
        let buf = DeviceBuffer::from_host(rt.clone(), 0, &[1.0f32, 2.0, 3.0]).unwrap();
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.to_host().unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(rt.live_allocations(), 1);
        drop(buf);
        assert_eq!(rt.live_allocations(), 0);
    }

    #[test]
    fn test_empty_buffer_never_allocates() {
        let rt = SimulatedAccelerator::new(1);
        let buf = DeviceBuffer::<u64>::from_host(rt.clone(), 0, &[]).unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.as_ptr(), 0);
        assert_eq!(rt.live_allocations(), 0);
        assert!(buf.to_host().unwrap().is_empty());
        assert!(buf.duplicate().unwrap().is_empty());
    }

    #[test]
    fn test_partial_read_write() {
        let rt = SimulatedAccelerator::new(1);
        let mut buf = DeviceBuffer::from_host(rt, 0, &[0i32; 6]).unwrap();
        buf.write_bytes(2, &crate::reduce::to_le_bytes(&[7i32, 8])).unwrap();
        let mut out = vec![0u8; 12];
        buf.read_bytes(1, &mut out).unwrap();
        assert_eq!(crate::reduce::from_le_bytes::<i32>(&out).unwrap(), vec![0, 7, 8]);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let rt = SimulatedAccelerator::new(1);
        let mut buf = DeviceBuffer::from_host(rt, 0, &[0u32; 4]).unwrap();
        assert!(buf.write_bytes(3, &[0u8; 8]).is_err());
        let mut out = vec![0u8; 20];
        assert!(buf.read_bytes(0, &mut out).is_err());
    }

    #[test]
    fn test_duplicate_is_independent() {
        let rt = SimulatedAccelerator::new(2);
        let mut a = DeviceBuffer::from_host(rt.clone(), 1, &[5u64, 6]).unwrap();
        let b = a.duplicate().unwrap();
        a.write_bytes(0, &crate::reduce::to_le_bytes(&[9u64])).unwrap();
        assert_eq!(a.to_host().unwrap(), vec![9, 6]);
        assert_eq!(b.to_host().unwrap(), vec![5, 6]);
        assert_eq!(b.device(), 1);
        assert_eq!(rt.live_allocations(), 2);
    }
}
