//! Host-heap backed accelerator runtime.
//!
//! Behaves like a discrete device: memory is only reachable through explicit
//! copies, addresses are opaque, and every copy is counted. Used to exercise
//! the staged accelerator path without GPU hardware.

use super::AcceleratorRuntime;
use crate::error::{Result, RingError};
use crate::types::DeviceId;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

const ADDR_BASE: u64 = 0x1_0000;
const ADDR_ALIGN: u64 = 256;

struct Allocation {
    device: DeviceId,
    bytes: Vec<u8>,
}

/// Byte counters for every copy direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub host_to_device: u64,
    pub device_to_host: u64,
    pub device_to_device: u64,
    pub copies: u64,
}

pub struct SimulatedAccelerator {
    devices: u32,
    heap: StdMutex<BTreeMap<u64, Allocation>>,
    next_addr: AtomicU64,
    h2d: AtomicU64,
    d2h: AtomicU64,
    d2d: AtomicU64,
    copies: AtomicU64,
    fail_copies: AtomicBool,
}

impl SimulatedAccelerator {
    /// Runtime exposing `devices` virtual devices.
    pub fn new(devices: u32) -> Arc<Self> {
        Arc::new(Self {
            devices,
            heap: StdMutex::new(BTreeMap::new()),
            next_addr: AtomicU64::new(ADDR_BASE),
            h2d: AtomicU64::new(0),
            d2h: AtomicU64::new(0),
            d2d: AtomicU64::new(0),
            copies: AtomicU64::new(0),
            fail_copies: AtomicBool::new(false),
        })
    }

    pub fn copy_stats(&self) -> CopyStats {
        CopyStats {
            host_to_device: self.h2d.load(Ordering::Relaxed),
            device_to_host: self.d2h.load(Ordering::Relaxed),
            device_to_device: self.d2d.load(Ordering::Relaxed),
            copies: self.copies.load(Ordering::Relaxed),
        }
    }

    /// Allocations not yet freed, across all devices.
    pub fn live_allocations(&self) -> usize {
        self.heap.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Make every subsequent copy fail until cleared.
    pub fn set_fail_copies(&self, fail: bool) {
        self.fail_copies.store(fail, Ordering::Relaxed);
    }

    fn check_device(&self, device: DeviceId) -> Result<()> {
        if device >= self.devices {
            return Err(RingError::device(format!(
                "simulated device {device} does not exist ({} available)",
                self.devices
            )));
        }
        Ok(())
    }

    fn check_copy(&self) -> Result<()> {
        if self.fail_copies.load(Ordering::Relaxed) {
            return Err(RingError::device("simulated copy failure"));
        }
        self.copies.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Run `f` on the bytes of the allocation containing `[ptr, ptr + len)`.
    fn with_range<R>(
        &self,
        device: DeviceId,
        ptr: u64,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        let mut heap = self.heap.lock().unwrap_or_else(|p| p.into_inner());
        let (base, alloc) = heap
            .range_mut(..=ptr)
            .next_back()
            .ok_or_else(|| RingError::device(format!("invalid device address {ptr:#x}")))?;
        if alloc.device != device {
            return Err(RingError::device(format!(
                "address {ptr:#x} belongs to device {}, not {device}",
                alloc.device
            )));
        }
        let start = (ptr - base) as usize;
        if start + len > alloc.bytes.len() {
            return Err(RingError::device(format!(
                "access of {len} bytes at {ptr:#x} overruns allocation of {}",
                alloc.bytes.len()
            )));
        }
        Ok(f(&mut alloc.bytes[start..start + len]))
    }
}

impl AcceleratorRuntime for SimulatedAccelerator {
    fn name(&self) -> &str {
        "simulated"
    }

    fn device_count(&self) -> Result<u32> {
        Ok(self.devices)
    }

    fn alloc(&self, device: DeviceId, bytes: usize) -> Result<u64> {
        self.check_device(device)?;
        let span = (bytes as u64).div_ceil(ADDR_ALIGN).max(1) * ADDR_ALIGN;
        let ptr = self.next_addr.fetch_add(span, Ordering::Relaxed);
        self.heap.lock().unwrap_or_else(|p| p.into_inner()).insert(
            ptr,
            Allocation {
                device,
                bytes: vec![0u8; bytes],
            },
        );
        Ok(ptr)
    }

    unsafe fn free(&self, device: DeviceId, ptr: u64) -> Result<()> {
        let mut heap = self.heap.lock().unwrap_or_else(|p| p.into_inner());
        match heap.get(&ptr) {
            Some(a) if a.device == device => {
                heap.remove(&ptr);
                Ok(())
            }
            _ => Err(RingError::device(format!(
                "free of unknown address {ptr:#x} on device {device}"
            ))),
        }
    }

    unsafe fn copy_to_host(&self, device: DeviceId, src: u64, dst: &mut [u8]) -> Result<()> {
        self.check_copy()?;
        self.with_range(device, src, dst.len(), |mem| dst.copy_from_slice(mem))?;
        self.d2h.fetch_add(dst.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    unsafe fn copy_to_device(&self, device: DeviceId, src: &[u8], dst: u64) -> Result<()> {
        self.check_copy()?;
        self.with_range(device, dst, src.len(), |mem| mem.copy_from_slice(src))?;
        self.h2d.fetch_add(src.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    unsafe fn copy_device_to_device(
        &self,
        device: DeviceId,
        src: u64,
        dst: u64,
        bytes: usize,
    ) -> Result<()> {
        self.check_copy()?;
        let tmp = self.with_range(device, src, bytes, |mem| mem.to_vec())?;
        self.with_range(device, dst, bytes, |mem| mem.copy_from_slice(&tmp))?;
        self.d2d.fetch_add(bytes as u64, Ordering::Relaxed);
        Ok(())
    }
}
