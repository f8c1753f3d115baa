//! Owned collective buffers that carry their memory location.
//!
//! A [`Buffer`] is either an ordinary host vector or a device allocation. The
//! collectives read their input through `&Buffer` and always hand back a
//! freshly allocated `Buffer` in the same location.

use crate::device::DeviceBuffer;
use crate::error::Result;
use crate::reduce::Element;
use crate::types::{DataType, Location};

/// A contiguous run of `T` elements on the host or on one device.
#[derive(Debug)]
pub enum Buffer<T: Element> {
    Host(Vec<T>),
    Device(DeviceBuffer<T>),
}

impl<T: Element> Buffer<T> {
    pub fn len(&self) -> usize {
        match self {
            Buffer::Host(v) => v.len(),
            Buffer::Device(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len() * T::SIZE
    }

    pub fn dtype(&self) -> DataType {
        T::DTYPE
    }

    pub fn location(&self) -> Location {
        match self {
            Buffer::Host(_) => Location::Host,
            Buffer::Device(d) => Location::Device(d.device()),
        }
    }

    /// Copy the contents to a host vector (downloads device buffers).
    pub fn to_host(&self) -> Result<Vec<T>> {
        match self {
            Buffer::Host(v) => Ok(v.clone()),
            Buffer::Device(d) => d.to_host(),
        }
    }

    /// Independent copy in the same location.
    pub fn duplicate(&self) -> Result<Self> {
        match self {
            Buffer::Host(v) => Ok(Buffer::Host(v.clone())),
            Buffer::Device(d) => d.duplicate().map(Buffer::Device),
        }
    }

    pub fn as_host(&self) -> Option<&[T]> {
        match self {
            Buffer::Host(v) => Some(v),
            Buffer::Device(_) => None,
        }
    }

    pub fn into_host(self) -> Option<Vec<T>> {
        match self {
            Buffer::Host(v) => Some(v),
            Buffer::Device(_) => None,
        }
    }

    pub fn as_device(&self) -> Option<&DeviceBuffer<T>> {
        match self {
            Buffer::Host(_) => None,
            Buffer::Device(d) => Some(d),
        }
    }

    pub fn into_device(self) -> Option<DeviceBuffer<T>> {
        match self {
            Buffer::Host(_) => None,
            Buffer::Device(d) => Some(d),
        }
    }
}

impl<T: Element> From<Vec<T>> for Buffer<T> {
    fn from(v: Vec<T>) -> Self {
        Buffer::Host(v)
    }
}

impl<T: Element> From<DeviceBuffer<T>> for Buffer<T> {
    fn from(d: DeviceBuffer<T>) -> Self {
        Buffer::Device(d)
    }
}
