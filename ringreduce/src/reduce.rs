//! Element types and the element-wise summation used by the ring engine.
//!
//! Everything on the wire is little-endian. Typed host slices are converted
//! to and from bytes through [`Element`], so the engine never reinterprets
//! memory through pointer casts.

use crate::error::{Result, RingError};
use crate::types::DataType;

mod sealed {
    pub trait Sealed {}
}

/// A fixed-width numeric element the collectives can sum.
///
/// Integer sums wrap on overflow. Float sums follow IEEE addition in ring
/// order, so results are bit-reproducible for a fixed group size.
pub trait Element:
    sealed::Sealed + Copy + Default + PartialEq + std::fmt::Debug + Send + Sync + 'static
{
    /// Wire tag for this element type.
    const DTYPE: DataType;
    /// Size of one element in bytes.
    const SIZE: usize;

    fn add(self, other: Self) -> Self;
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, bytes: &mut [u8]);

    /// Lossy conversions used by the verification harness.
    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
}

macro_rules! impl_element {
    (int: $($ty:ty => $dt:ident),*) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Element for $ty {
                const DTYPE: DataType = DataType::$dt;
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn add(self, other: Self) -> Self {
                    self.wrapping_add(other)
                }
                impl_element!(@bytes $ty);
            }
        )*
    };
    (float: $($ty:ty => $dt:ident),*) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Element for $ty {
                const DTYPE: DataType = DataType::$dt;
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn add(self, other: Self) -> Self {
                    self + other
                }
                impl_element!(@bytes $ty);
            }
        )*
    };
    (@bytes $ty:ty) => {
        #[inline]
        fn read_le(bytes: &[u8]) -> Self {
            let mut raw = [0u8; std::mem::size_of::<$ty>()];
            raw.copy_from_slice(bytes);
            Self::from_le_bytes(raw)
        }
        #[inline]
        fn write_le(self, bytes: &mut [u8]) {
            bytes.copy_from_slice(&self.to_le_bytes());
        }
        #[inline]
        fn from_f64(v: f64) -> Self {
            v as $ty
        }
        #[inline]
        fn to_f64(self) -> f64 {
            self as f64
        }
    };
}

impl_element!(int: i32 => I32, i64 => I64, u32 => U32, u64 => U64);
impl_element!(float: f32 => F32, f64 => F64);

fn check_len<T: Element>(elems: usize, bytes: usize) -> Result<()> {
    let expected = elems * T::SIZE;
    if bytes != expected {
        return Err(RingError::BufferSizeMismatch {
            expected,
            actual: bytes,
        });
    }
    Ok(())
}

/// Serialize `src` into `out`, replacing its contents.
pub fn encode_into<T: Element>(src: &[T], out: &mut Vec<u8>) {
    out.clear();
    out.resize(src.len() * T::SIZE, 0);
    for (v, chunk) in src.iter().zip(out.chunks_exact_mut(T::SIZE)) {
        v.write_le(chunk);
    }
}

/// Serialize `src` into a fresh byte vector.
pub fn to_le_bytes<T: Element>(src: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() * T::SIZE);
    encode_into(src, &mut out);
    out
}

/// Deserialize a whole byte slice into a fresh vector.
pub fn from_le_bytes<T: Element>(bytes: &[u8]) -> Result<Vec<T>> {
    if bytes.len() % T::SIZE != 0 {
        return Err(RingError::BufferSizeMismatch {
            expected: bytes.len() - bytes.len() % T::SIZE,
            actual: bytes.len(),
        });
    }
    Ok(bytes.chunks_exact(T::SIZE).map(T::read_le).collect())
}

/// Overwrite `dst` with the elements encoded in `src`.
pub fn copy_into<T: Element>(dst: &mut [T], src: &[u8]) -> Result<()> {
    check_len::<T>(dst.len(), src.len())?;
    for (d, chunk) in dst.iter_mut().zip(src.chunks_exact(T::SIZE)) {
        *d = T::read_le(chunk);
    }
    Ok(())
}

/// Element-wise `dst[i] = local[i] + dst[i]`, with `dst` encoded.
pub fn sum_into<T: Element>(dst: &mut [u8], local: &[T]) -> Result<()> {
    check_len::<T>(local.len(), dst.len())?;
    for (v, chunk) in local.iter().zip(dst.chunks_exact_mut(T::SIZE)) {
        v.add(T::read_le(chunk)).write_le(chunk);
    }
    Ok(())
}

/// Element-wise sum where both sides are encoded bytes.
pub fn sum_bytes<T: Element>(dst: &mut [u8], src: &[u8]) -> Result<()> {
    if dst.len() != src.len() || dst.len() % T::SIZE != 0 {
        return Err(RingError::BufferSizeMismatch {
            expected: dst.len(),
            actual: src.len(),
        });
    }
    for (d, s) in dst
        .chunks_exact_mut(T::SIZE)
        .zip(src.chunks_exact(T::SIZE))
    {
        let r = T::read_le(d).add(T::read_le(s));
        r.write_le(d);
    }
    Ok(())
}
