//! Describing data
//!
//! A collective moves typed elements between processes. The element type travels as a
//! [`Datatype`] tag, one per MPI predefined type the crate supports, and is only ever compared
//! for equality. A direct relationship between a Rust type and a tag is covered by the
//! `Equivalence` trait.
//!
//! A `Buffer` describes a specific piece of data in memory that a collective should operate on:
//! where the data begins, how many elements it contains and of which `Datatype`. `Buffer` and
//! `BufferMut` are implemented for single values and slices of types implementing
//! `Equivalence`.

use std::os::raw::c_void;

use conv::ConvUtil;

use crate::error::{Error, Result};
use crate::Count;

/// Datatype traits
pub mod traits {
    pub use super::{AsDatatype, Buffer, BufferMut, Collection, Equivalence, Pointer, PointerMut};
}

/// Element type of a buffer, the typed form of `MPI_INT32_T` and friends.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Datatype {
    /// `MPI_INT8_T`
    Int8,
    /// `MPI_INT16_T`
    Int16,
    /// `MPI_INT32_T`, the 32-bit signed integer the smoke test gathers
    Int32,
    /// `MPI_INT64_T`
    Int64,
    /// `MPI_UINT8_T`
    UInt8,
    /// `MPI_UINT16_T`
    UInt16,
    /// `MPI_UINT32_T`
    UInt32,
    /// `MPI_UINT64_T`
    UInt64,
    /// `MPI_FLOAT`
    Float32,
    /// `MPI_DOUBLE`
    Float64,
}

impl Datatype {
    /// Size of one element in bytes
    pub fn size(self) -> usize {
        match self {
            Datatype::Int8 | Datatype::UInt8 => 1,
            Datatype::Int16 | Datatype::UInt16 => 2,
            Datatype::Int32 | Datatype::UInt32 | Datatype::Float32 => 4,
            Datatype::Int64 | Datatype::UInt64 | Datatype::Float64 => 8,
        }
    }
}

#[cfg(feature = "mpi-runtime")]
impl crate::raw::AsRaw for Datatype {
    type Raw = crate::ffi::MPI_Datatype;

    fn as_raw(&self) -> Self::Raw {
        use crate::ffi;

        unsafe {
            match *self {
                Datatype::Int8 => ffi::RSMPI_INT8_T,
                Datatype::Int16 => ffi::RSMPI_INT16_T,
                Datatype::Int32 => ffi::RSMPI_INT32_T,
                Datatype::Int64 => ffi::RSMPI_INT64_T,
                Datatype::UInt8 => ffi::RSMPI_UINT8_T,
                Datatype::UInt16 => ffi::RSMPI_UINT16_T,
                Datatype::UInt32 => ffi::RSMPI_UINT32_T,
                Datatype::UInt64 => ffi::RSMPI_UINT64_T,
                Datatype::Float32 => ffi::RSMPI_FLOAT,
                Datatype::Float64 => ffi::RSMPI_DOUBLE,
            }
        }
    }
}

#[cfg(feature = "mpi-runtime")]
impl crate::raw::RawDatatype for Datatype {}

/// A direct equivalence exists between the implementing type and a `Datatype`
///
/// # Safety
///
/// The type must be plain old data whose size and layout match its `Datatype`, so that its
/// memory can be copied byte for byte between processes.
pub unsafe trait Equivalence: Copy + Send + Sync + 'static {
    /// The `Datatype` that is equivalent to this Rust type
    fn equivalent_datatype() -> Datatype;
}

macro_rules! equivalent_system_datatype {
    ($rstype:ty, $tag:ident) => {
        unsafe impl Equivalence for $rstype {
            fn equivalent_datatype() -> Datatype {
                Datatype::$tag
            }
        }
    };
}

equivalent_system_datatype!(f32, Float32);
equivalent_system_datatype!(f64, Float64);

equivalent_system_datatype!(i8, Int8);
equivalent_system_datatype!(i16, Int16);
equivalent_system_datatype!(i32, Int32);
equivalent_system_datatype!(i64, Int64);

equivalent_system_datatype!(u8, UInt8);
equivalent_system_datatype!(u16, UInt16);
equivalent_system_datatype!(u32, UInt32);
equivalent_system_datatype!(u64, UInt64);

/// Something that has an associated datatype
///
/// # Safety
///
/// The datatype must describe the elements actually stored in the buffer.
pub unsafe trait AsDatatype {
    /// The associated datatype
    fn as_datatype(&self) -> Datatype;
}

unsafe impl<T: Equivalence> AsDatatype for T {
    fn as_datatype(&self) -> Datatype {
        T::equivalent_datatype()
    }
}

unsafe impl<T: Equivalence> AsDatatype for [T] {
    fn as_datatype(&self) -> Datatype {
        T::equivalent_datatype()
    }
}

/// A countable collection of things.
///
/// # Safety
///
/// `count()` elements must be readable starting at the buffer's pointer.
pub unsafe trait Collection {
    /// How many things are in this collection.
    fn count(&self) -> usize;
}

unsafe impl<T: Equivalence> Collection for T {
    fn count(&self) -> usize {
        1
    }
}

unsafe impl<T: Equivalence> Collection for [T] {
    fn count(&self) -> usize {
        self.len()
    }
}

/// Provides a pointer to the starting address in memory.
///
/// # Safety
///
/// The pointer must be valid for reads of the whole collection.
pub unsafe trait Pointer {
    /// A pointer to the starting address in memory
    fn pointer(&self) -> *const c_void;
}

unsafe impl<T: Equivalence> Pointer for T {
    fn pointer(&self) -> *const c_void {
        self as *const T as *const c_void
    }
}

unsafe impl<T: Equivalence> Pointer for [T] {
    fn pointer(&self) -> *const c_void {
        self.as_ptr() as *const c_void
    }
}

/// Provides a mutable pointer to the starting address in memory.
///
/// # Safety
///
/// The pointer must be valid for writes of the whole collection.
pub unsafe trait PointerMut {
    /// A mutable pointer to the starting address in memory
    fn pointer_mut(&mut self) -> *mut c_void;
}

unsafe impl<T: Equivalence> PointerMut for T {
    fn pointer_mut(&mut self) -> *mut c_void {
        self as *mut T as *mut c_void
    }
}

unsafe impl<T: Equivalence> PointerMut for [T] {
    fn pointer_mut(&mut self) -> *mut c_void {
        self.as_mut_ptr() as *mut c_void
    }
}

/// A buffer is a region in memory that starts at `pointer()` and contains `count()` copies of
/// `as_datatype()`.
///
/// # Safety
///
/// The three parts must agree with each other.
pub unsafe trait Buffer: Pointer + Collection + AsDatatype {
    /// Number of bytes covered by the buffer
    fn byte_len(&self) -> usize {
        self.count() * self.as_datatype().size()
    }
}
unsafe impl<T: Equivalence> Buffer for T {}
unsafe impl<T: Equivalence> Buffer for [T] {}

/// A mutable buffer is a region in memory that starts at `pointer_mut()` and contains `count()`
/// copies of `as_datatype()`.
///
/// # Safety
///
/// The three parts must agree with each other.
pub unsafe trait BufferMut: PointerMut + Collection + AsDatatype {}
unsafe impl<T: Equivalence> BufferMut for T {}
unsafe impl<T: Equivalence> BufferMut for [T] {}

/// Converts an element count into an MPI `Count`, failing instead of truncating.
pub fn to_count(len: usize) -> Result<Count> {
    len.value_as::<Count>().map_err(|_| Error::CountOverflow(len))
}

/// Views the contents of a buffer as raw bytes.
pub(crate) fn bytes_of<B: Buffer + ?Sized>(buf: &B) -> &[u8] {
    let len = buf.byte_len();
    if len == 0 {
        return &[];
    }
    // `Buffer` guarantees `len` readable bytes at `pointer()` for the lifetime of the borrow.
    unsafe { std::slice::from_raw_parts(buf.pointer() as *const u8, len) }
}

/// Views the contents of a mutable buffer as raw bytes.
pub(crate) fn bytes_of_mut<B: BufferMut + ?Sized>(buf: &mut B) -> &mut [u8] {
    let len = buf.count() * buf.as_datatype().size();
    if len == 0 {
        return &mut [];
    }
    unsafe { std::slice::from_raw_parts_mut(buf.pointer_mut() as *mut u8, len) }
}

#[cfg(test)]
mod tests {
    use std::mem;

    use super::*;

    fn size_matches<T: Equivalence>() -> bool {
        T::equivalent_datatype().size() == mem::size_of::<T>()
    }

    #[test]
    fn tag_sizes_match_rust_types() {
        assert!(size_matches::<i8>());
        assert!(size_matches::<i16>());
        assert!(size_matches::<i32>());
        assert!(size_matches::<i64>());
        assert!(size_matches::<u8>());
        assert!(size_matches::<u16>());
        assert!(size_matches::<u32>());
        assert!(size_matches::<u64>());
        assert!(size_matches::<f32>());
        assert!(size_matches::<f64>());
    }

    #[test]
    fn i32_is_int32() {
        assert_eq!(i32::equivalent_datatype(), Datatype::Int32);
        assert_ne!(i32::equivalent_datatype(), Datatype::UInt32);
        assert_eq!([1i32, 2, 3][..].as_datatype(), Datatype::Int32);
    }

    #[test]
    fn counts() {
        assert_eq!(7i32.count(), 1);
        assert_eq!([1i32, 2, 3, 4, 5][..].count(), 5);
        let empty: [i32; 0] = [];
        assert_eq!(empty[..].count(), 0);
        assert_eq!(vec![0u8; 3][..].byte_len(), 3);
        assert_eq!(vec![0i64; 3][..].byte_len(), 24);
    }

    #[test]
    fn bytes_view_covers_elements() {
        let values = [1i32, 2];
        let bytes = bytes_of(&values[..]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1i32.to_ne_bytes());

        let empty: [i32; 0] = [];
        assert!(bytes_of(&empty[..]).is_empty());
    }

    #[test]
    fn mutable_bytes_view_writes_through() {
        let mut values = vec![0i32; 2];
        bytes_of_mut(&mut values[..])[4..].copy_from_slice(&9i32.to_ne_bytes());
        assert_eq!(values, vec![0, 9]);
    }

    #[test]
    fn count_conversion_is_checked() {
        assert_eq!(to_count(5), Ok(5));
        if mem::size_of::<usize>() > mem::size_of::<Count>() {
            assert_eq!(to_count(usize::MAX), Err(Error::CountOverflow(usize::MAX)));
        }
    }
}
