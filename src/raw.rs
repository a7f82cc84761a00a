//! Bridge between rust types and raw values

use crate::ffi::{MPI_Comm, MPI_Datatype};

/// Rust C bridge traits
pub mod traits {
    pub use super::{AsRaw, RawCommunicator, RawDatatype};
}

/// A rust type than can identify as a raw value understood by the MPI C API.
pub trait AsRaw {
    /// The raw MPI C API type
    type Raw;
    /// The raw value
    fn as_raw(&self) -> Self::Raw;
}

impl<'a, T: 'a + AsRaw> AsRaw for &'a T {
    type Raw = <T as AsRaw>::Raw;
    fn as_raw(&self) -> Self::Raw {
        (*self).as_raw()
    }
}

/// A type that can identify as an `MPI_Comm`
pub trait RawCommunicator: AsRaw<Raw = MPI_Comm> {}
impl<'a, T: 'a + RawCommunicator> RawCommunicator for &'a T {}

/// A type that can identify as an `MPI_Datatype`
pub trait RawDatatype: AsRaw<Raw = MPI_Datatype> {}
impl<'a, T: 'a + RawDatatype> RawDatatype for &'a T {}
