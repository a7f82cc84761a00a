//! Raw bindings generated from the MPI headers of the installed implementation.
//!
//! Handles such as `MPI_COMM_WORLD` or `MPI_INT32_T` are link-time values in some
//! implementations, so `mpi-sys` exposes them as `RSMPI_*` statics that must be read in an
//! `unsafe` block.
pub use mpi_sys::*;
