//! Smoke test for Message Passing Interface runtimes
//!
//! The [Message Passing Interface][MPI] (MPI) is a specification for a message-passing style
//! concurrency library. This crate checks that an installed implementation works end to end: it
//! initializes the runtime, gathers a small array of `i32` from every process of the world
//! communicator with an all-gather collective, validates the gathered result and finalizes the
//! runtime again.
//!
//! [MPI]: http://www.mpi-forum.org
//!
//! # Usage
//!
//! ```no_run
//! use mpi_smoke::loopback::LoopbackUniverse;
//! use mpi_smoke::smoke::SmokeTest;
//!
//! fn main() -> mpi_smoke::Result<()> {
//!     let universe = LoopbackUniverse::new(2)?;
//!     for report in universe.run(|world| SmokeTest::default().run(world)) {
//!         let report = report?;
//!         assert_eq!(report.gathered, vec![1, 2, 3, 4, 5, 1, 2, 3, 4, 5]);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - **MPI** (feature `mpi-runtime`): the real runtime, reached through `mpi-sys`. Start the
//!   program with `mpiexec` to get more than one process.
//! - **Loopback**: a group of threads inside the current process, one per rank. It honours the
//!   same collective contract as MPI and can inject failures, which makes the driver testable
//!   without a launcher.
//!
//! Every fallible call returns a [`Result`]; nothing aborts the process from inside the library.

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

/// The raw C language MPI API
///
/// Documented in the [Message Passing Interface specification][spec]
///
/// [spec]: http://www.mpi-forum.org/docs/docs.html
#[cfg(feature = "mpi-runtime")]
#[allow(missing_docs, dead_code, non_snake_case, non_camel_case_types, non_upper_case_globals)]
pub mod ffi;

pub mod collective;
pub mod datatype;
#[cfg(feature = "mpi-runtime")]
pub mod environment;
pub mod error;
pub mod loopback;
#[cfg(feature = "mpi-runtime")]
pub mod raw;
pub mod smoke;
pub mod topology;

/// Re-exports all traits.
pub mod traits {
    pub use crate::collective::traits::*;
    pub use crate::datatype::traits::*;
    pub use crate::topology::traits::*;
}

pub use crate::error::{Error, Result};

/// Encodes number of values in multi-value messages.
pub type Count = std::os::raw::c_int;
