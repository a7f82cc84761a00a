//! Environmental management
//!
//! This module provides ways for an MPI program to interact with its environment: initializing
//! and finalizing the runtime and identifying the MPI library in use.
//!
//! The runtime may be initialized once per process. `initialize()` hands out a `Universe` which
//! owns the initialized state; `Universe::finalize()` consumes it again, so no messaging call can
//! follow finalization.
use std::os::raw::{c_char, c_int};
use std::ptr;

use conv::ConvUtil;
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{check, Error, Result};
use crate::ffi;
use crate::topology::{Rank, SystemCommunicator};

// MPI forbids initializing again after `MPI_Finalize`, so this is never reset.
static INITIALIZED: OnceCell<()> = OnceCell::new();

/// Global context
#[derive(Debug)]
pub struct Universe {
    rank: Rank,
    size: Rank,
    finalized: bool,
}

impl Universe {
    /// The 'world communicator'
    ///
    /// Contains all processes initially partaking in the computation.
    pub fn world(&self) -> SystemCommunicator<'_> {
        SystemCommunicator::world(self.rank, self.size)
    }

    /// Finalize MPI.
    ///
    /// Must only be called after all messaging has completed. Dropping a `Universe` finalizes as
    /// well, but can only log a failure.
    ///
    /// # Standard section(s)
    ///
    /// 8.7
    pub fn finalize(mut self) -> Result<()> {
        self.finalized = true;
        finalize_raw()
    }
}

impl Drop for Universe {
    fn drop(&mut self) {
        if !self.finalized {
            if let Err(err) = finalize_raw() {
                warn!("finalizing on drop: {}", err);
            }
        }
    }
}

fn finalize_raw() -> Result<()> {
    debug!("MPI_Finalize");
    check("MPI_Finalize", unsafe { ffi::MPI_Finalize() })
}

/// Whether the MPI library has been initialized
fn is_initialized() -> Result<bool> {
    let mut res: c_int = 0;
    check("MPI_Initialized", unsafe { ffi::MPI_Initialized(&mut res) })?;
    Ok(res != 0)
}

/// Initialize MPI.
///
/// If the MPI library has not been initialized so far, initializes it and returns the
/// communication `Universe`. Fails with `Error::AlreadyInitialized` on every later call, also
/// after the first universe has been finalized.
///
/// # Standard section(s)
///
/// 8.7
pub fn initialize() -> Result<Universe> {
    if INITIALIZED.set(()).is_err() || is_initialized()? {
        return Err(Error::AlreadyInitialized);
    }

    debug!("MPI_Init");
    check("MPI_Init", unsafe {
        ffi::MPI_Init(ptr::null_mut(), ptr::null_mut())
    })?;

    // From here on the runtime is up; dropping the universe on error finalizes it.
    let mut universe = Universe {
        rank: 0,
        size: 0,
        finalized: false,
    };
    let world = unsafe { ffi::RSMPI_COMM_WORLD };
    check("MPI_Comm_rank", unsafe {
        ffi::MPI_Comm_rank(world, &mut universe.rank)
    })?;
    check("MPI_Comm_size", unsafe {
        ffi::MPI_Comm_size(world, &mut universe.size)
    })?;
    debug!(rank = universe.rank, size = universe.size, "joined world communicator");

    Ok(universe)
}

/// Identifies the version of the MPI standard implemented by the library.
///
/// Returns a tuple of `(version, subversion)`, e.g. `(3, 1)`.
///
/// Can be called without initializing MPI.
pub fn version() -> Result<(c_int, c_int)> {
    let mut version: c_int = 0;
    let mut subversion: c_int = 0;
    check("MPI_Get_version", unsafe {
        ffi::MPI_Get_version(&mut version, &mut subversion)
    })?;
    Ok((version, subversion))
}

/// Describes the version of the MPI library itself.
///
/// Can be called without initializing MPI.
pub fn library_version() -> Result<String> {
    let bufsize = unsafe { ffi::RSMPI_MAX_LIBRARY_VERSION_STRING }
        .value_as::<usize>()
        .map_err(|_| Error::InvalidConfig("MPI_MAX_LIBRARY_VERSION_STRING is negative".into()))?;
    let mut buf = vec![0u8; bufsize];
    let mut len: c_int = 0;

    check("MPI_Get_library_version", unsafe {
        ffi::MPI_Get_library_version(buf.as_mut_ptr() as *mut c_char, &mut len)
    })?;
    buf.truncate(len.value_as::<usize>().unwrap_or(0).min(bufsize));
    Ok(String::from_utf8_lossy(&buf)
        .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_owned())
}
