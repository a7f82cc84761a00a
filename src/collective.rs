//! Collective communication
//!
//! A collective has to be called by every process of a communicator and only completes once all
//! of them have joined it. The smoke test needs barrier synchronization and the all-gather; both
//! check their arguments locally before anything is exchanged.
//!
//! # Unfinished features
//!
//! - **5.7**: Varying counts, `MPI_Allgatherv()`
//! - **5.12**: Nonblocking collective operations

use conv::ConvUtil;

use crate::datatype::traits::*;
use crate::error::{Error, Result};
use crate::topology::traits::*;
use crate::topology::Rank;

/// Collective communication traits
pub mod traits {
    pub use super::CommunicatorCollectives;
}

/// Collective communication patterns defined on `Communicator`s
pub trait CommunicatorCollectives: Communicator {
    /// Barrier synchronization among all processes in a `Communicator`
    ///
    /// Calling processes will enter the barrier and block execution until all processes in the
    /// `Communicator` `&self` have entered the barrier.
    ///
    /// # Standard section(s)
    ///
    /// 5.3
    fn barrier(&self) -> Result<()>;

    /// Gather contents of buffers on all participating processes.
    ///
    /// After the call completes, the contents of the send `Buffer`s on all processes will be
    /// concatenated in rank order into the receive `Buffer`s on all ranks.
    ///
    /// All send `Buffer`s must contain the same count of elements. The receive `Buffer` must
    /// have room for that count times the size of the communicator; elements beyond that are
    /// left untouched.
    ///
    /// # Standard section(s)
    ///
    /// 5.7
    fn all_gather_into<S, R>(&self, sendbuf: &S, recvbuf: &mut R) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut + ?Sized;

    /// Gather contents of `sendbuf` on all participating processes into a new vector.
    fn all_gather_vec<T>(&self, sendbuf: &[T]) -> Result<Vec<T>>
    where
        T: Equivalence + Default,
    {
        let required = gathered_len(self.size(), sendbuf.count())?;
        let mut recvbuf = vec![T::default(); required];
        self.all_gather_into(sendbuf, &mut recvbuf[..])?;
        Ok(recvbuf)
    }
}

/// Elements needed to hold `count` elements from each of `size` processes.
pub(crate) fn gathered_len(size: Rank, count: usize) -> Result<usize> {
    let processes = size
        .value_as::<usize>()
        .map_err(|_| Error::InvalidConfig(format!("invalid communicator size {}", size)))?;
    count
        .checked_mul(processes)
        .ok_or(Error::CountOverflow(count))
}

/// Checks all-gather arguments that can be verified without talking to other processes.
///
/// Returns the number of elements each process contributes.
pub(crate) fn check_all_gather_args<S, R>(size: Rank, sendbuf: &S, recvbuf: &R) -> Result<usize>
where
    S: Buffer + ?Sized,
    R: BufferMut + ?Sized,
{
    let (send, recv) = (sendbuf.as_datatype(), recvbuf.as_datatype());
    if send != recv {
        return Err(Error::DatatypeMismatch { send, recv });
    }
    let count = sendbuf.count();
    let required = gathered_len(size, count)?;
    if recvbuf.count() < required {
        return Err(Error::BufferTooSmall {
            required,
            available: recvbuf.count(),
        });
    }
    Ok(count)
}

#[cfg(feature = "mpi-runtime")]
mod system {
    use tracing::debug;

    use super::{check_all_gather_args, CommunicatorCollectives};
    use crate::datatype::{to_count, traits::*};
    use crate::error::{check, Result};
    use crate::ffi;
    use crate::raw::traits::*;
    use crate::topology::{Communicator, SystemCommunicator};

    impl CommunicatorCollectives for SystemCommunicator<'_> {
        fn barrier(&self) -> Result<()> {
            debug!(rank = self.rank(), "MPI_Barrier");
            check("MPI_Barrier", unsafe { ffi::MPI_Barrier(self.as_raw()) })
        }

        fn all_gather_into<S, R>(&self, sendbuf: &S, recvbuf: &mut R) -> Result<()>
        where
            S: Buffer + ?Sized,
            R: BufferMut + ?Sized,
        {
            let count = to_count(check_all_gather_args(self.size(), sendbuf, recvbuf)?)?;
            debug!(rank = self.rank(), count, "MPI_Allgather");
            check("MPI_Allgather", unsafe {
                ffi::MPI_Allgather(
                    sendbuf.pointer(),
                    count,
                    sendbuf.as_datatype().as_raw(),
                    recvbuf.pointer_mut(),
                    count,
                    recvbuf.as_datatype().as_raw(),
                    self.as_raw(),
                )
            })
        }
    }
}
