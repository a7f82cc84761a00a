//! Organizing processes as communicators
//!
//! Upon initialization of a runtime a communication universe is created. All processes
//! initially partaking in the computation are organized in the 'world communicator', which is
//! available as a property of the universe. Processes are addressed via their `Rank` within a
//! communicator. Communicators identify themselves through an opaque `CommunicatorHandle`.
use std::os::raw::c_int;
use std::sync::atomic::{AtomicU64, Ordering};

/// Topology traits
pub mod traits {
    pub use super::Communicator;
}

/// Identifies a certain process within a communicator.
pub type Rank = c_int;

/// Opaque identifier of a communicator, compared only for equality.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommunicatorHandle(u64);

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

impl CommunicatorHandle {
    /// The world communicator of the MPI runtime
    #[cfg(feature = "mpi-runtime")]
    pub(crate) const SYSTEM_WORLD: CommunicatorHandle = CommunicatorHandle(0);

    /// A handle distinct from every handle allocated before.
    pub(crate) fn unique() -> Self {
        CommunicatorHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

/// Communicators are contexts for communication
pub trait Communicator {
    /// Identifies the communicator
    fn handle(&self) -> CommunicatorHandle;

    /// Number of processes in this communicator
    ///
    /// # Standard section(s)
    ///
    /// 6.4.1
    fn size(&self) -> Rank;

    /// The `Rank` that identifies the calling process within this communicator
    ///
    /// # Standard section(s)
    ///
    /// 6.4.1
    fn rank(&self) -> Rank;
}

impl<'a, C: 'a + Communicator + ?Sized> Communicator for &'a C {
    fn handle(&self) -> CommunicatorHandle {
        (**self).handle()
    }

    fn size(&self) -> Rank {
        (**self).size()
    }

    fn rank(&self) -> Rank {
        (**self).rank()
    }
}

#[cfg(feature = "mpi-runtime")]
pub use self::system::SystemCommunicator;

#[cfg(feature = "mpi-runtime")]
mod system {
    use std::marker::PhantomData;

    use super::{Communicator, CommunicatorHandle, Rank};
    use crate::environment::Universe;
    use crate::ffi::{self, MPI_Comm};
    use crate::raw::{AsRaw, RawCommunicator};

    /// The world communicator of the MPI runtime, `MPI_COMM_WORLD`
    ///
    /// Borrows the `Universe` it came from, so it cannot be used after finalization.
    #[derive(Copy, Clone, Debug)]
    pub struct SystemCommunicator<'u> {
        rank: Rank,
        size: Rank,
        universe: PhantomData<&'u Universe>,
    }

    impl<'u> SystemCommunicator<'u> {
        pub(crate) fn world(rank: Rank, size: Rank) -> Self {
            SystemCommunicator {
                rank,
                size,
                universe: PhantomData,
            }
        }
    }

    impl AsRaw for SystemCommunicator<'_> {
        type Raw = MPI_Comm;

        fn as_raw(&self) -> Self::Raw {
            unsafe { ffi::RSMPI_COMM_WORLD }
        }
    }

    impl RawCommunicator for SystemCommunicator<'_> {}

    impl Communicator for SystemCommunicator<'_> {
        fn handle(&self) -> CommunicatorHandle {
            CommunicatorHandle::SYSTEM_WORLD
        }

        fn size(&self) -> Rank {
            self.size
        }

        fn rank(&self) -> Rank {
            self.rank
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_handles_differ() {
        let a = CommunicatorHandle::unique();
        let b = CommunicatorHandle::unique();
        assert_ne!(a, b);
        assert_eq!(a, a);
    }
}
