//! Error handling
//!
//! All failures share one flat [`Error`] type. None of them is recoverable from the point of view
//! of the smoke test: the driver propagates them to `main`, which logs the diagnostic and exits
//! with a non-zero status.

use std::os::raw::c_int;

use thiserror::Error;

use crate::datatype::Datatype;
use crate::topology::Rank;

/// Result type for runtime operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the bindings, the loopback runtime and the smoke driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The runtime was initialized before, possibly already finalized again.
    #[error("the message-passing runtime has already been initialized in this process")]
    AlreadyInitialized,

    /// An MPI function returned something other than `MPI_SUCCESS`.
    #[error("{call} failed with error code {code}: {message}")]
    Mpi {
        /// Name of the failing MPI function
        call: &'static str,
        /// Raw return code
        code: c_int,
        /// Description reported by the MPI library
        message: String,
    },

    /// A buffer length does not fit into an MPI count.
    #[error("{0} elements cannot be expressed as an MPI count")]
    CountOverflow(usize),

    /// Send and receive buffers describe different element types.
    #[error("send buffer holds {send:?} elements but receive buffer holds {recv:?}")]
    DatatypeMismatch {
        /// Element type of the send buffer
        send: Datatype,
        /// Element type of the receive buffer
        recv: Datatype,
    },

    /// The receive buffer cannot hold the gathered data.
    #[error("receive buffer holds {available} elements, {required} are required")]
    BufferTooSmall {
        /// Elements needed (count per process times process count)
        required: usize,
        /// Elements available
        available: usize,
    },

    /// Collective arguments are not identical on all processes.
    #[error("collective arguments differ on rank {rank}: {reason}")]
    NotSame {
        /// First rank that disagrees with rank 0
        rank: Rank,
        /// What differs
        reason: String,
    },

    /// The collective call itself reported a failure on this rank.
    #[error("collective {operation} failed on rank {rank}")]
    CollectiveFailed {
        /// Name of the collective
        operation: &'static str,
        /// Rank on which the call failed
        rank: Rank,
    },

    /// A peer terminated abnormally or left while a collective was pending.
    #[error("collective aborted: rank {rank} terminated")]
    Aborted {
        /// Rank that terminated
        rank: Rank,
    },

    /// The thread running a loopback rank panicked.
    #[error("rank {0} panicked")]
    RankPanicked(Rank),

    /// A block of the gathered buffer does not hold the expected values.
    #[error("gathered block {block} differs at index {index}: expected {expected}, found {found}")]
    Mismatch {
        /// Block (rank) index within the gathered buffer
        block: usize,
        /// Element index within the block
        index: usize,
        /// Expected element, formatted
        expected: String,
        /// Element found, formatted
        found: String,
    },

    /// Repeating the collective with the same inputs gave a different result.
    #[error("repetition {repeat} gathered a different result than the first call")]
    NotIdempotent {
        /// Zero-based repetition index
        repeat: usize,
    },

    /// Invalid arguments to the driver or to a loopback universe.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(feature = "mpi-runtime")]
mod mpi {
    use std::os::raw::{c_char, c_int};

    use conv::ConvUtil;

    use super::{Error, Result};
    use crate::ffi;

    /// MPI_SUCCESS constant, cast as a c_int here for easier checking of MPI return values
    pub(crate) const MPI_SUCCESS: c_int = ffi::MPI_SUCCESS as c_int;

    // MPI_MAX_ERROR_STRING is 256 in Open MPI and 512 in MPICH.
    const ERROR_STRING_CAPACITY: usize = 1024;

    /// Turns the return code of MPI function `call` into a `Result`.
    pub(crate) fn check(call: &'static str, code: c_int) -> Result<()> {
        if code == MPI_SUCCESS {
            Ok(())
        } else {
            Err(Error::Mpi {
                call,
                code,
                message: error_string(code),
            })
        }
    }

    fn error_string(code: c_int) -> String {
        let mut buf = vec![0u8; ERROR_STRING_CAPACITY];
        let mut len: c_int = 0;
        let res = unsafe { ffi::MPI_Error_string(code, buf.as_mut_ptr() as *mut c_char, &mut len) };
        if res != MPI_SUCCESS {
            return format!("unknown error code {}", code);
        }
        buf.truncate(len.value_as::<usize>().unwrap_or(0).min(ERROR_STRING_CAPACITY));
        String::from_utf8_lossy(&buf).trim_end().to_owned()
    }
}

#[cfg(feature = "mpi-runtime")]
pub(crate) use self::mpi::check;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        let err = Error::BufferTooSmall {
            required: 10,
            available: 5,
        };
        assert_eq!(
            err.to_string(),
            "receive buffer holds 5 elements, 10 are required"
        );

        let err = Error::CollectiveFailed {
            operation: "all_gather",
            rank: 1,
        };
        assert_eq!(err.to_string(), "collective all_gather failed on rank 1");
    }

    #[test]
    fn mismatch_reports_position() {
        let err = Error::Mismatch {
            block: 0,
            index: 3,
            expected: "4".into(),
            found: "7".into(),
        };
        assert_eq!(
            err.to_string(),
            "gathered block 0 differs at index 3: expected 4, found 7"
        );
    }
}
