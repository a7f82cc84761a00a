//! In-process loopback runtime
//!
//! A `LoopbackUniverse` runs one thread per rank inside the calling process. The ranks share a
//! single rendezvous slot: every collective deposits its contribution, waits until all ranks of
//! the universe have arrived and then copies the rank-ordered concatenation out. This honours the
//! contract of the MPI collectives (synchronizing, rank order, identical arguments) without any
//! transport, which makes it suitable for tests and for running the smoke test without a
//! launcher.
//!
//! A rank that returns an error, panics, or leaves while others wait in a collective aborts the
//! universe: peers blocked in (or later entering) a collective get `Error::Aborted` instead of
//! waiting forever. This mirrors a launcher tearing down the whole job when one process dies.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use conv::ConvUtil;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::collective::{check_all_gather_args, CommunicatorCollectives};
use crate::datatype::{bytes_of, bytes_of_mut, traits::*, Datatype};
use crate::error::{Error, Result};
use crate::topology::{Communicator, CommunicatorHandle, Rank};

const ALL_GATHER: &str = "all_gather";
const BARRIER: &str = "barrier";

/// A group of ranks living in threads of the current process
#[derive(Debug)]
pub struct LoopbackUniverse {
    size: Rank,
    handle: CommunicatorHandle,
    failing_rank: Option<Rank>,
    #[cfg(test)]
    unspawnable_rank: Option<Rank>,
}

impl LoopbackUniverse {
    /// A universe of `size` ranks.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig(
                "a loopback universe needs at least one rank".into(),
            ));
        }
        let size = size
            .value_as::<Rank>()
            .map_err(|_| Error::InvalidConfig(format!("{} ranks exceed the rank range", size)))?;
        Ok(LoopbackUniverse {
            size,
            handle: CommunicatorHandle::unique(),
            failing_rank: None,
            #[cfg(test)]
            unspawnable_rank: None,
        })
    }

    /// Makes every collective called on `rank` report a failure.
    pub fn with_failing_rank(mut self, rank: Rank) -> Result<Self> {
        if rank < 0 || rank >= self.size {
            return Err(Error::InvalidConfig(format!(
                "failing rank {} is outside of 0..{}",
                rank, self.size
            )));
        }
        self.failing_rank = Some(rank);
        Ok(self)
    }

    /// Number of ranks
    pub fn size(&self) -> Rank {
        self.size
    }

    /// Runs `f` once per rank, each on its own thread with its own view of the world
    /// communicator, and returns the results in rank order.
    pub fn run<F, T>(&self, f: F) -> Vec<Result<T>>
    where
        F: Fn(&LoopbackCommunicator<'_>) -> Result<T> + Sync,
        T: Send,
    {
        let exchange = Exchange::new(self.size);
        let f = &f;
        let exchange = &exchange;

        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.size)
                .map(|rank| {
                    let world = LoopbackCommunicator {
                        rank,
                        size: self.size,
                        handle: self.handle,
                        fails: self.failing_rank == Some(rank),
                        exchange,
                    };
                    let spawned = self
                        .spawn_rank(scope, rank, move || run_rank(&world, f))
                        .map_err(|err| {
                            // Ranks already running must not wait for this one.
                            exchange.depart(rank, false);
                            Error::InvalidConfig(format!(
                                "cannot spawn thread for rank {}: {}",
                                rank, err
                            ))
                        });
                    (rank, spawned)
                })
                .collect();

            handles
                .into_iter()
                .map(|(rank, spawned)| {
                    spawned.and_then(|handle| {
                        handle
                            .join()
                            .unwrap_or_else(|_| Err(Error::RankPanicked(rank)))
                    })
                })
                .collect()
        })
    }

    fn spawn_rank<'scope, 'env, B, T>(
        &self,
        scope: &'scope thread::Scope<'scope, 'env>,
        rank: Rank,
        body: B,
    ) -> io::Result<thread::ScopedJoinHandle<'scope, T>>
    where
        B: FnOnce() -> T + Send + 'scope,
        T: Send + 'scope,
    {
        #[cfg(test)]
        {
            if self.unspawnable_rank == Some(rank) {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "thread creation refused",
                ));
            }
        }
        thread::Builder::new()
            .name(format!("rank-{}", rank))
            .spawn_scoped(scope, body)
    }
}

fn run_rank<F, T>(world: &LoopbackCommunicator<'_>, f: &F) -> Result<T>
where
    F: Fn(&LoopbackCommunicator<'_>) -> Result<T>,
{
    let result = panic::catch_unwind(AssertUnwindSafe(|| f(world)))
        .unwrap_or_else(|_| Err(Error::RankPanicked(world.rank)));
    world.exchange.depart(world.rank, result.is_ok());
    result
}

/// The world communicator as seen by one rank of a `LoopbackUniverse`
#[derive(Debug)]
pub struct LoopbackCommunicator<'u> {
    rank: Rank,
    size: Rank,
    handle: CommunicatorHandle,
    fails: bool,
    exchange: &'u Exchange,
}

impl LoopbackCommunicator<'_> {
    fn injected_failure(&self, operation: &'static str) -> Result<()> {
        if self.fails {
            warn!(rank = self.rank, operation, "injected collective failure");
            self.exchange.depart(self.rank, false);
            return Err(Error::CollectiveFailed {
                operation,
                rank: self.rank,
            });
        }
        Ok(())
    }
}

impl Communicator for LoopbackCommunicator<'_> {
    fn handle(&self) -> CommunicatorHandle {
        self.handle
    }

    fn size(&self) -> Rank {
        self.size
    }

    fn rank(&self) -> Rank {
        self.rank
    }
}

impl CommunicatorCollectives for LoopbackCommunicator<'_> {
    fn barrier(&self) -> Result<()> {
        self.injected_failure(BARRIER)?;
        let contribution = Contribution {
            rank: self.rank,
            operation: BARRIER,
            datatype: Datatype::UInt8,
            count: 0,
            bytes: Vec::new(),
        };
        self.exchange.collective(contribution, &mut [])
    }

    fn all_gather_into<S, R>(&self, sendbuf: &S, recvbuf: &mut R) -> Result<()>
    where
        S: Buffer + ?Sized,
        R: BufferMut + ?Sized,
    {
        let count = check_all_gather_args(self.size, sendbuf, recvbuf)?;
        self.injected_failure(ALL_GATHER)?;
        let contribution = Contribution {
            rank: self.rank,
            operation: ALL_GATHER,
            datatype: sendbuf.as_datatype(),
            count,
            bytes: bytes_of(sendbuf).to_vec(),
        };
        self.exchange.collective(contribution, bytes_of_mut(recvbuf))
    }
}

#[derive(Debug)]
struct Contribution {
    rank: Rank,
    operation: &'static str,
    datatype: Datatype,
    count: usize,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct State {
    generation: u64,
    arrived: usize,
    collected: usize,
    complete: bool,
    contributions: SmallVec<[Option<Contribution>; 8]>,
    aborted: Option<Rank>,
    departed: Option<Rank>,
}

/// Rendezvous shared by the ranks of one `LoopbackUniverse::run`
#[derive(Debug)]
pub(crate) struct Exchange {
    size: usize,
    state: Mutex<State>,
    changed: Condvar,
}

impl Exchange {
    fn new(size: Rank) -> Self {
        let size = size.value_as::<usize>().unwrap_or(0);
        Exchange {
            size,
            state: Mutex::new(State {
                generation: 0,
                arrived: 0,
                collected: 0,
                complete: false,
                contributions: (0..size).map(|_| None).collect(),
                aborted: None,
                departed: None,
            }),
            changed: Condvar::new(),
        }
    }

    /// Deposits `contribution`, waits for all ranks, then copies the concatenation into `recv`.
    fn collective(&self, contribution: Contribution, recv: &mut [u8]) -> Result<()> {
        let rank = contribution.rank;
        let operation = contribution.operation;
        let mut state = self.state.lock();

        // Ranks still copying out the previous generation keep the slot busy.
        while state.complete && state.aborted.is_none() {
            self.changed.wait(&mut state);
        }
        if let Some(gone) = state.aborted.or(state.departed) {
            return Err(Error::Aborted { rank: gone });
        }

        trace!(rank, operation, generation = state.generation, "arrived");
        let slot = contribution.rank.value_as::<usize>().unwrap_or(0);
        state.contributions[slot] = Some(contribution);
        state.arrived += 1;
        if state.arrived == self.size {
            state.complete = true;
            debug!(operation, generation = state.generation, "collective complete");
            self.changed.notify_all();
        } else {
            while !state.complete {
                if let Some(gone) = state.aborted {
                    return Err(Error::Aborted { rank: gone });
                }
                self.changed.wait(&mut state);
            }
        }

        let result = concatenate(&state.contributions, recv);

        state.collected += 1;
        if state.collected == self.size {
            for slot in state.contributions.iter_mut() {
                *slot = None;
            }
            state.arrived = 0;
            state.collected = 0;
            state.complete = false;
            state.generation += 1;
            self.changed.notify_all();
        }
        result
    }

    /// Records that `rank` will not call any further collective.
    fn depart(&self, rank: Rank, clean: bool) {
        let mut state = self.state.lock();
        if clean {
            state.departed.get_or_insert(rank);
            if state.arrived > 0 && !state.complete {
                state.aborted.get_or_insert(rank);
            }
        } else {
            state.aborted.get_or_insert(rank);
        }
        self.changed.notify_all();
    }
}

fn concatenate(contributions: &[Option<Contribution>], recv: &mut [u8]) -> Result<()> {
    let mut present = contributions.iter().flatten();
    let first = match present.next() {
        Some(first) => first,
        None => return Ok(()),
    };
    for other in present {
        let reason = if other.operation != first.operation {
            format!(
                "called {} while rank {} called {}",
                other.operation, first.rank, first.operation
            )
        } else if other.datatype != first.datatype {
            format!(
                "contributed {:?} elements, rank {} contributed {:?}",
                other.datatype, first.rank, first.datatype
            )
        } else if other.count != first.count {
            format!(
                "contributed {} elements, rank {} contributed {}",
                other.count, first.rank, first.count
            )
        } else {
            continue;
        };
        return Err(Error::NotSame {
            rank: other.rank,
            reason,
        });
    }

    let block = first.bytes.len();
    let required = block * contributions.len();
    if recv.len() < required {
        return Err(Error::BufferTooSmall {
            required: first.count * contributions.len(),
            available: recv.len() / first.datatype.size().max(1),
        });
    }
    for (chunk, contribution) in recv.chunks_mut(block.max(1)).zip(contributions.iter().flatten()) {
        chunk[..block].copy_from_slice(&contribution.bytes);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universe_needs_ranks() {
        assert!(matches!(
            LoopbackUniverse::new(0),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn failing_rank_must_exist() {
        let universe = LoopbackUniverse::new(2).unwrap();
        assert!(matches!(
            universe.with_failing_rank(2),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn ranks_see_their_position() {
        let universe = LoopbackUniverse::new(3).unwrap();
        let seen = universe.run(|world| Ok((world.rank(), world.size(), world.handle())));
        let seen: Vec<_> = seen.into_iter().map(Result::unwrap).collect();
        assert_eq!(seen.len(), 3);
        for (rank, (r, size, handle)) in seen.iter().enumerate() {
            assert_eq!(*r as usize, rank);
            assert_eq!(*size, 3);
            assert_eq!(*handle, seen[0].2);
        }
    }

    #[test]
    fn distinct_universes_have_distinct_handles() {
        let a = LoopbackUniverse::new(1).unwrap();
        let b = LoopbackUniverse::new(1).unwrap();
        let ha = a.run(|world| Ok(world.handle())).remove(0).unwrap();
        let hb = b.run(|world| Ok(world.handle())).remove(0).unwrap();
        assert_ne!(ha, hb);
    }

    #[test]
    fn barrier_synchronizes_every_rank() {
        let universe = LoopbackUniverse::new(4).unwrap();
        for result in universe.run(|world| world.barrier()) {
            result.unwrap();
        }
    }

    #[test]
    fn generations_do_not_mix() {
        let universe = LoopbackUniverse::new(4).unwrap();
        let results = universe.run(|world| {
            let mut rounds = Vec::new();
            for round in 0..50 {
                let value = world.rank() * 100 + round;
                rounds.push(world.all_gather_vec(&[value])?);
            }
            Ok(rounds)
        });
        for result in results {
            for (round, gathered) in result.unwrap().into_iter().enumerate() {
                let expected: Vec<i32> = (0..4).map(|rank| rank * 100 + round as i32).collect();
                assert_eq!(gathered, expected);
            }
        }
    }

    #[test]
    fn injected_failure_aborts_peers() {
        let universe = LoopbackUniverse::new(3).unwrap().with_failing_rank(1).unwrap();
        let results = universe.run(|world| world.all_gather_vec(&[world.rank()]));
        assert_eq!(
            results[1],
            Err(Error::CollectiveFailed {
                operation: ALL_GATHER,
                rank: 1
            })
        );
        assert_eq!(results[0], Err(Error::Aborted { rank: 1 }));
        assert_eq!(results[2], Err(Error::Aborted { rank: 1 }));
    }

    #[test]
    fn spawn_failure_aborts_running_ranks() {
        let mut universe = LoopbackUniverse::new(3).unwrap();
        universe.unspawnable_rank = Some(1);
        let results = universe.run(|world| world.barrier());
        assert_eq!(results[0], Err(Error::Aborted { rank: 1 }));
        assert!(matches!(results[1], Err(Error::InvalidConfig(_))));
        assert_eq!(results[2], Err(Error::Aborted { rank: 1 }));
    }

    #[test]
    fn panicking_rank_aborts_peers() {
        let universe = LoopbackUniverse::new(2).unwrap();
        let results = universe.run(|world| {
            if world.rank() == 1 {
                panic!("rank 1 gives up");
            }
            world.barrier()
        });
        assert_eq!(results[0], Err(Error::Aborted { rank: 1 }));
        assert_eq!(results[1], Err(Error::RankPanicked(1)));
    }

    #[test]
    fn unmatched_collective_is_reported() {
        let universe = LoopbackUniverse::new(2).unwrap();
        let results = universe.run(|world| {
            world.barrier()?;
            if world.rank() == 0 {
                world.barrier()?;
            }
            Ok(())
        });
        assert_eq!(results[0], Err(Error::Aborted { rank: 1 }));
        assert_eq!(results[1], Ok(()));
    }

    #[test]
    fn differing_counts_are_not_the_same() {
        let universe = LoopbackUniverse::new(2).unwrap();
        let results = universe.run(|world| {
            let send = vec![7i32; world.rank() as usize + 1];
            let mut recv = vec![0i32; 4];
            world.all_gather_into(&send[..], &mut recv[..])
        });
        for result in results {
            assert!(matches!(result, Err(Error::NotSame { rank: 1, .. })));
        }
    }

    #[test]
    fn differing_operations_are_not_the_same() {
        let universe = LoopbackUniverse::new(2).unwrap();
        let results = universe.run(|world| {
            if world.rank() == 0 {
                world.barrier()
            } else {
                world.all_gather_vec(&[1i32]).map(drop)
            }
        });
        for result in results {
            assert!(matches!(result, Err(Error::NotSame { rank: 1, .. })));
        }
    }

    #[test]
    fn trailing_receive_elements_are_untouched() {
        let universe = LoopbackUniverse::new(2).unwrap();
        let results = universe.run(|world| {
            let mut recv = vec![-1i32; 5];
            world.all_gather_into(&[world.rank(), 10][..], &mut recv[..])?;
            Ok(recv)
        });
        for result in results {
            assert_eq!(result.unwrap(), vec![0, 10, 1, 10, -1]);
        }
    }
}
