//! The smoke test
//!
//! Every rank builds a local buffer, all-gathers it over the world communicator and checks the
//! gathered buffer block by block. By default only the first block is compared, with the buffer
//! that rank 0 contributed; `Validation::AllBlocks` extends the check to every block.
//!
//! Each step is reported as `<step>... OK` or `<step>... FAIL` through `tracing`.

use std::fmt;

use tracing::{error, info};

use crate::collective::CommunicatorCollectives;
use crate::error::{Error, Result};
use crate::topology::Rank;

/// Values every rank contributes unless told otherwise
pub const DEFAULT_VALUES: [i32; 5] = [1, 2, 3, 4, 5];

/// What each rank contributes to the all-gather
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// The same literal values on every rank
    Literal(Vec<i32>),
    /// A single element holding the contributing rank
    Rank,
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Literal(DEFAULT_VALUES.to_vec())
    }
}

impl Payload {
    /// The buffer rank `rank` contributes
    pub fn local_buffer(&self, rank: Rank) -> Vec<i32> {
        match self {
            Payload::Literal(values) => values.clone(),
            Payload::Rank => vec![rank],
        }
    }

    /// The block rank `block` contributed, as it must appear in the gathered buffer
    pub fn expected_block(&self, block: usize) -> Vec<i32> {
        match self {
            Payload::Literal(values) => values.clone(),
            Payload::Rank => vec![Rank::try_from(block).unwrap_or(Rank::MAX)],
        }
    }
}

/// How much of the gathered buffer is checked
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Validation {
    /// Only the first block
    #[default]
    FirstBlock,
    /// Every block
    AllBlocks,
}

/// Configuration of one smoke test run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmokeTest {
    payload: Payload,
    validation: Validation,
    repeat: usize,
}

impl Default for SmokeTest {
    fn default() -> Self {
        SmokeTest {
            payload: Payload::default(),
            validation: Validation::default(),
            repeat: 1,
        }
    }
}

/// Outcome of a successful run on one rank
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    /// Rank of the calling process
    pub rank: Rank,
    /// Size of the world communicator
    pub size: Rank,
    /// The buffer this rank contributed
    pub local: Vec<i32>,
    /// The gathered buffer
    pub gathered: Vec<i32>,
    /// Number of blocks that were validated
    pub blocks_checked: usize,
}

impl SmokeTest {
    /// Replaces the payload.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Replaces the validation mode.
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    /// Number of times the all-gather is issued; every repetition must gather the same result.
    pub fn with_repeat(mut self, repeat: usize) -> Self {
        self.repeat = repeat;
        self
    }

    /// The configured payload
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The configured validation mode
    pub fn validation(&self) -> Validation {
        self.validation
    }

    /// Runs the all-gather and validation steps on `world`.
    ///
    /// Initialization and finalization belong to the caller, which owns the runtime.
    pub fn run<C>(&self, world: &C) -> Result<Report>
    where
        C: CommunicatorCollectives,
    {
        if self.repeat == 0 {
            return Err(Error::InvalidConfig(
                "the all-gather must run at least once".into(),
            ));
        }
        let (rank, size) = (world.rank(), world.size());
        let local = self.payload.local_buffer(rank);

        let gathered = step(rank, "all-gather", || world.all_gather_vec(&local[..]))?;
        for repeat in 1..self.repeat {
            step(rank, "repeat all-gather", || {
                if world.all_gather_vec(&local[..])? == gathered {
                    Ok(())
                } else {
                    Err(Error::NotIdempotent { repeat })
                }
            })?;
        }

        let blocks_checked = step(rank, "validate", || {
            check_blocks(&gathered, local.len(), self.validation, |block| {
                self.payload.expected_block(block)
            })
        })?;

        Ok(Report {
            rank,
            size,
            local,
            gathered,
            blocks_checked,
        })
    }
}

/// Compares `gathered`, split into blocks of `block_len` elements, against `expected(block)`.
///
/// Returns the number of blocks compared. The first differing element is reported as
/// `Error::Mismatch`. With `block_len == 0` there is nothing to compare.
pub fn check_blocks<T, F>(
    gathered: &[T],
    block_len: usize,
    validation: Validation,
    mut expected: F,
) -> Result<usize>
where
    T: PartialEq + fmt::Debug,
    F: FnMut(usize) -> Vec<T>,
{
    if block_len == 0 {
        return Ok(0);
    }
    if gathered.len() < block_len {
        return Err(Error::BufferTooSmall {
            required: block_len,
            available: gathered.len(),
        });
    }
    let blocks = match validation {
        Validation::FirstBlock => 1,
        Validation::AllBlocks => gathered.len() / block_len,
    };

    for (block, found) in gathered.chunks_exact(block_len).take(blocks).enumerate() {
        let want = expected(block);
        if want.len() != block_len {
            return Err(Error::InvalidConfig(format!(
                "expected block {} has {} elements instead of {}",
                block,
                want.len(),
                block_len
            )));
        }
        if let Some(index) = want.iter().zip(found).position(|(w, f)| w != f) {
            return Err(Error::Mismatch {
                block,
                index,
                expected: format!("{:?}", want[index]),
                found: format!("{:?}", found[index]),
            });
        }
    }
    Ok(blocks)
}

/// Runs one named step and reports its outcome in the `<name>... OK|FAIL` form.
pub fn step<T, F>(rank: Rank, name: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    report(Some(rank), name, f())
}

/// Reports the outcome of a step that already ran, optionally tagged with the calling rank.
///
/// Steps that run before the rank is known, like initialization, pass `None`.
pub fn report<T>(rank: Option<Rank>, name: &str, result: Result<T>) -> Result<T> {
    match (&result, rank) {
        (Ok(_), Some(rank)) => info!(rank, "{}... OK", name),
        (Ok(_), None) => info!("{}... OK", name),
        (Err(err), Some(rank)) => error!(rank, "{}... FAIL: {}", name, err),
        (Err(err), None) => error!("{}... FAIL: {}", name, err),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_block_only_by_default() {
        // A broken second block goes unnoticed by the first-block check.
        let gathered = [1, 2, 3, 9, 9, 9];
        let checked =
            check_blocks(&gathered, 3, Validation::FirstBlock, |_| vec![1, 2, 3]).unwrap();
        assert_eq!(checked, 1);

        let err = check_blocks(&gathered, 3, Validation::AllBlocks, |_| vec![1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            Error::Mismatch {
                block: 1,
                index: 0,
                expected: "1".into(),
                found: "9".into()
            }
        );
    }

    #[test]
    fn mismatch_in_first_block() {
        let err = check_blocks(&[1, 2, 4], 3, Validation::FirstBlock, |_| vec![1, 2, 3])
            .unwrap_err();
        assert!(matches!(err, Error::Mismatch { block: 0, index: 2, .. }));
    }

    #[test]
    fn empty_blocks_pass() {
        let gathered: [i32; 0] = [];
        assert_eq!(
            check_blocks(&gathered, 0, Validation::AllBlocks, |_| Vec::new()),
            Ok(0)
        );
    }

    #[test]
    fn short_gathered_buffer() {
        assert_eq!(
            check_blocks(&[1, 2], 3, Validation::FirstBlock, |_| vec![1, 2, 3]),
            Err(Error::BufferTooSmall {
                required: 3,
                available: 2
            })
        );
    }

    #[test]
    fn rank_payload_blocks() {
        let payload = Payload::Rank;
        assert_eq!(payload.local_buffer(3), vec![3]);
        assert_eq!(payload.expected_block(2), vec![2]);
        assert_eq!(
            check_blocks(&[0, 1, 2], 1, Validation::AllBlocks, |b| {
                payload.expected_block(b)
            }),
            Ok(3)
        );
    }

    #[test]
    fn literal_payload_is_identical_everywhere() {
        let payload = Payload::default();
        assert_eq!(payload.local_buffer(0), DEFAULT_VALUES.to_vec());
        assert_eq!(payload.local_buffer(7), payload.expected_block(3));
    }

    #[test]
    fn reports_pass_results_through() {
        assert_eq!(report(None, "initialize", Ok(3)), Ok(3));
        assert_eq!(
            report::<()>(None, "initialize", Err(Error::AlreadyInitialized)),
            Err(Error::AlreadyInitialized)
        );
        assert_eq!(step(2, "validate", || Ok("done")), Ok("done"));
    }

    #[test]
    fn builder() {
        let test = SmokeTest::default()
            .with_payload(Payload::Rank)
            .with_validation(Validation::AllBlocks)
            .with_repeat(3);
        assert_eq!(test.payload(), &Payload::Rank);
        assert_eq!(test.validation(), Validation::AllBlocks);
    }
}
