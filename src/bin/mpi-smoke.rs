//! Command line entry point of the smoke test
//!
//! Runs the all-gather smoke test on the MPI runtime (start it with `mpiexec -n <P>`) or on the
//! in-process loopback runtime, and exits with a non-zero status on any failure.

use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mpi_smoke::loopback::LoopbackUniverse;
use mpi_smoke::smoke::{Payload, SmokeTest, Validation};
use mpi_smoke::topology::Rank;
use mpi_smoke::{Error, Result};

#[derive(Debug, Parser)]
#[command(version, about = "All-gather smoke test for MPI runtimes")]
struct Cli {
    /// Runtime to test
    #[arg(long, value_enum, default_value_t = Backend::default())]
    backend: Backend,

    /// Number of ranks of the loopback runtime
    #[arg(long, env = "MPI_SMOKE_RANKS", default_value_t = 1)]
    ranks: usize,

    /// Comma separated values every rank contributes; an empty list gathers nothing
    #[arg(long, default_value = "1,2,3,4,5", value_parser = parse_values, allow_hyphen_values = true)]
    values: Values,

    /// What each rank contributes
    #[arg(long, value_enum, default_value_t = PayloadKind::Literal)]
    payload: PayloadKind,

    /// How much of the gathered buffer is validated
    #[arg(long = "validate", value_enum, default_value_t = ValidationKind::FirstBlock)]
    validation: ValidationKind,

    /// How many times the all-gather is issued
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    repeat: u32,

    /// Make the collectives of this loopback rank fail
    #[arg(long)]
    fail_rank: Option<Rank>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// The MPI library this binary was built against
    Mpi,
    /// One thread per rank inside this process
    Loopback,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "mpi-runtime") {
            Backend::Mpi
        } else {
            Backend::Loopback
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum PayloadKind {
    /// The values given with --values
    Literal,
    /// Each rank contributes its own rank
    Rank,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ValidationKind {
    /// Check the first gathered block only
    FirstBlock,
    /// Check every gathered block
    AllBlocks,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Values(Vec<i32>);

fn parse_values(s: &str) -> std::result::Result<Values, String> {
    if s.trim().is_empty() {
        return Ok(Values(Vec::new()));
    }
    s.split(',')
        .map(|v| {
            v.trim()
                .parse::<i32>()
                .map_err(|e| format!("invalid value {:?}: {}", v, e))
        })
        .collect::<std::result::Result<_, _>>()
        .map(Values)
}

impl Cli {
    fn smoke_test(&self) -> SmokeTest {
        let payload = match self.payload {
            PayloadKind::Literal => Payload::Literal(self.values.0.clone()),
            PayloadKind::Rank => Payload::Rank,
        };
        let validation = match self.validation {
            ValidationKind::FirstBlock => Validation::FirstBlock,
            ValidationKind::AllBlocks => Validation::AllBlocks,
        };
        SmokeTest::default()
            .with_payload(payload)
            .with_validation(validation)
            .with_repeat(self.repeat as usize)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("smoke test failed: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let test = cli.smoke_test();
    match cli.backend {
        Backend::Mpi => run_mpi(cli, &test),
        Backend::Loopback => run_loopback(cli, &test),
    }
}

#[cfg(feature = "mpi-runtime")]
fn run_mpi(cli: &Cli, test: &SmokeTest) -> Result<()> {
    use mpi_smoke::environment;
    use mpi_smoke::smoke::{report, step};
    use mpi_smoke::traits::*;

    if cli.fail_rank.is_some() {
        return Err(Error::InvalidConfig(
            "--fail-rank only applies to the loopback backend".into(),
        ));
    }

    let universe = report(None, "initialize", environment::initialize())?;
    let world = universe.world();
    let rank = world.rank();
    if rank == 0 {
        log_runtime_version();
    }
    info!(rank, size = world.size(), "joined world communicator");

    let outcome = test.run(&world)?;
    info!(rank, gathered = ?outcome.gathered, blocks = outcome.blocks_checked, "all-gather verified");

    step(rank, "finalize", || universe.finalize())
}

/// Logs the MPI standard and library versions. Failing to query them does not stop the run:
/// returning early would finalize this rank while its peers enter the collective.
#[cfg(feature = "mpi-runtime")]
fn log_runtime_version() {
    use mpi_smoke::environment;
    use tracing::warn;

    match environment::version().and_then(|v| Ok((v, environment::library_version()?))) {
        Ok(((version, subversion), library)) => {
            info!("MPI {}.{}: {}", version, subversion, library)
        }
        Err(err) => warn!("cannot identify the MPI library: {}", err),
    }
}

#[cfg(not(feature = "mpi-runtime"))]
fn run_mpi(_cli: &Cli, _test: &SmokeTest) -> Result<()> {
    Err(Error::InvalidConfig(
        "built without MPI support; rebuild with `--features mpi-runtime` or use `--backend loopback`"
            .into(),
    ))
}

fn run_loopback(cli: &Cli, test: &SmokeTest) -> Result<()> {
    let mut universe = LoopbackUniverse::new(cli.ranks)?;
    if let Some(rank) = cli.fail_rank {
        universe = universe.with_failing_rank(rank)?;
    }
    info!(size = universe.size(), "starting loopback universe");

    let results = universe.run(|world| test.run(world));
    let mut cause: Option<Error> = None;
    for result in results {
        match result {
            Ok(report) => info!(
                rank = report.rank,
                gathered = ?report.gathered,
                blocks = report.blocks_checked,
                "all-gather verified"
            ),
            Err(err) => cause = Some(root_cause(cause.take(), err)),
        }
    }
    match cause {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Keeps the first error that is not merely a peer noticing another rank's failure.
fn root_cause(current: Option<Error>, next: Error) -> Error {
    match current {
        Some(Error::Aborted { .. }) if !matches!(next, Error::Aborted { .. }) => next,
        Some(current) => current,
        None => next,
    }
}
