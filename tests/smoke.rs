use mpi_smoke::loopback::LoopbackUniverse;
use mpi_smoke::smoke::{Payload, SmokeTest, Validation, DEFAULT_VALUES};
use mpi_smoke::Error;

#[test]
fn default_run_on_one_rank() {
    let universe = LoopbackUniverse::new(1).unwrap();
    let report = universe
        .run(|world| SmokeTest::default().run(world))
        .remove(0)
        .unwrap();
    assert_eq!(report.rank, 0);
    assert_eq!(report.size, 1);
    assert_eq!(report.local, DEFAULT_VALUES.to_vec());
    assert_eq!(report.gathered, vec![1, 2, 3, 4, 5]);
    assert_eq!(report.blocks_checked, 1);
}

#[test]
fn default_run_on_two_ranks() {
    let universe = LoopbackUniverse::new(2).unwrap();
    for (rank, report) in universe
        .run(|world| SmokeTest::default().run(world))
        .into_iter()
        .enumerate()
    {
        let report = report.unwrap();
        assert_eq!(report.rank as usize, rank);
        assert_eq!(report.gathered, vec![1, 2, 3, 4, 5, 1, 2, 3, 4, 5]);
        assert_eq!(report.blocks_checked, 1);
    }
}

#[test]
fn all_blocks_validation_checks_every_rank() {
    let test = SmokeTest::default().with_validation(Validation::AllBlocks);
    let universe = LoopbackUniverse::new(4).unwrap();
    for report in universe.run(|world| test.run(world)) {
        assert_eq!(report.unwrap().blocks_checked, 4);
    }
}

#[test]
fn rank_payload() {
    let test = SmokeTest::default()
        .with_payload(Payload::Rank)
        .with_validation(Validation::AllBlocks);
    let universe = LoopbackUniverse::new(3).unwrap();
    for report in universe.run(|world| test.run(world)) {
        let report = report.unwrap();
        assert_eq!(report.local, vec![report.rank]);
        assert_eq!(report.gathered, vec![0, 1, 2]);
    }
}

#[test]
fn empty_payload_passes() {
    let test = SmokeTest::default().with_payload(Payload::Literal(Vec::new()));
    let universe = LoopbackUniverse::new(2).unwrap();
    for report in universe.run(|world| test.run(world)) {
        let report = report.unwrap();
        assert!(report.gathered.is_empty());
        assert_eq!(report.blocks_checked, 0);
    }
}

#[test]
fn repeated_runs_are_idempotent() {
    let test = SmokeTest::default().with_repeat(5);
    let universe = LoopbackUniverse::new(3).unwrap();
    for report in universe.run(|world| test.run(world)) {
        assert_eq!(report.unwrap().gathered.len(), 15);
    }
}

#[test]
fn zero_repeats_is_a_configuration_error() {
    let test = SmokeTest::default().with_repeat(0);
    let universe = LoopbackUniverse::new(1).unwrap();
    assert!(matches!(
        universe.run(|world| test.run(world)).remove(0),
        Err(Error::InvalidConfig(_))
    ));
}

#[test]
fn collective_failure_stops_before_validation() {
    let universe = LoopbackUniverse::new(2)
        .unwrap()
        .with_failing_rank(1)
        .unwrap();
    let results = universe.run(|world| SmokeTest::default().run(world));
    assert_eq!(results[0], Err(Error::Aborted { rank: 1 }));
    assert_eq!(
        results[1],
        Err(Error::CollectiveFailed {
            operation: "all_gather",
            rank: 1
        })
    );
}

#[test]
fn single_rank_failure() {
    let universe = LoopbackUniverse::new(1)
        .unwrap()
        .with_failing_rank(0)
        .unwrap();
    let result = universe.run(|world| SmokeTest::default().run(world)).remove(0);
    assert!(matches!(result, Err(Error::CollectiveFailed { rank: 0, .. })));
}
