//! Property tests for whole runs.
//!
//! Any valid descriptor set must run to completion, pass the trace oracle,
//! and end at a clock value that depends only on the demand.

use proptest::prelude::*;

use mlfq_sim::{audit, ProcessSpec, RunConfig, SchedulerConfig, Simulation};

fn spec_strategy() -> impl Strategy<Value = ProcessSpec> {
    (1i64..30, 0i64..4).prop_map(|(burst, io)| ProcessSpec::new(burst, io))
}

fn config_strategy() -> impl Strategy<Value = RunConfig> {
    (
        1i64..12,
        1i64..16,
        1i64..25,
        prop::collection::vec(spec_strategy(), 0..7),
    )
        .prop_map(|(q0, q1, io_ticks, processes)| {
            RunConfig::new(
                SchedulerConfig::default()
                    .with_quanta(q0, q1)
                    .with_io_service_ticks(io_ticks),
                processes,
            )
        })
}

/// Priority history a burst sequence must produce with no interruptions.
fn expected_history(spec: &ProcessSpec, q0: i64, q1: i64) -> Vec<i8> {
    let mut history = vec![0i8];
    for round in 0..=spec.io_operations {
        if round > 0 {
            history.push(0);
        }
        if spec.burst > q0 {
            history.push(1);
            if spec.burst > q0 + q1 {
                history.push(2);
            }
        }
        history.push(if round < spec.io_operations { 3 } else { -1 });
    }
    history
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_valid_run_passes_audit(config in config_strategy()) {
        let report = Simulation::new(&config).unwrap().run().unwrap();
        let summary = audit(&report, &config.processes);
        prop_assert!(summary.is_ok(), "{:?}", summary.err());

        // Instant pacing runs every slice whole: no interruptions, and one
        // dispatch per CPU span.
        prop_assert_eq!(report.total_interruptions(), 0);
        prop_assert_eq!(report.total_dispatches(), summary.map_or(0, |s| s.cpu_spans));

        let io_ticks = config.scheduler.io_service_ticks as u64;
        let expected_clock: u64 = config
            .processes
            .iter()
            .map(|p| {
                let (b, io) = (p.burst as u64, p.io_operations as u64);
                b * (io + 1) + io * io_ticks
            })
            .sum();
        prop_assert_eq!(report.final_clock, expected_clock);
    }

    #[test]
    fn histories_follow_burst_and_quanta(config in config_strategy()) {
        let report = Simulation::new(&config).unwrap().run().unwrap();
        let (q0, q1) = (config.scheduler.quantum_level0, config.scheduler.quantum_level1);
        for (spec, summary) in config.processes.iter().zip(&report.processes) {
            prop_assert_eq!(
                &summary.priority_history,
                &expected_history(spec, q0, q1),
                "pid {}", summary.pid
            );
        }
    }

    #[test]
    fn invalid_descriptor_is_rejected_before_running(
        mut processes in prop::collection::vec(spec_strategy(), 1..6),
        bad_idx in any::<prop::sample::Index>(),
        bad_burst in -5i64..=0,
    ) {
        let idx = bad_idx.index(processes.len());
        processes[idx].burst = bad_burst;
        let config = RunConfig::new(SchedulerConfig::default(), processes);
        prop_assert!(Simulation::new(&config).is_err());
    }
}
