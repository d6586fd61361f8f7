//! End-to-end simulation tests.
//!
//! Run with: `cargo test --test simulation`
//!
//! Seed windows for the random batch can be overridden with
//! `MLFQ_SEED_START` and `MLFQ_SEED_COUNT`.

mod corpus_replay;
mod random_runs;
mod scenarios;

use mlfq_sim::{audit, AuditSummary, ProcessSpec, RunConfig, RunReport, Simulation};

/// Clock value every complete run must end at.
///
/// Both resources advance the same counter, so the total is independent of
/// interleaving: every CPU tick owed plus every I/O service.
pub fn expected_final_clock(config: &RunConfig) -> u64 {
    let io_ticks = config.scheduler.io_service_ticks as u64;
    config
        .processes
        .iter()
        .map(|p| {
            let (burst, io) = (p.burst as u64, p.io_operations as u64);
            burst * (io + 1) + io * io_ticks
        })
        .sum()
}

/// Run `config` to completion and audit the trace.
pub fn run_audited(config: &RunConfig) -> (RunReport, AuditSummary) {
    let report = Simulation::new(config)
        .expect("valid config")
        .run()
        .unwrap_or_else(|err| panic!("run failed: {err}"));
    let summary = audit(&report, &config.processes).unwrap_or_else(|f| panic!("{f}"));
    assert_eq!(report.final_clock, expected_final_clock(config));
    (report, summary)
}

pub fn specs(pairs: &[(i64, i64)]) -> Vec<ProcessSpec> {
    pairs
        .iter()
        .map(|&(burst, io)| ProcessSpec::new(burst, io))
        .collect()
}
