#![no_main]

use libfuzzer_sys::fuzz_target;

use mlfq_sim::input::parse_process_list;
use mlfq_sim::{audit, RunConfig, SchedulerConfig, Simulation};

// Feeds arbitrary text to the process-list parser. Anything that parses and
// validates is kept small and then run and audited:
// - at most 6 descriptors are kept;
// - bursts are capped at 64 ticks and I/O counts at 3;
// - the first byte picks the level-0 and level-1 quanta.
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(mut specs) = parse_process_list(text) else {
        return;
    };
    specs.truncate(6);
    for spec in &mut specs {
        spec.burst = spec.burst.clamp(-1, 64);
        spec.io_operations = spec.io_operations.clamp(-1, 3);
    }

    let tuning = data.first().copied().unwrap_or(0);
    let q0 = i64::from(tuning & 0x0f) + 1;
    let q1 = i64::from(tuning >> 4) + 1;
    let config = RunConfig::new(
        SchedulerConfig::default()
            .with_quanta(q0, q1)
            .with_io_service_ticks(5),
        specs,
    );

    let Ok(sim) = Simulation::new(&config) else {
        return;
    };
    let report = sim.run().expect("valid config must run to completion");
    if let Err(failure) = audit(&report, &config.processes) {
        panic!("{failure}");
    }
});
