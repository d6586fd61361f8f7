//! Bounded random simulations checked by the trace oracle.

use mlfq_sim::{ProcessSpec, RunConfig, SchedulerConfig};

use super::run_audited;

const DEFAULT_SEED_COUNT: u64 = 40;

fn seed_value_from_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// xorshift64*; enough to spread small test inputs.
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn range(&mut self, lo: i64, hi: i64) -> i64 {
        lo + (self.next_u64() % (hi - lo + 1) as u64) as i64
    }
}

fn random_config(seed: u64) -> RunConfig {
    let mut rng = Rng::new(seed);
    let scheduler = SchedulerConfig::default()
        .with_quanta(rng.range(1, 12), rng.range(1, 20))
        .with_io_service_ticks(rng.range(1, 25));
    let count = rng.range(1, 8) as usize;
    let processes = (0..count)
        .map(|_| ProcessSpec::new(rng.range(1, 40), rng.range(0, 3)))
        .collect();
    RunConfig::new(scheduler, processes)
}

#[test]
fn bounded_random_runs() {
    let seed_start = seed_value_from_env("MLFQ_SEED_START", 0);
    let seed_count = seed_value_from_env("MLFQ_SEED_COUNT", DEFAULT_SEED_COUNT);
    for seed in seed_start..seed_start.saturating_add(seed_count) {
        let config = random_config(seed);
        let (report, summary) = run_audited(&config);
        assert_eq!(
            summary.processes,
            config.processes.len(),
            "seed {seed}: {config:?}"
        );
        for s in &report.processes {
            assert!(
                s.consumed <= s.burst,
                "seed {seed}: pid {} consumed {} of {}",
                s.pid,
                s.consumed,
                s.burst
            );
        }
    }
}

#[test]
fn random_configs_are_reproducible() {
    assert_eq!(random_config(7), random_config(7));
    assert_ne!(random_config(7), random_config(8));
}
