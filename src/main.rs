//! MLFQ Scheduling Simulator CLI
//!
//! Runs a process list through the MLFQ scheduler and prints the trace.
//!
//! # Input
//!
//! A `.json` file holding a full run configuration, or a text file with one
//! `burst io_operations` pair per line (`#` starts a comment).
//!
//! # Output Format
//!
//! Trace events are written to stdout as they happen:
//! `CPU_START pid=0 clock=0`. With `--format=json` the whole run report is
//! written as one JSON document instead.
//!
//! Statistics are written to stderr upon completion:
//! `processes=N clock=N dispatches=N demotions=N interruptions=N io=N events=N elapsed_ms=N`
//!
//! Log verbosity comes from `MLFQ_LOG` (`error`, `warn`, `info`, `debug`,
//! `trace`; default `warn`).
//!
//! # Exit Codes
//!
//! - `0`: Every process terminated (and the audit passed, if requested)
//! - `1`: Invariant violation or failed audit
//! - `2`: Invalid arguments or configuration error

use mlfq_sim::input::load_run_config;
use mlfq_sim::{
    audit, ProcessSpec, RunConfig, SchedulerConfig, Simulation, TraceEvent, TraceSink,
};
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::exit;
use std::time::Instant;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Json,
}

fn print_usage(exe: &std::ffi::OsStr) {
    eprintln!(
        "usage: {} [OPTIONS] <input | --demo>

OPTIONS:
    --quantum0=<N>          Level 0 quantum in ticks (default: 10)
    --quantum1=<N>          Level 1 quantum in ticks (default: 15)
    --io-ticks=<N>          Ticks per I/O service (default: 20)
    --tick-us=<N>           Wall-clock microseconds per tick (default: 0, instant)
    --format=<text|json>    Output format (default: text)
    --audit                 Check the finished trace against the scheduling rules
    --demo                  Run the built-in two-process demo instead of <input>
    --help, -h              Show this help message",
        exe.to_string_lossy()
    );
}

fn parse_num<T: std::str::FromStr>(flag: &str, value: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        eprintln!("invalid {flag} value: {value}");
        exit(2);
    })
}

/// Writes each event to stdout as it is recorded.
struct StdoutTrace;

impl TraceSink for StdoutTrace {
    fn record(&mut self, event: TraceEvent) {
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{event}");
    }
}

/// Minimal stderr logger.
struct StderrLogger {
    level: log::LevelFilter,
}

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let thread = std::thread::current();
        eprintln!(
            "[{:<5} {}] {}",
            record.level(),
            thread.name().unwrap_or("main"),
            record.args()
        );
    }

    fn flush(&self) {}
}

fn init_logging() {
    let level = env::var("MLFQ_LOG")
        .ok()
        .and_then(|v| v.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Warn);
    let logger = Box::leak(Box::new(StderrLogger { level }));
    if log::set_logger(logger).is_ok() {
        log::set_max_level(level);
    }
}

/// Two processes, `{burst 2, io 1}` and `{burst 5, io 2}`, default tuning.
fn demo_config() -> RunConfig {
    RunConfig::new(
        SchedulerConfig::default(),
        vec![ProcessSpec::new(2, 1), ProcessSpec::new(5, 2)],
    )
}

fn main() {
    init_logging();

    let mut args = env::args_os();
    let exe = args.next().unwrap_or_else(|| "mlfq-sim".into());
    let mut input: Option<PathBuf> = None;
    let mut quantum0: Option<i64> = None;
    let mut quantum1: Option<i64> = None;
    let mut io_ticks: Option<i64> = None;
    let mut tick_us: Option<u64> = None;
    let mut format = Format::Text;
    let mut run_audit = false;
    let mut demo = false;

    for arg in args {
        if let Some(flag) = arg.to_str() {
            if let Some(value) = flag.strip_prefix("--quantum0=") {
                quantum0 = Some(parse_num("--quantum0", value));
                continue;
            }
            if let Some(value) = flag.strip_prefix("--quantum1=") {
                quantum1 = Some(parse_num("--quantum1", value));
                continue;
            }
            if let Some(value) = flag.strip_prefix("--io-ticks=") {
                io_ticks = Some(parse_num("--io-ticks", value));
                continue;
            }
            if let Some(value) = flag.strip_prefix("--tick-us=") {
                tick_us = Some(parse_num("--tick-us", value));
                continue;
            }
            if let Some(value) = flag.strip_prefix("--format=") {
                format = match value {
                    "text" => Format::Text,
                    "json" => Format::Json,
                    _ => {
                        eprintln!("invalid --format value: {value}");
                        exit(2);
                    }
                };
                continue;
            }
            match flag {
                "--audit" => {
                    run_audit = true;
                    continue;
                }
                "--demo" => {
                    demo = true;
                    continue;
                }
                "--help" | "-h" => {
                    print_usage(&exe);
                    exit(0);
                }
                _ if flag.starts_with("--") => {
                    eprintln!("unknown flag: {flag}");
                    print_usage(&exe);
                    exit(2);
                }
                _ => {}
            }
        }

        if input.is_some() {
            print_usage(&exe);
            exit(2);
        }
        input = Some(PathBuf::from(arg));
    }

    let mut config = match (input, demo) {
        (Some(input), false) => load_run_config(&input).unwrap_or_else(|err| {
            eprintln!("{}: {err}", input.display());
            exit(2);
        }),
        (None, true) => demo_config(),
        _ => {
            print_usage(&exe);
            exit(2);
        }
    };
    if let Some(q) = quantum0 {
        config.scheduler.quantum_level0 = q;
    }
    if let Some(q) = quantum1 {
        config.scheduler.quantum_level1 = q;
    }
    if let Some(t) = io_ticks {
        config.scheduler.io_service_ticks = t;
    }
    if let Some(t) = tick_us {
        config.scheduler.tick_micros = t;
    }

    let mut sim = Simulation::new(&config).unwrap_or_else(|err| {
        eprintln!("configuration error: {err}");
        exit(2);
    });
    if format == Format::Text {
        sim = sim.with_sink(StdoutTrace);
    }

    let start = Instant::now();
    let report = match sim.run() {
        Ok(report) => report,
        Err(err) => {
            eprintln!("{err}");
            exit(1);
        }
    };
    let elapsed = start.elapsed();

    if format == Format::Json {
        let mut out = io::stdout().lock();
        if let Err(err) = serde_json::to_writer_pretty(&mut out, &report) {
            eprintln!("failed to write report: {err}");
            exit(1);
        }
        let _ = writeln!(out);
    }

    eprintln!(
        "processes={} clock={} dispatches={} demotions={} interruptions={} io={} events={} elapsed_ms={}",
        report.processes.len(),
        report.final_clock,
        report.total_dispatches(),
        report.total_demotions(),
        report.total_interruptions(),
        report.total_io_services(),
        report.events.len() as u64 + report.events_evicted,
        elapsed.as_millis()
    );

    if run_audit {
        match audit(&report, &config.processes) {
            Ok(summary) => eprintln!(
                "audit ok cpu_spans={} io_spans={}",
                summary.cpu_spans, summary.io_spans
            ),
            Err(failure) => {
                eprintln!("{failure}");
                exit(1);
            }
        }
    }
}
