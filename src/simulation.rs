//! Run context: builds the shared resources, drives one thread per process,
//! and assembles the report.
//!
//! Everything with run-wide state lives here and is passed down by
//! reference: the pid allocator, the timeline (clock + trace), the scheduler,
//! and the I/O device. There are no statics.
//!
//! Failure handling: the first actor that returns a non-abort error (or
//! panics) aborts both resources. Every other actor then unwinds with
//! `RunError::Aborted`, and the run reports the root cause.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::clock::Pacing;
use crate::config::{RunConfig, Settings};
use crate::error::{ConfigError, InvariantViolation, RunError, ViolationKind};
use crate::io_device::IoDevice;
use crate::process::{Pid, PidAllocator, Process, ProcessState, ProcessSummary};
use crate::queue::{Quantum, LEVELS};
use crate::scheduler::Scheduler;
use crate::trace::{Timeline, TraceEvent, TraceSink};

/// Result of a completed run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub final_clock: u64,
    /// Quantum of each level the run was scheduled with.
    pub quanta: [Quantum; LEVELS],
    /// Ticks charged per I/O service.
    pub io_service_ticks: u64,
    /// One summary per process, in pid order.
    pub processes: Vec<ProcessSummary>,
    /// Retained trace, in emission order.
    pub events: Vec<TraceEvent>,
    /// Events dropped from the front of the trace ring.
    pub events_evicted: u64,
}

impl RunReport {
    /// Whether `events` holds the whole trace.
    #[inline]
    pub fn is_complete_trace(&self) -> bool {
        self.events_evicted == 0
    }

    pub fn summary(&self, pid: Pid) -> Option<&ProcessSummary> {
        self.processes.iter().find(|s| s.pid == pid)
    }

    pub fn events_for(&self, pid: Pid) -> impl Iterator<Item = &TraceEvent> + '_ {
        self.events.iter().filter(move |e| e.pid == pid)
    }

    pub fn total_dispatches(&self) -> u64 {
        self.processes.iter().map(|s| s.stats.dispatches).sum()
    }

    pub fn total_demotions(&self) -> u64 {
        self.processes.iter().map(|s| s.stats.demotions).sum()
    }

    pub fn total_interruptions(&self) -> u64 {
        self.processes.iter().map(|s| s.stats.interruptions).sum()
    }

    pub fn total_io_services(&self) -> u64 {
        self.processes.iter().map(|s| s.stats.io_services).sum()
    }
}

/// A validated, ready-to-run simulation.
#[derive(Debug)]
pub struct Simulation {
    pacing: Pacing,
    timeline: Arc<Timeline>,
    scheduler: Scheduler,
    io: IoDevice,
    processes: Vec<Process>,
}

impl Simulation {
    /// Validate `config` and build every process. Nothing runs yet.
    pub fn new(config: &RunConfig) -> Result<Self, ConfigError> {
        let settings = config.validate()?;
        Ok(Self::from_settings(settings))
    }

    pub fn from_settings(settings: Settings) -> Self {
        let timeline = Arc::new(Timeline::new(settings.trace_capacity));
        let scheduler = Scheduler::new(settings.levels, settings.pacing, Arc::clone(&timeline));
        let io = IoDevice::new(
            settings.io_service_ticks,
            settings.pacing,
            Arc::clone(&timeline),
        );

        let mut pids = PidAllocator::new();
        let processes = settings
            .demands
            .iter()
            .map(|&demand| Process::new(pids.allocate(), demand))
            .collect();

        Self {
            pacing: settings.pacing,
            timeline,
            scheduler,
            io,
            processes,
        }
    }

    /// Stream every trace event to `sink` while the run is in progress.
    pub fn with_sink(self, sink: impl TraceSink + 'static) -> Self {
        self.timeline.set_forward(Box::new(sink));
        self
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.processes.iter().map(Process::pid).collect()
    }

    #[inline]
    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn io_device(&self) -> &IoDevice {
        &self.io
    }

    /// Run every process to termination.
    pub fn run(self) -> Result<RunReport, RunError> {
        let Simulation {
            pacing,
            timeline,
            scheduler,
            io,
            processes,
        } = self;
        let count = processes.len();
        log::info!(
            "run start: processes={count} quanta=[{}, {}, {}] io_ticks={} tick={:?}",
            scheduler.quantum(0),
            scheduler.quantum(1),
            scheduler.quantum(2),
            io.service_ticks(),
            pacing.tick()
        );

        let outcomes = drive(&scheduler, &io, pacing, processes);
        timeline.close_forward();

        let mut summaries = Vec::with_capacity(count);
        let mut root: Option<RunError> = None;
        for outcome in outcomes {
            match outcome {
                Ok(summary) => summaries.push(summary),
                Err(err) => {
                    let replace = match &root {
                        None => true,
                        Some(prev) => prev.is_aborted() && !err.is_aborted(),
                    };
                    if replace {
                        root = Some(err);
                    }
                }
            }
        }
        if let Some(err) = root {
            log::error!("run failed: {err}");
            return Err(err);
        }

        for summary in &summaries {
            check_terminated(summary)?;
        }
        summaries.sort_by_key(|s| s.pid);

        let (events, events_evicted) = timeline.events();
        let report = RunReport {
            final_clock: timeline.now(),
            quanta: [
                scheduler.quantum(0),
                scheduler.quantum(1),
                scheduler.quantum(2),
            ],
            io_service_ticks: io.service_ticks(),
            processes: summaries,
            events,
            events_evicted,
        };
        log::info!(
            "run finished: clock={} dispatches={} demotions={} io_services={}",
            report.final_clock,
            report.total_dispatches(),
            report.total_demotions(),
            report.total_io_services()
        );
        Ok(report)
    }
}

/// One named thread per process; returns outcomes in spawn order.
fn drive(
    scheduler: &Scheduler,
    io: &IoDevice,
    pacing: Pacing,
    processes: Vec<Process>,
) -> Vec<Result<ProcessSummary, RunError>> {
    let abort_all = || {
        scheduler.abort();
        io.abort();
    };

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(processes.len());
        let mut outcomes = Vec::with_capacity(processes.len());

        for p in processes {
            let pid = p.pid();
            let spawned = thread::Builder::new()
                .name(format!("mlfq-pid-{pid}"))
                .spawn_scoped(scope, move || {
                    let result = catch_unwind(AssertUnwindSafe(|| p.run(scheduler, io, pacing)))
                        .unwrap_or(Err(RunError::ProcessPanicked { pid }));
                    if let Err(err) = &result {
                        if !err.is_aborted() {
                            abort_all();
                        }
                    }
                    result
                });
            match spawned {
                Ok(handle) => handles.push((pid, handle)),
                Err(err) => {
                    abort_all();
                    outcomes.push(Err(RunError::Spawn(err)));
                    break;
                }
            }
        }

        let mut joined: Vec<_> = handles
            .into_iter()
            .map(|(pid, handle)| {
                handle
                    .join()
                    .unwrap_or(Err(RunError::ProcessPanicked { pid }))
            })
            .collect();
        joined.append(&mut outcomes);
        joined
    })
}

/// A process whose loop returned must be terminated with nothing owed.
fn check_terminated(summary: &ProcessSummary) -> Result<(), InvariantViolation> {
    if summary.state == ProcessState::Terminated
        && summary.final_priority == -1
        && summary.io_remaining == 0
    {
        return Ok(());
    }
    let v = InvariantViolation::new(summary.pid, summary.queue_id(), ViolationKind::Orphaned);
    log::error!("{v}");
    Err(v)
}
