//! Multilevel-feedback-queue CPU scheduling simulator.
//!
//! ## Scope
//! A fixed set of synthetic processes contends for one CPU and one I/O
//! device. Each process runs on its own thread and drives itself through
//! CPU and I/O requests until its demand is met. The CPU is arbitrated by a
//! three-level MLFQ: two Round-Robin levels with distinct quanta and one
//! FCFS level with an unbounded quantum. The device serves requests in
//! arrival order.
//!
//! ## Key invariants
//! - At most one process holds the CPU and at most one holds the device.
//! - Within a level, dispatch order equals arrival order. Across levels, a
//!   lower level number always wins, even over earlier arrivals.
//! - A quantum expiry with the burst incomplete demotes one level (capped
//!   at 2). Returning from I/O resets the process to level 0.
//! - The clock advances only by ticks actually consumed, and the trace's
//!   clock column is non-decreasing. Every CPU span is exactly the ticks run
//!   in that turn and every I/O span is exactly the service duration.
//! - Any internal inconsistency aborts the whole run with the offending pid
//!   and queue; there is no partial success.
//!
//! ## Flow
//! `RunConfig -> validate -> Simulation -> (per-process threads) -> RunReport -> audit`
//!
//! ## Notable entry points
//! - [`Simulation`]: build from a [`RunConfig`] and `run()` to completion.
//! - [`Scheduler`] / [`IoDevice`]: the two shared resources.
//! - [`audit()`]: trace oracle over a finished [`RunReport`].
//! - [`input`]: text and JSON process lists.

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod grant;
pub mod input;
pub mod io_device;
pub mod process;
pub mod queue;
pub mod scheduler;
pub mod simulation;
pub mod trace;

pub use audit::{audit, AuditFailure, AuditFailureKind, AuditSummary};
pub use clock::{Pacing, SimClock};
pub use config::{ProcessSpec, RunConfig, SchedulerConfig, Settings};
pub use error::{ConfigError, InvariantViolation, QueueId, RunError, ViolationKind};
pub use io_device::{IoDevice, IoSnapshot};
pub use process::{Pid, Priority, ProcessState, ProcessStats, ProcessSummary};
pub use queue::{Discipline, Quantum};
pub use scheduler::{Scheduler, SchedulerSnapshot};
pub use simulation::{RunReport, Simulation};
pub use trace::{EventKind, Resource, Timeline, TraceEvent, TraceRing, TraceSink};
