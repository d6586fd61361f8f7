//! Synthetic process: demand, run-state, and the execution state machine.
//!
//! ```text
//!            ┌──────────── preempted / interrupted ───────────┐
//!            ▼                                                │
//!  READY ──► RUNNING ──► burst done, io owed ──► IO_WAIT ──► IO_RUNNING
//!            │                                                │
//!            │                          returned (level 0) ◄──┘
//!            └──► burst done, no io ──► TERMINATED
//! ```
//!
//! A `Process` is owned by the thread that drives it. The scheduler and the
//! I/O device only touch it through `&mut` borrows handed to them for the
//! duration of a request or release, while holding their own lock, so the
//! two writer roles never overlap. The `active` flag is the one field
//! shared without the borrow: the scheduler may clear it to interrupt the
//! running slice.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Pacing;
use crate::config::Demand;
use crate::error::{QueueId, RunError};
use crate::grant::Waiter;
use crate::io_device::IoDevice;
use crate::queue::LAST_LEVEL;
use crate::scheduler::Scheduler;

/// Process identifier, unique and strictly increasing within a run.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Pid(u32);

impl Pid {
    pub const fn from_raw(raw: u32) -> Self {
        Pid(raw)
    }

    #[inline]
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out pids in creation order. Owned by the run context.
#[derive(Debug, Default)]
pub struct PidAllocator {
    next: u32,
}

impl PidAllocator {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn allocate(&mut self) -> Pid {
        let pid = Pid(self.next);
        self.next += 1;
        pid
    }
}

/// Where a process sits in the priority scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    /// Queued for, or holding, the CPU at this level.
    Level(u8),
    /// Queued for, or being served by, the I/O device.
    Io,
    Terminated,
}

impl Priority {
    /// Numeric encoding: 0..=2 for CPU levels, 3 for I/O, -1 when done.
    #[inline]
    pub fn code(&self) -> i8 {
        match *self {
            Priority::Level(level) => level as i8,
            Priority::Io => 3,
            Priority::Terminated => -1,
        }
    }

    #[inline]
    pub fn level(&self) -> Option<u8> {
        match *self {
            Priority::Level(level) => Some(level),
            _ => None,
        }
    }
}

/// Execution state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Ready,
    Running,
    IoWait,
    IoRunning,
    Terminated,
}

/// One dispatch as seen by the executing process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Turn {
    /// Ticks the process was allowed to run.
    pub slice: u64,
    /// Ticks it actually ran before the slice ended or was interrupted.
    pub ran: u64,
}

impl Turn {
    /// The slice timer, not an interruption, ended the turn.
    #[inline]
    pub fn expired(&self) -> bool {
        self.ran == self.slice
    }
}

/// What a CPU release decided for the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Interrupted before its slice ran out; same level, back of the queue.
    Requeue,
    /// Slice ran out with the burst incomplete.
    Demoted { from: u8, to: u8 },
    /// Burst complete with I/O still owed.
    Io,
    /// Burst complete, nothing owed.
    Terminated,
}

/// Per-process counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStats {
    pub dispatches: u64,
    pub demotions: u64,
    pub interruptions: u64,
    pub io_services: u64,
    pub cpu_ticks: u64,
}

/// Final record of a process, produced when its loop ends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub pid: Pid,
    pub burst: u64,
    pub io_operations: u64,
    pub io_remaining: u64,
    pub consumed: u64,
    pub final_priority: i8,
    pub state: ProcessState,
    /// Every priority the process held, in order, starting at 0.
    pub priority_history: Vec<i8>,
    #[serde(flatten)]
    pub stats: ProcessStats,
}

impl ProcessSummary {
    /// Queue the process was last on. A terminated process reports the CPU
    /// level it finished from.
    pub fn queue_id(&self) -> QueueId {
        match self.final_priority {
            3 => QueueId::Io,
            code @ 0..=2 => QueueId::Cpu(code as u8),
            _ => QueueId::Cpu(last_cpu_level(&self.priority_history)),
        }
    }
}

/// A synthetic process and its mutable run-state.
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    burst: u64,
    io_operations: u64,
    io_remaining: u64,
    priority: Priority,
    consumed: u64,
    active: Arc<AtomicBool>,
    state: ProcessState,
    waiter: Waiter,
    stats: ProcessStats,
    history: Vec<i8>,
}

impl Process {
    pub fn new(pid: Pid, demand: Demand) -> Self {
        debug_assert!(demand.burst > 0, "burst must be positive");
        Self {
            pid,
            burst: demand.burst,
            io_operations: demand.io_operations,
            io_remaining: demand.io_operations,
            priority: Priority::Level(0),
            consumed: 0,
            active: Arc::new(AtomicBool::new(false)),
            state: ProcessState::Ready,
            waiter: Waiter::new(),
            stats: ProcessStats::default(),
            history: vec![0],
        }
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[inline]
    pub fn burst(&self) -> u64 {
        self.burst
    }

    #[inline]
    pub fn io_remaining(&self) -> u64 {
        self.io_remaining
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[inline]
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Ticks left in the current burst.
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.burst - self.consumed
    }

    #[inline]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    #[inline]
    pub fn stats(&self) -> ProcessStats {
        self.stats
    }

    pub(crate) fn queue_id(&self) -> QueueId {
        match self.priority {
            Priority::Level(level) => QueueId::Cpu(level),
            Priority::Io => QueueId::Io,
            Priority::Terminated => QueueId::Cpu(last_cpu_level(&self.history)),
        }
    }

    pub(crate) fn active_flag(&self) -> &Arc<AtomicBool> {
        &self.active
    }

    pub(crate) fn waiter(&self) -> &Waiter {
        &self.waiter
    }

    pub(crate) fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }

    /// Change priority. Once terminated, nothing changes it again.
    pub(crate) fn set_priority(&mut self, priority: Priority) {
        if self.priority == Priority::Terminated {
            debug_assert!(false, "priority change after termination (pid {})", self.pid);
            return;
        }
        if self.priority != priority {
            self.priority = priority;
            self.history.push(priority.code());
        }
    }

    pub(crate) fn on_dispatch(&mut self) {
        self.state = ProcessState::Running;
        self.stats.dispatches += 1;
    }

    pub(crate) fn deactivate(&mut self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn add_consumed(&mut self, ticks: u64) {
        self.consumed += ticks;
        self.stats.cpu_ticks += ticks;
        debug_assert!(self.consumed <= self.burst);
    }

    pub(crate) fn count_demotion(&mut self) {
        self.stats.demotions += 1;
    }

    pub(crate) fn count_interruption(&mut self) {
        self.stats.interruptions += 1;
    }

    pub(crate) fn complete_io(&mut self) {
        self.io_remaining -= 1;
        self.stats.io_services += 1;
    }

    /// Back from the device: fresh burst at the top level.
    fn return_from_io(&mut self) {
        self.consumed = 0;
        self.set_priority(Priority::Level(0));
        self.state = ProcessState::Ready;
    }

    /// Drive the process to termination.
    ///
    /// Each iteration requests the CPU, runs one slice, and hands the turn
    /// back. Quantum expiry goes through [`Scheduler::preempt`]; every other
    /// end of turn goes through [`Scheduler::release_cpu`].
    pub fn run(
        mut self,
        scheduler: &Scheduler,
        io: &IoDevice,
        pacing: Pacing,
    ) -> Result<ProcessSummary, RunError> {
        loop {
            let grant = scheduler.request_cpu(&mut self)?;
            let slice = grant.quantum.slice(self.remaining());
            let ran = pacing.run_slice(slice, &self.active);
            let turn = Turn { slice, ran };

            let transition = if turn.expired() && self.consumed + ran < self.burst {
                scheduler.preempt(&mut self, turn)?
            } else {
                scheduler.release_cpu(&mut self, turn)?
            };

            match transition {
                Transition::Requeue | Transition::Demoted { .. } => {}
                Transition::Io => {
                    io.perform(&mut self)?;
                    self.return_from_io();
                }
                Transition::Terminated => return Ok(self.summary()),
            }
        }
    }

    pub fn summary(&self) -> ProcessSummary {
        ProcessSummary {
            pid: self.pid,
            burst: self.burst,
            io_operations: self.io_operations,
            io_remaining: self.io_remaining,
            consumed: self.consumed,
            final_priority: self.priority.code(),
            state: self.state,
            priority_history: self.history.clone(),
            stats: self.stats,
        }
    }
}

/// Most recent CPU level in a priority history.
fn last_cpu_level(history: &[i8]) -> u8 {
    history
        .iter()
        .rev()
        .find_map(|&code| u8::try_from(code).ok().filter(|&level| level <= LAST_LEVEL))
        .unwrap_or(0)
}

/// Next level down after a quantum expiry, capped at the FCFS level.
#[inline]
pub fn demote(level: u8) -> u8 {
    level.saturating_add(1).min(LAST_LEVEL)
}
