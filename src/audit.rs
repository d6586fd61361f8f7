//! Trace oracle for finished runs.
//!
//! `audit` replays a [`RunReport`] event by event and checks the observable
//! guarantees of the scheduler and the device:
//!
//! - per process, CPU and I/O spans alternate start/end and never overlap;
//! - globally, at most one CPU span and one I/O span are open at a time;
//! - the clock column never goes backwards;
//! - a CPU span never runs past the slice its level allows, and an I/O span
//!   lasts exactly the service duration;
//! - each process gets exactly `io_operations` I/O spans, one after each
//!   completed burst but the last, and ends on `CPU_END`;
//! - each priority history starts at 0, demotes one level at a time (capped
//!   at 2), shows the I/O code between bursts, resets to 0 after I/O, and
//!   ends with a single -1;
//! - replaying the span lengths through the MLFQ rules reproduces the
//!   reported priority history.
//!
//! Only complete traces can be audited; a report whose ring evicted events
//! fails immediately.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ProcessSpec;
use crate::process::{demote, Pid, ProcessState};
use crate::queue::{Quantum, LAST_LEVEL, LEVELS};
use crate::simulation::RunReport;
use crate::trace::{EventKind, TraceEvent};

const IO_CODE: i8 = 3;
const TERMINATED_CODE: i8 = -1;

/// Failure classification for the trace oracle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditFailureKind {
    IncompleteTrace,
    ProcessCountMismatch,
    DescriptorMismatch,
    UnknownPid,
    /// A start event for a process that already holds a resource.
    StartWhileHolding,
    /// An end event that does not close the process's open span.
    EndWithoutStart,
    CpuOverlap,
    IoOverlap,
    /// A CPU span longer than its slice, or an I/O span other than the
    /// service duration.
    SpanLength,
    ClockRegressed,
    IoCountMismatch,
    CpuTicksMismatch,
    LastEventNotCpuEnd,
    NotTerminated,
    PriorityHistory,
}

/// First property the oracle found broken.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFailure {
    pub pid: Option<Pid>,
    pub kind: AuditFailureKind,
    /// Trace position (or history position for `PriorityHistory`).
    pub index: Option<usize>,
    pub message: String,
}

impl AuditFailure {
    fn new(kind: AuditFailureKind, pid: Option<Pid>, index: Option<usize>, msg: String) -> Self {
        Self {
            pid,
            kind,
            index,
            message: msg,
        }
    }
}

impl fmt::Display for AuditFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "audit failed ({:?}", self.kind)?;
        if let Some(pid) = self.pid {
            write!(f, ", pid {pid}")?;
        }
        if let Some(index) = self.index {
            write!(f, ", at {index}")?;
        }
        write!(f, "): {}", self.message)
    }
}

impl std::error::Error for AuditFailure {}

/// Aggregates from a passing audit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub processes: usize,
    pub events: usize,
    pub cpu_spans: u64,
    pub io_spans: u64,
    pub final_clock: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Holding {
    Nothing,
    Cpu,
    Io,
}

/// Per-process replay state.
#[derive(Clone, Debug)]
struct Track {
    holding: Holding,
    opened_at: u64,
    burst: u64,
    io_operations: u64,
    io_spans: u64,
    level: u8,
    consumed: u64,
    /// Priority history implied by the span lengths.
    history: Vec<i8>,
    last: Option<EventKind>,
}

impl Track {
    fn new(spec: &ProcessSpec) -> Self {
        Self {
            holding: Holding::Nothing,
            opened_at: 0,
            burst: spec.burst.max(0) as u64,
            io_operations: spec.io_operations.max(0) as u64,
            io_spans: 0,
            level: 0,
            consumed: 0,
            history: vec![0],
            last: None,
        }
    }

    fn awaiting_io(&self) -> bool {
        self.history.last() == Some(&IO_CODE)
    }

    /// Apply the MLFQ release rules to a closed CPU span of `ran` ticks.
    fn close_cpu(&mut self, ran: u64, slice: u64) {
        self.consumed += ran;
        if self.consumed == self.burst {
            let code = if self.io_spans < self.io_operations {
                IO_CODE
            } else {
                TERMINATED_CODE
            };
            self.history.push(code);
        } else if ran == slice {
            self.level = demote(self.level);
            self.history.push(self.level as i8);
        }
    }

    fn close_io(&mut self) {
        self.io_spans += 1;
        self.consumed = 0;
        self.level = 0;
        self.history.push(0);
    }
}

/// Check every property over a finished run.
///
/// `specs` are the descriptors the run was built from, in pid order.
pub fn audit(report: &RunReport, specs: &[ProcessSpec]) -> Result<AuditSummary, AuditFailure> {
    if !report.is_complete_trace() {
        return Err(AuditFailure::new(
            AuditFailureKind::IncompleteTrace,
            None,
            None,
            format!("{} events evicted from the trace ring", report.events_evicted),
        ));
    }
    if report.processes.len() != specs.len() {
        return Err(AuditFailure::new(
            AuditFailureKind::ProcessCountMismatch,
            None,
            None,
            format!(
                "{} summaries for {} descriptors",
                report.processes.len(),
                specs.len()
            ),
        ));
    }

    let mut tracks: Vec<Track> = specs.iter().map(Track::new).collect();
    let mut summary = check_events(report, &mut tracks)?;
    summary.processes = specs.len();
    summary.final_clock = report.final_clock;

    for (idx, spec) in specs.iter().enumerate() {
        let pid = Pid::from_raw(idx as u32);
        let track = &tracks[idx];
        let Some(s) = report.summary(pid) else {
            return Err(AuditFailure::new(
                AuditFailureKind::UnknownPid,
                Some(pid),
                None,
                "no summary for descriptor".into(),
            ));
        };
        if s.burst as i64 != spec.burst || s.io_operations as i64 != spec.io_operations {
            return Err(AuditFailure::new(
                AuditFailureKind::DescriptorMismatch,
                Some(pid),
                None,
                format!(
                    "summary ({}, {}) vs descriptor ({}, {})",
                    s.burst, s.io_operations, spec.burst, spec.io_operations
                ),
            ));
        }
        if s.state != ProcessState::Terminated
            || s.final_priority != TERMINATED_CODE
            || s.io_remaining != 0
        {
            return Err(AuditFailure::new(
                AuditFailureKind::NotTerminated,
                Some(pid),
                None,
                format!(
                    "state {:?}, priority {}, io_remaining {}",
                    s.state, s.final_priority, s.io_remaining
                ),
            ));
        }
        if track.io_spans != s.io_operations || s.stats.io_services != s.io_operations {
            return Err(AuditFailure::new(
                AuditFailureKind::IoCountMismatch,
                Some(pid),
                None,
                format!(
                    "expected {} I/O spans, trace has {}, counter has {}",
                    s.io_operations, track.io_spans, s.stats.io_services
                ),
            ));
        }
        let expected_ticks = s.burst.saturating_mul(s.io_operations + 1);
        if s.stats.cpu_ticks != expected_ticks {
            return Err(AuditFailure::new(
                AuditFailureKind::CpuTicksMismatch,
                Some(pid),
                None,
                format!("ran {} ticks, owed {expected_ticks}", s.stats.cpu_ticks),
            ));
        }
        if track.last != Some(EventKind::CpuEnd) || track.holding != Holding::Nothing {
            return Err(AuditFailure::new(
                AuditFailureKind::LastEventNotCpuEnd,
                Some(pid),
                None,
                format!("last event {:?}", track.last),
            ));
        }
        check_history(pid, &s.priority_history, s.io_operations)?;
        if track.history != s.priority_history {
            return Err(AuditFailure::new(
                AuditFailureKind::PriorityHistory,
                Some(pid),
                None,
                format!(
                    "trace implies {:?}, summary reports {:?}",
                    track.history, s.priority_history
                ),
            ));
        }
    }

    Ok(summary)
}

fn check_events(report: &RunReport, tracks: &mut [Track]) -> Result<AuditSummary, AuditFailure> {
    let events: &[TraceEvent] = &report.events;
    let quanta: &[Quantum; LEVELS] = &report.quanta;
    let mut summary = AuditSummary {
        events: events.len(),
        ..AuditSummary::default()
    };
    let mut cpu_open: Option<Pid> = None;
    let mut io_open: Option<Pid> = None;
    let mut last_clock = 0u64;

    for (i, ev) in events.iter().enumerate() {
        let pid = ev.pid;
        let fail = |kind, msg: String| AuditFailure::new(kind, Some(pid), Some(i), msg);

        if ev.clock < last_clock {
            return Err(fail(
                AuditFailureKind::ClockRegressed,
                format!("clock {} after {last_clock}", ev.clock),
            ));
        }
        last_clock = ev.clock;

        let Some(track) = tracks.get_mut(pid.index()) else {
            return Err(fail(AuditFailureKind::UnknownPid, format!("{ev}")));
        };

        match ev.kind {
            EventKind::CpuStart => {
                if track.holding != Holding::Nothing {
                    return Err(fail(
                        AuditFailureKind::StartWhileHolding,
                        format!("{ev} while holding {:?}", track.holding),
                    ));
                }
                if let Some(other) = cpu_open {
                    return Err(fail(
                        AuditFailureKind::CpuOverlap,
                        format!("{ev} while pid {other} holds the CPU"),
                    ));
                }
                if track.awaiting_io() {
                    return Err(fail(
                        AuditFailureKind::IoCountMismatch,
                        format!("{ev} before the owed I/O was served"),
                    ));
                }
                track.holding = Holding::Cpu;
                track.opened_at = ev.clock;
                cpu_open = Some(pid);
                summary.cpu_spans += 1;
            }
            EventKind::CpuEnd => {
                if track.holding != Holding::Cpu || cpu_open != Some(pid) {
                    return Err(fail(AuditFailureKind::EndWithoutStart, format!("{ev}")));
                }
                let ran = ev.clock - track.opened_at;
                let slice = quanta[track.level as usize]
                    .slice(track.burst.saturating_sub(track.consumed));
                if ran > slice {
                    return Err(fail(
                        AuditFailureKind::SpanLength,
                        format!(
                            "cpu span of {ran} ticks at level {} exceeds slice {slice}",
                            track.level
                        ),
                    ));
                }
                track.close_cpu(ran, slice);
                track.holding = Holding::Nothing;
                cpu_open = None;
            }
            EventKind::IoStart => {
                if track.holding != Holding::Nothing {
                    return Err(fail(
                        AuditFailureKind::StartWhileHolding,
                        format!("{ev} while holding {:?}", track.holding),
                    ));
                }
                if let Some(other) = io_open {
                    return Err(fail(
                        AuditFailureKind::IoOverlap,
                        format!("{ev} while pid {other} holds the device"),
                    ));
                }
                if !track.awaiting_io() {
                    return Err(fail(
                        AuditFailureKind::IoCountMismatch,
                        format!("{ev} with no I/O owed"),
                    ));
                }
                track.holding = Holding::Io;
                track.opened_at = ev.clock;
                io_open = Some(pid);
            }
            EventKind::IoEnd => {
                if track.holding != Holding::Io || io_open != Some(pid) {
                    return Err(fail(AuditFailureKind::EndWithoutStart, format!("{ev}")));
                }
                let held = ev.clock - track.opened_at;
                if held != report.io_service_ticks {
                    return Err(fail(
                        AuditFailureKind::SpanLength,
                        format!(
                            "io span of {held} ticks, service is {}",
                            report.io_service_ticks
                        ),
                    ));
                }
                track.close_io();
                track.holding = Holding::Nothing;
                io_open = None;
                summary.io_spans += 1;
            }
        }
        track.last = Some(ev.kind);
    }

    Ok(summary)
}

/// Validate one priority history against the MLFQ transition rules.
pub fn check_history(pid: Pid, history: &[i8], io_operations: u64) -> Result<(), AuditFailure> {
    let fail = |index: usize, msg: String| {
        AuditFailure::new(
            AuditFailureKind::PriorityHistory,
            Some(pid),
            Some(index),
            msg,
        )
    };

    match history.first() {
        Some(0) => {}
        other => return Err(fail(0, format!("history starts at {other:?}, not 0"))),
    }
    match history.last() {
        Some(&TERMINATED_CODE) => {}
        other => return Err(fail(history.len(), format!("history ends at {other:?}, not -1"))),
    }

    let mut io_visits = 0u64;
    for (i, pair) in history.windows(2).enumerate() {
        let (from, to) = (pair[0], pair[1]);
        let cpu_level = (0..=LAST_LEVEL as i8).contains(&from);
        let ok = match to {
            TERMINATED_CODE => cpu_level && i + 2 == history.len(),
            IO_CODE => cpu_level,
            0 => from == IO_CODE,
            level => cpu_level && level == from + 1 && level <= LAST_LEVEL as i8,
        };
        if !ok {
            return Err(fail(i + 1, format!("illegal step {from} -> {to}")));
        }
        if to == IO_CODE {
            io_visits += 1;
        }
    }

    if io_visits != io_operations {
        return Err(fail(
            history.len(),
            format!("{io_visits} I/O visits, expected {io_operations}"),
        ));
    }
    Ok(())
}
