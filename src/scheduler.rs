//! MLFQ CPU arbitration.
//!
//! # Architecture
//!
//! ```text
//!   request_cpu ──► queues[level].push_back(ticket)
//!                         │
//!                         ▼
//!   ┌────────────────────────────────────────────┐
//!   │ level 0  RR(q0)   [t] [t] [t]               │   head-of-ready =
//!   │ level 1  RR(q1)   [t]                       │   front of first
//!   │ level 2  FCFS     [t] [t]                   │   non-empty level
//!   └────────────────────────────────────────────┘
//!                         │ dispatch (CPU idle only)
//!                         ▼
//!                 holder ── release_cpu / preempt ──► dispatch next
//! ```
//!
//! # Correctness Invariants
//!
//! - **Single holder**: `holder` is set only by `dispatch` when it is `None`
//!   and cleared only by the holder's own release.
//! - **Atomic hand-off**: release and the next grant decision happen in the
//!   same critical section; no third process can slip in between.
//! - **FIFO within a level, strict across levels**: dispatch always takes the
//!   front of the lowest-numbered non-empty level. A level-2 process waits as
//!   long as anything is ready at levels 0 or 1; that starvation is the
//!   intended MLFQ behaviour.
//! - **Head recomputed before any wait**: every path that mutates the queues
//!   recomputes head-of-ready before the lock is dropped.
//! - **Interruption needs real ticks**: a higher-level arrival clears the
//!   holder's active flag only under tick pacing. With instant pacing a
//!   slice is one indivisible step, so the holder always finishes it.
//!
//! A ticket leaves its queue when it is granted. The holder is tracked
//! separately, so a process is in at most one queue and never in a queue
//! while it runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::clock::Pacing;
use crate::error::{InvariantViolation, QueueId, RunError, ViolationKind};
use crate::grant::GrantOutcome;
use crate::process::{demote, Pid, Priority, Process, ProcessState, Transition, Turn};
use crate::queue::{Discipline, LevelQueue, Quantum, LEVELS};
use crate::trace::{Resource, Timeline};

/// What a successful `request_cpu` hands back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuGrant {
    pub level: u8,
    pub quantum: Quantum,
}

#[derive(Debug)]
struct Holder {
    pid: Pid,
    level: u8,
    active: Arc<AtomicBool>,
}

#[derive(Debug)]
struct CpuState {
    queues: [LevelQueue; LEVELS],
    holder: Option<Holder>,
    head: Option<Pid>,
    aborted: bool,
}

impl CpuState {
    fn first_ready_level(&self) -> Option<usize> {
        self.queues.iter().position(|q| !q.is_empty())
    }

    fn recompute_head(&mut self) {
        self.head = self
            .first_ready_level()
            .and_then(|level| self.queues[level].peek_front())
            .map(|t| t.pid());
    }
}

/// Point-in-time view of the scheduler.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    /// Current holder and the level it was dispatched from.
    pub holder: Option<(Pid, u8)>,
    pub head: Option<Pid>,
    /// Queued pids per level, front first.
    pub queued: [Vec<Pid>; LEVELS],
}

impl SchedulerSnapshot {
    pub fn is_idle(&self) -> bool {
        self.holder.is_none()
    }

    pub fn total_queued(&self) -> usize {
        self.queued.iter().map(Vec::len).sum()
    }
}

/// CPU arbiter over three priority levels.
#[derive(Debug)]
pub struct Scheduler {
    levels: [Discipline; LEVELS],
    pacing: Pacing,
    state: Mutex<CpuState>,
    timeline: Arc<Timeline>,
}

impl Scheduler {
    pub fn new(levels: [Discipline; LEVELS], pacing: Pacing, timeline: Arc<Timeline>) -> Self {
        Self {
            levels,
            pacing,
            state: Mutex::new(CpuState {
                queues: levels.map(LevelQueue::new),
                holder: None,
                head: None,
                aborted: false,
            }),
            timeline,
        }
    }

    /// Quantum of `level`.
    #[inline]
    pub fn quantum(&self, level: u8) -> Quantum {
        self.levels[level as usize].quantum()
    }

    #[inline]
    pub fn levels(&self) -> &[Discipline; LEVELS] {
        &self.levels
    }

    /// Lock state with poison recovery.
    ///
    /// A panicking actor never leaves the queues half-edited: every mutation
    /// is a single push, pop, or field store.
    fn lock(&self) -> MutexGuard<'_, CpuState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queue `p` at its current level and block until it holds the CPU.
    ///
    /// Under tick pacing, if `p` enters a level strictly above the running
    /// holder's level, the holder's active flag is cleared so it yields at
    /// its next tick.
    pub fn request_cpu(&self, p: &mut Process) -> Result<CpuGrant, RunError> {
        let pid = p.pid();
        let level = match p.priority() {
            Priority::Level(level) => level,
            Priority::Io => {
                return Err(violation(pid, QueueId::Io, ViolationKind::UnexpectedPriority).into())
            }
            Priority::Terminated => {
                return Err(violation(pid, p.queue_id(), ViolationKind::UnexpectedPriority).into())
            }
        };

        let ticket = p.waiter().arm_with_flag(pid, p.active_flag());
        {
            let mut st = self.lock();
            if st.aborted {
                return Err(RunError::Aborted);
            }
            st.queues[level as usize].push_back(ticket);
            p.set_state(ProcessState::Ready);
            log::trace!("cpu enqueue pid={pid} level={level}");

            if let Some(holder) = st.holder.as_ref().filter(|_| !self.pacing.is_instant()) {
                if level < holder.level && holder.active.swap(false, Ordering::AcqRel) {
                    log::debug!(
                        "pid={pid} at level {level} interrupts holder pid={} at level {}",
                        holder.pid,
                        holder.level
                    );
                }
            }

            self.dispatch(&mut st)?;
        }

        match p.waiter().wait() {
            GrantOutcome::Granted => {}
            GrantOutcome::Aborted => return Err(RunError::Aborted),
        }
        p.on_dispatch();

        Ok(CpuGrant {
            level,
            quantum: self.quantum(level),
        })
    }

    /// Voluntary end of turn: burst complete or interrupted.
    pub fn release_cpu(&self, p: &mut Process, turn: Turn) -> Result<Transition, RunError> {
        let mut st = self.lock();
        self.finish_turn(&mut st, p, turn)
    }

    /// Involuntary end of turn: the slice timer ran out with the burst
    /// incomplete. The process is demoted and must re-win arbitration from
    /// the back of its new level.
    pub fn preempt(&self, p: &mut Process, turn: Turn) -> Result<Transition, RunError> {
        let mut st = self.lock();
        if !turn.expired() || p.consumed() + turn.ran >= p.burst() {
            return Err(violation(p.pid(), p.queue_id(), ViolationKind::SliceMismatch).into());
        }
        self.finish_turn(&mut st, p, turn)
    }

    fn finish_turn(
        &self,
        st: &mut CpuState,
        p: &mut Process,
        turn: Turn,
    ) -> Result<Transition, RunError> {
        if st.aborted {
            return Err(RunError::Aborted);
        }
        let pid = p.pid();
        let level = match &st.holder {
            Some(holder) if holder.pid == pid => holder.level,
            _ => {
                return Err(violation(pid, p.queue_id(), ViolationKind::NotHolder).into());
            }
        };
        if p.priority() != Priority::Level(level) {
            return Err(
                violation(pid, QueueId::Cpu(level), ViolationKind::UnexpectedPriority).into(),
            );
        }
        if turn.ran > turn.slice {
            return Err(violation(pid, QueueId::Cpu(level), ViolationKind::SliceMismatch).into());
        }
        if p.consumed() + turn.ran > p.burst() {
            return Err(
                violation(pid, QueueId::Cpu(level), ViolationKind::ConsumedOverflow).into(),
            );
        }

        p.deactivate();
        p.add_consumed(turn.ran);
        let (start, end) = self.timeline.record_span(Resource::Cpu, pid, turn.ran);

        let transition = if p.consumed() == p.burst() {
            if p.io_remaining() > 0 {
                p.set_priority(Priority::Io);
                p.set_state(ProcessState::IoWait);
                Transition::Io
            } else {
                p.set_priority(Priority::Terminated);
                p.set_state(ProcessState::Terminated);
                Transition::Terminated
            }
        } else if turn.expired() {
            let to = demote(level);
            p.set_priority(Priority::Level(to));
            p.set_state(ProcessState::Ready);
            p.count_demotion();
            Transition::Demoted { from: level, to }
        } else {
            p.set_state(ProcessState::Ready);
            p.count_interruption();
            Transition::Requeue
        };
        log::debug!(
            "cpu release pid={pid} span={start}..{end} ran={} consumed={}/{} -> {:?}",
            turn.ran,
            p.consumed(),
            p.burst(),
            transition
        );

        st.holder = None;
        self.dispatch(st)?;
        Ok(transition)
    }

    /// Grant the CPU to head-of-ready if the CPU is idle.
    fn dispatch(&self, st: &mut CpuState) -> Result<(), InvariantViolation> {
        st.recompute_head();
        if st.holder.is_some() {
            return Ok(());
        }
        let Some(level) = st.first_ready_level() else {
            return Ok(());
        };
        let head = st.head;

        let ticket = match st.queues[level].pop_front() {
            Some(ticket) => ticket,
            None => {
                let pid = head.unwrap_or_default();
                return Err(violation(pid, QueueId::Cpu(level as u8), ViolationKind::StaleHead));
            }
        };
        let pid = ticket.pid();
        let active = match ticket.active_flag() {
            Some(active) if head == Some(pid) && ticket.is_waiting() => active,
            _ => {
                ticket.abort();
                return Err(violation(pid, QueueId::Cpu(level as u8), ViolationKind::StaleHead));
            }
        };

        st.holder = Some(Holder {
            pid,
            level: level as u8,
            active,
        });
        ticket.grant();
        st.recompute_head();
        log::debug!("cpu grant pid={pid} level={level}");
        Ok(())
    }

    /// Release every waiter with an abort and stop the running holder.
    pub fn abort(&self) {
        let mut st = self.lock();
        st.aborted = true;
        if let Some(holder) = &st.holder {
            holder.active.store(false, Ordering::Release);
        }
        for queue in st.queues.iter_mut() {
            for ticket in queue.drain() {
                ticket.abort();
            }
        }
        st.head = None;
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let st = self.lock();
        SchedulerSnapshot {
            holder: st.holder.as_ref().map(|h| (h.pid, h.level)),
            head: st.head,
            queued: [st.queues[0].pids(), st.queues[1].pids(), st.queues[2].pids()],
        }
    }
}

fn violation(pid: Pid, queue: QueueId, kind: ViolationKind) -> InvariantViolation {
    let v = InvariantViolation::new(pid, queue, kind);
    log::error!("{v}");
    v
}
