//! Single-server FIFO I/O device.
//!
//! Service order is arrival order. CPU priority plays no part: the device
//! only sees processes whose priority is already the I/O code.
//!
//! The device holds its own lock, separate from the scheduler's. A process
//! never holds both: it releases the CPU before it requests I/O, and it
//! releases I/O before it requests the CPU again.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::clock::Pacing;
use crate::error::{InvariantViolation, QueueId, RunError, ViolationKind};
use crate::grant::{GrantOutcome, Ticket};
use crate::process::{Pid, Priority, Process, ProcessState};
use crate::trace::{Resource, Timeline};

#[derive(Debug)]
struct IoState {
    fifo: VecDeque<Ticket>,
    in_service: Option<Pid>,
    aborted: bool,
}

/// Point-in-time view of the device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IoSnapshot {
    pub in_service: Option<Pid>,
    /// Waiting pids, front first.
    pub queued: Vec<Pid>,
}

impl IoSnapshot {
    pub fn is_busy(&self) -> bool {
        self.in_service.is_some()
    }
}

#[derive(Debug)]
pub struct IoDevice {
    service_ticks: u64,
    pacing: Pacing,
    state: Mutex<IoState>,
    timeline: Arc<Timeline>,
}

impl IoDevice {
    pub fn new(service_ticks: u64, pacing: Pacing, timeline: Arc<Timeline>) -> Self {
        Self {
            service_ticks,
            pacing,
            state: Mutex::new(IoState {
                fifo: VecDeque::new(),
                in_service: None,
                aborted: false,
            }),
            timeline,
        }
    }

    /// Ticks one request occupies the device.
    #[inline]
    pub fn service_ticks(&self) -> u64 {
        self.service_ticks
    }

    fn lock(&self) -> MutexGuard<'_, IoState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// One full I/O operation: wait for the device, hold it, release it.
    pub fn perform(&self, p: &mut Process) -> Result<(), RunError> {
        self.request_io(p)?;
        self.pacing.hold(self.service_ticks);
        self.release_io(p)
    }

    /// Join the FIFO tail and block until the device is ours.
    pub fn request_io(&self, p: &mut Process) -> Result<(), RunError> {
        let pid = p.pid();
        if p.priority() != Priority::Io {
            return Err(violation(pid, ViolationKind::UnexpectedPriority).into());
        }
        if p.io_remaining() == 0 {
            return Err(violation(pid, ViolationKind::IoUnderflow).into());
        }

        let ticket = p.waiter().arm(pid);
        {
            let mut st = self.lock();
            if st.aborted {
                return Err(RunError::Aborted);
            }
            st.fifo.push_back(ticket);
            p.set_state(ProcessState::IoWait);
            log::trace!("io enqueue pid={pid} depth={}", st.fifo.len());
            self.dispatch(&mut st)?;
        }

        match p.waiter().wait() {
            GrantOutcome::Granted => {}
            GrantOutcome::Aborted => return Err(RunError::Aborted),
        }
        p.set_state(ProcessState::IoRunning);
        Ok(())
    }

    /// Finish service: stamp the span, charge the clock, settle the debt,
    /// hand the device on.
    pub fn release_io(&self, p: &mut Process) -> Result<(), RunError> {
        let pid = p.pid();
        let mut st = self.lock();
        if st.aborted {
            return Err(RunError::Aborted);
        }
        if st.in_service != Some(pid) {
            return Err(violation(pid, ViolationKind::NotIoHolder).into());
        }
        if p.io_remaining() == 0 {
            return Err(violation(pid, ViolationKind::IoUnderflow).into());
        }

        p.complete_io();
        let (start, end) = self
            .timeline
            .record_span(Resource::Io, pid, self.service_ticks);
        log::debug!(
            "io release pid={pid} span={start}..{end} io_remaining={}",
            p.io_remaining()
        );

        st.in_service = None;
        self.dispatch(&mut st)?;
        Ok(())
    }

    fn dispatch(&self, st: &mut IoState) -> Result<(), InvariantViolation> {
        if st.in_service.is_some() {
            return Ok(());
        }
        let Some(ticket) = st.fifo.pop_front() else {
            return Ok(());
        };
        let pid = ticket.pid();
        if !ticket.is_waiting() {
            ticket.abort();
            return Err(violation(pid, ViolationKind::StaleHead));
        }
        st.in_service = Some(pid);
        ticket.grant();
        log::debug!("io grant pid={pid}");
        Ok(())
    }

    /// Release every queued waiter with an abort.
    pub fn abort(&self) {
        let mut st = self.lock();
        st.aborted = true;
        for ticket in st.fifo.drain(..) {
            ticket.abort();
        }
    }

    pub fn snapshot(&self) -> IoSnapshot {
        let st = self.lock();
        IoSnapshot {
            in_service: st.in_service,
            queued: st.fifo.iter().map(Ticket::pid).collect(),
        }
    }
}

fn violation(pid: Pid, kind: ViolationKind) -> InvariantViolation {
    let v = InvariantViolation::new(pid, QueueId::Io, kind);
    log::error!("{v}");
    v
}
