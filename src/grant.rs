//! Ticket/grant rendezvous for the shared resources.
//!
//! Each actor owns one [`Waiter`]: a parker plus a grant cell. To request a
//! resource it arms a [`Ticket`] and hands it to the resource's queue under
//! the resource lock. The resource owner decides who goes next and grants
//! exactly that ticket; only the granted actor is woken.
//!
//! # Correctness Invariants
//!
//! - **No lost wakeups**: the grant cell is written before `unpark`, and the
//!   parker keeps a token for an unpark that lands before `park`.
//! - **Re-checked on wake**: `Waiter::wait` loops on the cell state, so a
//!   stale token from an earlier grant never lets an actor through.
//! - **Single outstanding ticket**: an actor is parked on at most one
//!   resource at a time, so one cell per actor is enough.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_utils::sync::{Parker, Unparker};

use crate::process::Pid;

const IDLE: u8 = 0;
const WAITING: u8 = 1;
const GRANTED: u8 = 2;
const ABORTED: u8 = 3;

/// How a parked request ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    Aborted,
}

#[derive(Debug)]
struct GrantCell {
    state: AtomicU8,
}

/// Waiting side of the rendezvous, owned by one actor.
#[derive(Debug)]
pub struct Waiter {
    parker: Parker,
    cell: Arc<GrantCell>,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Waiter {
    pub fn new() -> Self {
        Self {
            parker: Parker::new(),
            cell: Arc::new(GrantCell {
                state: AtomicU8::new(IDLE),
            }),
        }
    }

    /// Arm a fresh ticket for `pid` with no liveness flag attached.
    pub fn arm(&self, pid: Pid) -> Ticket {
        self.cell.state.store(WAITING, Ordering::Release);
        Ticket {
            pid,
            cell: Arc::clone(&self.cell),
            unparker: self.parker.unparker().clone(),
            active: None,
        }
    }

    /// Arm a ticket carrying the actor's liveness flag.
    ///
    /// The granter sets the flag when the ticket is granted; the resource may
    /// clear it later to interrupt the holder.
    pub fn arm_with_flag(&self, pid: Pid, active: &Arc<AtomicBool>) -> Ticket {
        let mut ticket = self.arm(pid);
        ticket.active = Some(Arc::clone(active));
        ticket
    }

    /// Park until the armed ticket is granted or aborted.
    pub fn wait(&self) -> GrantOutcome {
        loop {
            match self.cell.state.load(Ordering::Acquire) {
                GRANTED => {
                    self.cell.state.store(IDLE, Ordering::Relaxed);
                    return GrantOutcome::Granted;
                }
                ABORTED => return GrantOutcome::Aborted,
                _ => self.parker.park(),
            }
        }
    }
}

/// Queued request for a resource.
#[derive(Debug)]
pub struct Ticket {
    pid: Pid,
    cell: Arc<GrantCell>,
    unparker: Unparker,
    active: Option<Arc<AtomicBool>>,
}

impl Ticket {
    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Whether the owner is still parked on this ticket.
    #[inline]
    pub fn is_waiting(&self) -> bool {
        self.cell.state.load(Ordering::Acquire) == WAITING
    }

    /// Liveness flag shared with the owning actor, if one was attached.
    pub fn active_flag(&self) -> Option<Arc<AtomicBool>> {
        self.active.as_ref().map(Arc::clone)
    }

    /// Let the owner through. Marks it active first.
    pub fn grant(&self) {
        if let Some(active) = &self.active {
            active.store(true, Ordering::Release);
        }
        self.cell.state.store(GRANTED, Ordering::Release);
        self.unparker.unpark();
    }

    /// Release the owner with an abort outcome.
    pub fn abort(&self) {
        if let Some(active) = &self.active {
            active.store(false, Ordering::Release);
        }
        self.cell.state.store(ABORTED, Ordering::Release);
        self.unparker.unpark();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn grant_before_wait_is_not_lost() {
        let waiter = Waiter::new();
        let active = Arc::new(AtomicBool::new(false));
        let ticket = waiter.arm_with_flag(Pid::from_raw(1), &active);

        assert!(ticket.is_waiting());
        ticket.grant();
        assert!(!ticket.is_waiting());
        assert_eq!(waiter.wait(), GrantOutcome::Granted);
        assert!(active.load(Ordering::Acquire));
    }

    #[test]
    fn grant_from_other_thread_wakes_waiter() {
        let waiter = Waiter::new();
        let ticket = waiter.arm(Pid::from_raw(3));

        let granter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            ticket.grant();
        });

        assert_eq!(waiter.wait(), GrantOutcome::Granted);
        granter.join().unwrap();
    }

    #[test]
    fn abort_releases_waiter_and_clears_active() {
        let waiter = Waiter::new();
        let active = Arc::new(AtomicBool::new(true));
        let ticket = waiter.arm_with_flag(Pid::from_raw(0), &active);

        ticket.abort();
        assert_eq!(waiter.wait(), GrantOutcome::Aborted);
        assert!(!active.load(Ordering::Acquire));
    }

    #[test]
    fn plain_ticket_has_no_flag() {
        let waiter = Waiter::new();
        let ticket = waiter.arm(Pid::from_raw(9));
        assert!(ticket.active_flag().is_none());
        ticket.grant();
        assert_eq!(waiter.wait(), GrantOutcome::Granted);
    }

    #[test]
    fn stale_token_does_not_pass_rearmed_ticket() {
        let waiter = Waiter::new();

        let first = waiter.arm(Pid::from_raw(5));
        first.grant();
        // Leave an extra token in the parker.
        first.unparker.unpark();
        assert_eq!(waiter.wait(), GrantOutcome::Granted);

        let second = waiter.arm(Pid::from_raw(5));
        let granter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            assert!(second.is_waiting());
            second.grant();
        });
        assert_eq!(waiter.wait(), GrantOutcome::Granted);
        granter.join().unwrap();
    }
}
