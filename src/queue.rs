//! Per-level ready queues.
//!
//! The set of disciplines is closed: two Round-Robin levels with a finite
//! quantum and one FCFS level whose quantum is unbounded. Each level is a
//! plain FIFO of tickets; the discipline only decides how long a dispatched
//! process may run.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::grant::Ticket;
use crate::process::Pid;

/// Number of CPU priority levels.
pub const LEVELS: usize = 3;

/// Lowest-priority (FCFS) level.
pub const LAST_LEVEL: u8 = (LEVELS - 1) as u8;

/// Maximum ticks granted per dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantum {
    Ticks(u64),
    Unbounded,
}

impl Quantum {
    /// Length of the next slice for a process with `remaining` ticks left.
    #[inline]
    pub fn slice(&self, remaining: u64) -> u64 {
        match *self {
            Quantum::Ticks(q) => q.min(remaining),
            Quantum::Unbounded => remaining,
        }
    }
}

impl fmt::Display for Quantum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantum::Ticks(q) => write!(f, "{q}"),
            Quantum::Unbounded => f.write_str("inf"),
        }
    }
}

/// Queuing discipline of one level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Discipline {
    RoundRobin { quantum: u64 },
    Fcfs,
}

impl Discipline {
    #[inline]
    pub fn quantum(&self) -> Quantum {
        match *self {
            Discipline::RoundRobin { quantum } => Quantum::Ticks(quantum),
            Discipline::Fcfs => Quantum::Unbounded,
        }
    }

    /// Standard three-level layout: RR(q0), RR(q1), FCFS.
    pub fn mlfq(quantum_level0: u64, quantum_level1: u64) -> [Discipline; LEVELS] {
        [
            Discipline::RoundRobin {
                quantum: quantum_level0,
            },
            Discipline::RoundRobin {
                quantum: quantum_level1,
            },
            Discipline::Fcfs,
        ]
    }
}

/// FIFO of waiting tickets at one priority level.
#[derive(Debug)]
pub struct LevelQueue {
    discipline: Discipline,
    entries: VecDeque<Ticket>,
}

impl LevelQueue {
    pub fn new(discipline: Discipline) -> Self {
        Self {
            discipline,
            entries: VecDeque::new(),
        }
    }

    #[inline]
    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    #[inline]
    pub fn push_back(&mut self, ticket: Ticket) {
        self.entries.push_back(ticket);
    }

    #[inline]
    pub fn pop_front(&mut self) -> Option<Ticket> {
        self.entries.pop_front()
    }

    #[inline]
    pub fn peek_front(&self) -> Option<&Ticket> {
        self.entries.front()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.entries.iter().any(|t| t.pid() == pid)
    }

    /// Queued pids, front first.
    pub fn pids(&self) -> Vec<Pid> {
        self.entries.iter().map(Ticket::pid).collect()
    }

    /// Remove every ticket, front first.
    pub fn drain(&mut self) -> impl Iterator<Item = Ticket> + '_ {
        self.entries.drain(..)
    }
}
