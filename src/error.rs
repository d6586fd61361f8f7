//! Error types for configuration and run stages.
//!
//! Errors are stage-specific. A `ConfigError` is raised before any actor
//! starts and means nothing ran. An `InvariantViolation` is an internal
//! defect found mid-run; it aborts the whole run and is never retried.

use std::fmt;
use std::io;

use crate::process::Pid;

/// Malformed input or tuning values.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// A descriptor's burst is zero or negative.
    NonPositiveBurst { index: usize, value: i64 },
    /// A descriptor's I/O count is negative.
    NegativeIoOperations { index: usize, value: i64 },
    /// A Round-Robin level was given a zero or negative quantum.
    NonPositiveQuantum { level: u8, value: i64 },
    /// The I/O service duration is zero or negative.
    NonPositiveIoTicks { value: i64 },
    /// A process-list line could not be parsed.
    Parse { line: usize, detail: String },
    /// Reading the input failed.
    Io(io::Error),
    /// The JSON input was malformed.
    Json(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveBurst { index, value } => {
                write!(f, "process #{index}: burst must be positive, got {value}")
            }
            Self::NegativeIoOperations { index, value } => {
                write!(
                    f,
                    "process #{index}: io_operations must be non-negative, got {value}"
                )
            }
            Self::NonPositiveQuantum { level, value } => {
                write!(f, "level {level}: quantum must be positive, got {value}")
            }
            Self::NonPositiveIoTicks { value } => {
                write!(f, "io_service_ticks must be positive, got {value}")
            }
            Self::Parse { line, detail } => write!(f, "line {line}: {detail}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Json(err) => write!(f, "invalid JSON config: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

/// Queue a violation was observed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueId {
    Cpu(u8),
    Io,
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueId::Cpu(level) => write!(f, "cpu level {level}"),
            QueueId::Io => f.write_str("io queue"),
        }
    }
}

/// What went wrong internally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    /// The head of a queue was missing or no longer waiting at dispatch.
    StaleHead,
    /// CPU released by a process that does not hold it.
    NotHolder,
    /// I/O released by a process that is not in service.
    NotIoHolder,
    /// A request was made with a priority that does not allow it.
    UnexpectedPriority,
    /// `consumed` would exceed `burst`.
    ConsumedOverflow,
    /// I/O completed for a process that owed none.
    IoUnderflow,
    /// A turn report does not fit the granted slice.
    SliceMismatch,
    /// A process is neither queued, running, nor terminated.
    Orphaned,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StaleHead => "stale head-of-line",
            Self::NotHolder => "cpu released by non-holder",
            Self::NotIoHolder => "io released by process not in service",
            Self::UnexpectedPriority => "unexpected priority for request",
            Self::ConsumedOverflow => "consumed exceeds burst",
            Self::IoUnderflow => "io completed with none remaining",
            Self::SliceMismatch => "turn does not match granted slice",
            Self::Orphaned => "process outside every queue",
        }
    }
}

/// Internal defect detected during a run. Unrecoverable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvariantViolation {
    pub pid: Pid,
    pub queue: QueueId,
    pub kind: ViolationKind,
}

impl InvariantViolation {
    pub fn new(pid: Pid, queue: QueueId, kind: ViolationKind) -> Self {
        Self { pid, queue, kind }
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invariant violation: {} (pid {}, {})",
            self.kind.as_str(),
            self.pid,
            self.queue
        )
    }
}

impl std::error::Error for InvariantViolation {}

/// Failure of a simulation run.
#[derive(Debug)]
#[non_exhaustive]
pub enum RunError {
    Invariant(InvariantViolation),
    /// The run was aborted by another actor's failure.
    Aborted,
    ProcessPanicked { pid: Pid },
    Spawn(io::Error),
}

impl RunError {
    /// Secondary failures caused by an abort elsewhere.
    #[inline]
    pub fn is_aborted(&self) -> bool {
        matches!(self, RunError::Aborted)
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invariant(v) => write!(f, "{v}"),
            Self::Aborted => f.write_str("run aborted"),
            Self::ProcessPanicked { pid } => write!(f, "process {pid} panicked"),
            Self::Spawn(err) => write!(f, "failed to spawn process thread: {err}"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Invariant(v) => Some(v),
            Self::Spawn(err) => Some(err),
            _ => None,
        }
    }
}

impl From<InvariantViolation> for RunError {
    fn from(v: InvariantViolation) -> Self {
        Self::Invariant(v)
    }
}
