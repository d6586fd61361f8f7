//! Trace events, bounded retention, and the shared timeline.
//!
//! Every event carries the clock value at which it happened. A span is
//! stamped when it closes: the releasing actor, still inside the resource's
//! critical section, stamps the start at the current clock, advances the
//! clock by the ticks it held, and stamps the end. Both events go out under
//! the timeline lock, so nothing recorded by the other resource can land
//! inside the span. A CPU span is exactly the ticks consumed and an I/O span
//! is exactly the service duration, and the clock column stays
//! non-decreasing in emission order.
//!
//! Lock order is always resource lock first, timeline second.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::clock::SimClock;
use crate::process::Pid;

/// Kind of resource transition recorded in the trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    CpuStart,
    CpuEnd,
    IoStart,
    IoEnd,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CpuStart => "CPU_START",
            EventKind::CpuEnd => "CPU_END",
            EventKind::IoStart => "IO_START",
            EventKind::IoEnd => "IO_END",
        }
    }

    #[inline]
    pub fn is_start(&self) -> bool {
        matches!(self, EventKind::CpuStart | EventKind::IoStart)
    }

    #[inline]
    pub fn is_cpu(&self) -> bool {
        matches!(self, EventKind::CpuStart | EventKind::CpuEnd)
    }
}

/// Resource a span was held on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Resource {
    Cpu,
    Io,
}

impl Resource {
    #[inline]
    pub fn start_kind(self) -> EventKind {
        match self {
            Resource::Cpu => EventKind::CpuStart,
            Resource::Io => EventKind::IoStart,
        }
    }

    #[inline]
    pub fn end_kind(self) -> EventKind {
        match self {
            Resource::Cpu => EventKind::CpuEnd,
            Resource::Io => EventKind::IoEnd,
        }
    }
}

/// One trace record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub kind: EventKind,
    pub pid: Pid,
    pub clock: u64,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pid={} clock={}",
            self.kind.as_str(),
            self.pid,
            self.clock
        )
    }
}

/// Consumer of trace events as they are emitted.
///
/// Called with the timeline lock held, so implementations must not block for
/// long and must never call back into the scheduler or the I/O device.
pub trait TraceSink: Send {
    fn record(&mut self, event: TraceEvent);
}

impl TraceSink for Vec<TraceEvent> {
    fn record(&mut self, event: TraceEvent) {
        self.push(event);
    }
}

impl TraceSink for crossbeam_channel::Sender<TraceEvent> {
    fn record(&mut self, event: TraceEvent) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.send(event);
    }
}

/// Fixed-capacity ring buffer of trace events.
///
/// When the ring is full the oldest event is evicted and counted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceRing {
    cap: usize,
    buf: VecDeque<TraceEvent>,
    evicted: u64,
}

impl TraceRing {
    /// Create a trace ring with at least one slot.
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            buf: VecDeque::with_capacity(cap.min(4096)),
            evicted: 0,
        }
    }

    /// Maximum number of events retained.
    #[inline(always)]
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Current number of retained events.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Events dropped from the front since creation.
    #[inline(always)]
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Push a new event, evicting the oldest if at capacity.
    #[inline(always)]
    pub fn push(&mut self, ev: TraceEvent) {
        if self.buf.len() == self.cap {
            self.buf.pop_front();
            self.evicted += 1;
        }
        self.buf.push_back(ev);
    }

    /// Snapshot the ring contents in chronological order.
    pub fn dump(&self) -> Vec<TraceEvent> {
        self.buf.iter().copied().collect()
    }
}

impl TraceSink for TraceRing {
    fn record(&mut self, event: TraceEvent) {
        self.push(event);
    }
}

struct TimelineInner {
    clock: SimClock,
    ring: TraceRing,
    forward: Option<Box<dyn TraceSink>>,
}

impl TimelineInner {
    fn emit(&mut self, event: TraceEvent) {
        self.ring.push(event);
        if let Some(forward) = self.forward.as_mut() {
            forward.record(event);
        }
    }
}

/// Clock plus trace, advanced and stamped atomically.
pub struct Timeline {
    inner: Mutex<TimelineInner>,
}

impl Timeline {
    pub fn new(trace_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(TimelineInner {
                clock: SimClock::new(),
                ring: TraceRing::new(trace_capacity),
                forward: None,
            }),
        }
    }

    /// Forward every subsequent event to `sink` as well as the ring.
    pub fn set_forward(&self, sink: Box<dyn TraceSink>) {
        self.lock().forward = Some(sink);
    }

    fn lock(&self) -> MutexGuard<'_, TimelineInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            // The trace stays structurally valid across a panicking actor.
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current clock value.
    pub fn now(&self) -> u64 {
        self.lock().clock.now_ticks()
    }

    /// Stamp one closed span of `held` ticks on `resource`.
    ///
    /// Returns the start and end clock values.
    pub fn record_span(&self, resource: Resource, pid: Pid, held: u64) -> (u64, u64) {
        let mut inner = self.lock();
        let start = inner.clock.now_ticks();
        inner.emit(TraceEvent {
            kind: resource.start_kind(),
            pid,
            clock: start,
        });
        let end = inner.clock.advance_by(held);
        inner.emit(TraceEvent {
            kind: resource.end_kind(),
            pid,
            clock: end,
        });
        (start, end)
    }

    /// Retained events and the number evicted so far.
    pub fn events(&self) -> (Vec<TraceEvent>, u64) {
        let inner = self.lock();
        (inner.ring.dump(), inner.ring.evicted())
    }

    /// Drop the forwarding sink, closing channels held by it.
    pub fn close_forward(&self) {
        self.lock().forward = None;
    }
}

impl fmt::Debug for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Timeline")
            .field("clock", &inner.clock)
            .field("retained", &inner.ring.len())
            .field("evicted", &inner.ring.evicted())
            .field("forwarding", &inner.forward.is_some())
            .finish()
    }
}
