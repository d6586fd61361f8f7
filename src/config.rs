//! Run configuration: process descriptors and scheduler tuning.
//!
//! Raw values are signed so that malformed input is reported as a
//! `ConfigError` instead of wrapping. `RunConfig::validate` turns them into
//! `Settings`, which is what the simulation is built from; nothing starts
//! until validation has succeeded.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Pacing;
use crate::error::ConfigError;
use crate::queue::{Discipline, LEVELS};

pub const DEFAULT_QUANTUM_LEVEL0: i64 = 10;
pub const DEFAULT_QUANTUM_LEVEL1: i64 = 15;
pub const DEFAULT_IO_SERVICE_TICKS: i64 = 20;
pub const DEFAULT_TRACE_CAPACITY: usize = 1 << 16;

/// Demand of one synthetic process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// CPU ticks per burst.
    pub burst: i64,
    /// I/O operations owed over the whole run.
    pub io_operations: i64,
}

impl ProcessSpec {
    pub const fn new(burst: i64, io_operations: i64) -> Self {
        Self {
            burst,
            io_operations,
        }
    }
}

/// Scheduler and device tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub quantum_level0: i64,
    pub quantum_level1: i64,
    /// Ticks one I/O request holds the device.
    pub io_service_ticks: i64,
    /// Wall time per simulated tick; 0 runs without real-time coupling.
    pub tick_micros: u64,
    /// Trace events retained in the report.
    pub trace_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quantum_level0: DEFAULT_QUANTUM_LEVEL0,
            quantum_level1: DEFAULT_QUANTUM_LEVEL1,
            io_service_ticks: DEFAULT_IO_SERVICE_TICKS,
            tick_micros: 0,
            trace_capacity: DEFAULT_TRACE_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    pub fn with_quanta(mut self, quantum_level0: i64, quantum_level1: i64) -> Self {
        self.quantum_level0 = quantum_level0;
        self.quantum_level1 = quantum_level1;
        self
    }

    pub fn with_io_service_ticks(mut self, ticks: i64) -> Self {
        self.io_service_ticks = ticks;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick_micros = u64::try_from(tick.as_micros()).unwrap_or(u64::MAX);
        self
    }
}

/// Everything a run needs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub processes: Vec<ProcessSpec>,
}

/// Validated descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Demand {
    pub burst: u64,
    pub io_operations: u64,
}

/// Validated run settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub levels: [Discipline; LEVELS],
    pub io_service_ticks: u64,
    pub pacing: Pacing,
    pub trace_capacity: usize,
    pub demands: Vec<Demand>,
}

impl RunConfig {
    pub fn new(scheduler: SchedulerConfig, processes: Vec<ProcessSpec>) -> Self {
        Self {
            scheduler,
            processes,
        }
    }

    /// Check every field, scheduler first, then processes in order.
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let s = &self.scheduler;
        let q0 = positive(s.quantum_level0)
            .ok_or(ConfigError::NonPositiveQuantum {
                level: 0,
                value: s.quantum_level0,
            })?;
        let q1 = positive(s.quantum_level1)
            .ok_or(ConfigError::NonPositiveQuantum {
                level: 1,
                value: s.quantum_level1,
            })?;
        let io_service_ticks = positive(s.io_service_ticks).ok_or(
            ConfigError::NonPositiveIoTicks {
                value: s.io_service_ticks,
            },
        )?;

        let demands = self
            .processes
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                let burst = positive(spec.burst).ok_or(ConfigError::NonPositiveBurst {
                    index,
                    value: spec.burst,
                })?;
                let io_operations = u64::try_from(spec.io_operations).map_err(|_| {
                    ConfigError::NegativeIoOperations {
                        index,
                        value: spec.io_operations,
                    }
                })?;
                Ok(Demand {
                    burst,
                    io_operations,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Settings {
            levels: Discipline::mlfq(q0, q1),
            io_service_ticks,
            pacing: Pacing::from_micros(s.tick_micros),
            trace_capacity: s.trace_capacity,
            demands,
        })
    }
}

#[inline]
fn positive(v: i64) -> Option<u64> {
    if v > 0 {
        Some(v as u64)
    } else {
        None
    }
}
