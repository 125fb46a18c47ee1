// crates/process-tree/src/sampler.rs
//! Instantaneous CPU utilization from cumulative kernel counters.
//!
//! The platform only exposes total CPU seconds since process start, so a
//! rate needs two observations: percent = Δcpu / Δwall × 100. The sampler
//! keeps the previous observation per PID; the first sample for a PID is
//! reported as 0% because no rate can be known from a single reading.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Instant;

/// One sampling result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Copy)]
struct Reading {
    at: Instant,
    cpu_secs: f64,
}

/// Per-PID reading table. All access is serialized through one mutex;
/// entries are small and sampling is far from any hot path.
pub struct ResourceSampler {
    readings: Mutex<HashMap<u32, Reading>>,
    core_count: usize,
}

impl ResourceSampler {
    pub fn new(core_count: usize) -> Self {
        Self {
            readings: Mutex::new(HashMap::new()),
            core_count: core_count.max(1),
        }
    }

    /// Record an observation for `pid` and derive the CPU percentage since
    /// the previous one.
    ///
    /// Clamped to `[0, 100 × core_count]`. A wall-clock or counter
    /// regression yields 0 rather than a negative rate.
    pub fn observe(
        &self,
        pid: u32,
        cpu_secs: f64,
        memory_bytes: u64,
        at: Instant,
    ) -> ResourceSample {
        let mut readings = self.readings.lock().unwrap();

        let cpu_percent = match readings.get(&pid) {
            None => 0.0,
            Some(prev) => {
                // Instant::duration_since saturates to zero on regression.
                let wall = at.duration_since(prev.at).as_secs_f64();
                let delta = cpu_secs - prev.cpu_secs;
                if wall > 0.0 && delta > 0.0 {
                    (delta / wall * 100.0).min(100.0 * self.core_count as f64)
                } else {
                    0.0
                }
            }
        };

        readings.insert(pid, Reading { at, cpu_secs });

        ResourceSample {
            cpu_percent,
            memory_mb: memory_bytes as f64 / (1024.0 * 1024.0),
        }
    }

    /// Drop stored readings for PIDs no longer present.
    pub fn cleanup(&self, valid_pids: &HashSet<u32>) {
        self.readings
            .lock()
            .unwrap()
            .retain(|pid, _| valid_pids.contains(pid));
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.readings.lock().unwrap().len()
    }
}
