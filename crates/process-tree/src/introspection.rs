// crates/process-tree/src/introspection.rs
//! Platform process introspection behind a trait.
//!
//! The census and sampler only ever talk to [`ProcessIntrospection`], so
//! tests can substitute a synthetic process table and the sysinfo-backed
//! implementation stays a thin adapter over the platform syscalls.

use std::path::PathBuf;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Read access to the host's process table.
///
/// Every per-PID accessor returns `None` for PIDs that cannot be resolved
/// (permission errors, processes that exited mid-scan) — callers skip such
/// PIDs rather than failing the scan.
pub trait ProcessIntrospection {
    /// Refresh the snapshot this trait reads from.
    fn refresh(&mut self);

    /// All live PIDs in the current snapshot.
    fn pids(&self) -> Vec<u32>;

    fn name(&self, pid: u32) -> Option<String>;

    fn exe_path(&self, pid: u32) -> Option<PathBuf>;

    fn cwd(&self, pid: u32) -> Option<PathBuf>;

    fn parent(&self, pid: u32) -> Option<u32>;

    /// Cumulative CPU time (user + system) since process start, in seconds.
    fn cpu_time_secs(&self, pid: u32) -> Option<f64>;

    /// Resident set size in bytes.
    fn memory_bytes(&self, pid: u32) -> Option<u64>;

    /// Unix timestamp of process start.
    fn start_time_secs(&self, pid: u32) -> Option<u64>;

    /// Number of logical cores, used to bound CPU percentages.
    fn core_count(&self) -> usize;
}

/// sysinfo-backed implementation.
///
/// Refreshing does synchronous syscalls for the whole process table; call
/// it from a blocking context (`tokio::task::spawn_blocking`), never from
/// an async task directly.
pub struct SysinfoIntrospection {
    system: System,
}

impl SysinfoIntrospection {
    pub fn new() -> Self {
        Self { system: System::new() }
    }

    fn process(&self, pid: u32) -> Option<&sysinfo::Process> {
        self.system.process(Pid::from_u32(pid))
    }
}

impl Default for SysinfoIntrospection {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessIntrospection for SysinfoIntrospection {
    fn refresh(&mut self) {
        // everything() so names, exe paths, cwd, and CPU counters are all
        // populated in one pass; `true` drops processes that exited.
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );
    }

    fn pids(&self) -> Vec<u32> {
        self.system.processes().keys().map(|pid| pid.as_u32()).collect()
    }

    fn name(&self, pid: u32) -> Option<String> {
        self.process(pid).map(|p| p.name().to_string_lossy().to_string())
    }

    fn exe_path(&self, pid: u32) -> Option<PathBuf> {
        self.process(pid).and_then(|p| p.exe()).map(|p| p.to_path_buf())
    }

    fn cwd(&self, pid: u32) -> Option<PathBuf> {
        self.process(pid).and_then(|p| p.cwd()).map(|p| p.to_path_buf())
    }

    fn parent(&self, pid: u32) -> Option<u32> {
        self.process(pid).and_then(|p| p.parent()).map(|p| p.as_u32())
    }

    fn cpu_time_secs(&self, pid: u32) -> Option<f64> {
        // accumulated_cpu_time() reports milliseconds.
        self.process(pid).map(|p| p.accumulated_cpu_time() as f64 / 1_000.0)
    }

    fn memory_bytes(&self, pid: u32) -> Option<u64> {
        self.process(pid).map(|p| p.memory())
    }

    fn start_time_secs(&self, pid: u32) -> Option<u64> {
        self.process(pid).map(|p| p.start_time())
    }

    fn core_count(&self) -> usize {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }
}
