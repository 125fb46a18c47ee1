// crates/process-tree/src/census.rs
//! Process census: find agent processes and classify main vs. helper.
//!
//! Identification is configuration-driven — a list of name substrings with
//! executable-path substrings as fallback — so the heuristics can evolve
//! without touching the scan itself. A process whose parent is another
//! identified candidate is a helper; chains of helpers classify as helpers
//! at every level below the first non-candidate ancestor.

use crate::introspection::{ProcessIntrospection, SysinfoIntrospection};
use crate::sampler::ResourceSampler;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;
use tracing::trace;

/// Substring patterns identifying agent processes.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// A process whose name contains any of these is a candidate.
    pub name_patterns: Vec<String>,
    /// Fallback: a process whose executable path contains any of these.
    pub path_patterns: Vec<String>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            name_patterns: vec!["claude".into()],
            path_patterns: vec![".claude/local".into(), "claude-code".into()],
        }
    }
}

impl MatchConfig {
    fn matches_name(&self, name: &str) -> bool {
        self.name_patterns.iter().any(|p| name.contains(p.as_str()))
    }

    fn matches_path(&self, path: &std::path::Path) -> bool {
        let path = path.to_string_lossy();
        self.path_patterns.iter().any(|p| path.contains(p.as_str()))
    }
}

/// A running agent process. Recreated on every census pass.
#[derive(Debug, Clone, Serialize)]
pub struct AgentProcess {
    pub pid: u32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    pub is_helper: bool,
}

/// Scans the process table for agent processes.
///
/// `find` does synchronous syscalls through the introspection backend;
/// run it on a blocking thread.
pub struct ProcessCensus<I: ProcessIntrospection> {
    introspection: I,
    sampler: ResourceSampler,
    config: MatchConfig,
}

impl ProcessCensus<SysinfoIntrospection> {
    pub fn new() -> Self {
        Self::with_introspection(SysinfoIntrospection::new(), MatchConfig::default())
    }
}

impl Default for ProcessCensus<SysinfoIntrospection> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: ProcessIntrospection> ProcessCensus<I> {
    pub fn with_introspection(introspection: I, config: MatchConfig) -> Self {
        let cores = introspection.core_count();
        Self {
            introspection,
            sampler: ResourceSampler::new(cores),
            config,
        }
    }

    /// One census pass over all live PIDs.
    ///
    /// Helpers are included only when `include_helpers` is set. PIDs that
    /// cannot be resolved (permission error, exited mid-scan) are skipped.
    pub fn find(&mut self, include_helpers: bool) -> Vec<AgentProcess> {
        self.introspection.refresh();
        let now = Instant::now();

        let mut candidates: HashSet<u32> = HashSet::new();
        for pid in self.introspection.pids() {
            let Some(name) = self.introspection.name(pid) else {
                trace!("Skipping unresolvable pid {}", pid);
                continue;
            };
            let matched = self.config.matches_name(&name)
                || self
                    .introspection
                    .exe_path(pid)
                    .is_some_and(|p| self.config.matches_path(&p));
            if matched {
                candidates.insert(pid);
            }
        }

        let mut result = Vec::new();
        let mut pids: Vec<u32> = candidates.iter().copied().collect();
        pids.sort_unstable();

        for pid in pids {
            // The process may have exited between the scan and here.
            let Some(name) = self.introspection.name(pid) else {
                continue;
            };
            let parent_pid = self.introspection.parent(pid);
            let is_helper = parent_pid.is_some_and(|pp| candidates.contains(&pp));
            if is_helper && !include_helpers {
                continue;
            }

            // Working directory is only meaningful for top-level instances;
            // resolution soft-fails to unknown.
            let working_dir = if is_helper { None } else { self.introspection.cwd(pid) };

            let cpu_secs = self.introspection.cpu_time_secs(pid).unwrap_or(0.0);
            let memory_bytes = self.introspection.memory_bytes(pid).unwrap_or(0);
            let sample = self.sampler.observe(pid, cpu_secs, memory_bytes, now);

            result.push(AgentProcess {
                pid,
                name,
                working_dir,
                cpu_percent: sample.cpu_percent,
                memory_mb: sample.memory_mb,
                parent_pid,
                start_time: self.introspection.start_time_secs(pid),
                is_helper,
            });
        }

        self.sampler.cleanup(&candidates);
        result
    }
}
