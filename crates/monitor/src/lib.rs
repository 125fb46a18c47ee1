// crates/monitor/src/lib.rs
//! Read-only query surface over the ingestion core.
//!
//! The [`Monitor`] ties the session repository, project discovery, and the
//! process census together and runs the two periodic refreshers the
//! presentation layer relies on. The census and the session refresh tick
//! on independent timers so a slow multi-megabyte parse never stalls the
//! process list.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::warn;

use claude_pulse_core::{
    compute_stats, encode_project_path, list_project_directories, list_session_summaries,
    DiscoveryError, ParseError, ProjectDirectory, Session, SessionRepository, SessionStats,
    SessionSummary, SESSION_FILE_EXT,
};
use claude_pulse_process_tree::{
    AgentProcess, MatchConfig, ProcessCensus, ProcessIntrospection, SysinfoIntrospection,
};

/// Tunables for the monitor. Plain data, passed by value.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Root directory holding one encoded subdirectory per project.
    pub projects_root: PathBuf,
    /// Cadence of the process census pass.
    pub census_interval: Duration,
    /// Cadence of the project/session listing refresh (and cache prune).
    pub refresh_interval: Duration,
    /// Whether census snapshots include helper processes.
    pub include_helpers: bool,
    /// Process identification patterns.
    pub match_config: MatchConfig,
}

impl MonitorConfig {
    pub fn for_root(projects_root: impl Into<PathBuf>) -> Self {
        Self {
            projects_root: projects_root.into(),
            census_interval: Duration::from_secs(2),
            refresh_interval: Duration::from_secs(10),
            include_helpers: false,
            match_config: MatchConfig::default(),
        }
    }

    /// Config rooted at the default log directory (`~/.claude/projects`).
    pub fn from_home() -> Result<Self, DiscoveryError> {
        Ok(Self::for_root(claude_pulse_core::projects_root()?))
    }
}

/// Shared state behind the query surface.
///
/// Snapshots (`processes`, `projects`) are replaced wholesale on each
/// refresh pass; readers clone the current vector and are never blocked by
/// an in-flight pass.
pub struct Monitor<I: ProcessIntrospection + Send + 'static = SysinfoIntrospection> {
    config: MonitorConfig,
    repository: Arc<SessionRepository>,
    census: Arc<Mutex<ProcessCensus<I>>>,
    processes: Arc<RwLock<Vec<AgentProcess>>>,
    projects: Arc<RwLock<Vec<ProjectDirectory>>>,
}

impl Monitor<SysinfoIntrospection> {
    pub fn new(config: MonitorConfig) -> Arc<Self> {
        Self::with_census(config, ProcessCensus::new())
    }
}

impl<I: ProcessIntrospection + Send + 'static> Monitor<I> {
    pub fn with_census(config: MonitorConfig, census: ProcessCensus<I>) -> Arc<Self> {
        Arc::new(Self {
            config,
            repository: Arc::new(SessionRepository::new()),
            census: Arc::new(Mutex::new(census)),
            processes: Arc::new(RwLock::new(Vec::new())),
            projects: Arc::new(RwLock::new(Vec::new())),
        })
    }

    /// Start the census and refresh loops. The returned handles let the
    /// caller stop the loops; in-flight work is never cancelled mid-pass.
    pub fn spawn_pollers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let census_loop = {
            let monitor = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(monitor.config.census_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    monitor.refresh_processes().await;
                }
            })
        };

        let refresh_loop = {
            let monitor = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(monitor.config.refresh_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    monitor.refresh_projects().await;
                }
            })
        };

        vec![census_loop, refresh_loop]
    }

    /// One census pass: scan on a blocking thread, then replace the
    /// snapshot.
    pub async fn refresh_processes(&self) {
        let census = self.census.clone();
        let include_helpers = self.config.include_helpers;
        let pass = tokio::task::spawn_blocking(move || {
            census.lock().unwrap().find(include_helpers)
        })
        .await;

        match pass {
            Ok(found) => *self.processes.write().await = found,
            // Keep the previous snapshot; the next tick retries.
            Err(e) => warn!("Census pass failed: {}", e),
        }
    }

    /// One refresh pass: relist project directories and prune aged cache
    /// entries.
    pub async fn refresh_projects(&self) {
        match list_project_directories(&self.config.projects_root).await {
            Ok(found) => *self.projects.write().await = found,
            Err(e) => warn!("Project refresh failed: {}", e),
        }
        self.repository.prune().await;
    }

    // ------------------------------------------------------------------
    // Query surface
    // ------------------------------------------------------------------

    /// Latest census snapshot.
    pub async fn processes(&self) -> Vec<AgentProcess> {
        self.processes.read().await.clone()
    }

    /// Latest project directory snapshot.
    pub async fn projects(&self) -> Vec<ProjectDirectory> {
        self.projects.read().await.clone()
    }

    /// Session summaries for a project, by its original filesystem path.
    pub async fn sessions(
        &self,
        project_path: &str,
    ) -> Result<Vec<SessionSummary>, DiscoveryError> {
        let dir = self.config.projects_root.join(encode_project_path(project_path));
        list_session_summaries(&dir).await
    }

    /// Session summaries for a project, by its encoded directory name.
    pub async fn sessions_in_dir(
        &self,
        encoded_name: &str,
    ) -> Result<Vec<SessionSummary>, DiscoveryError> {
        list_session_summaries(&self.config.projects_root.join(encoded_name)).await
    }

    /// Load a full session by file path, through the cache.
    pub async fn load_session(&self, path: &Path) -> Result<Arc<Session>, ParseError> {
        self.repository.load(path).await
    }

    /// Load a session by id within a project. `Ok(None)` when no such
    /// session file exists.
    pub async fn session_by_id(
        &self,
        project_path: &str,
        session_id: &str,
    ) -> Result<Option<Arc<Session>>, ParseError> {
        let path = self
            .config
            .projects_root
            .join(encode_project_path(project_path))
            .join(format!("{session_id}.{SESSION_FILE_EXT}"));
        match self.repository.load(&path).await {
            Ok(session) => Ok(Some(session)),
            Err(ParseError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Derived cost/usage statistics for a loaded session.
    pub fn stats(&self, session: &Session) -> SessionStats {
        compute_stats(session)
    }

    /// The underlying repository, for callers that manage caching directly.
    pub fn repository(&self) -> &Arc<SessionRepository> {
        &self.repository
    }
}
