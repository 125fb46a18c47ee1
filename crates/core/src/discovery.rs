// crates/core/src/discovery.rs
//! Project discovery over the log root directory.
//!
//! The log root (`~/.claude/projects` by default) holds one subdirectory
//! per project, named by a reversible transform of the project's filesystem
//! path: every path separator becomes `-`, with the leading separator as
//! the leading `-`. Inside each directory, every session is one append-only
//! `{sessionId}.jsonl` file plus an optional `sessions-index.json` sidecar.

use crate::error::DiscoveryError;
use crate::session_index::{parse_session_index, SessionIndexEntry};
use crate::types::{ProjectDirectory, SessionSummary};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// File extension of session log files.
pub const SESSION_FILE_EXT: &str = "jsonl";

/// Sidecar index file name inside a project directory.
pub const SESSION_INDEX_FILE: &str = "sessions-index.json";

/// Marker character substituted for path separators in directory names.
const PATH_MARKER: char = '-';

/// Returns the default log root (`~/.claude/projects`).
pub fn projects_root() -> Result<PathBuf, DiscoveryError> {
    let home = dirs::home_dir().ok_or(DiscoveryError::HomeDirNotFound)?;
    Ok(home.join(".claude").join("projects"))
}

/// Strip a trailing separator so `encode`/`decode` round-trip cleanly.
pub fn normalize_project_path(path: &str) -> String {
    if path.len() > 1 {
        path.trim_end_matches('/').to_string()
    } else {
        path.to_string()
    }
}

/// Encode a project path into its directory name:
/// `/home/user/proj` → `-home-user-proj`.
///
/// The transform is ambiguous when the original path itself contains the
/// marker character; see the known-limitation test below.
pub fn encode_project_path(path: &str) -> String {
    normalize_project_path(path).replace('/', &PATH_MARKER.to_string())
}

/// Decode a project directory name back into a filesystem path:
/// `-home-user-proj` → `/home/user/proj`.
pub fn decode_project_dir(encoded: &str) -> PathBuf {
    PathBuf::from(encoded.replace(PATH_MARKER, "/"))
}

/// List every project directory under `root`.
///
/// A missing root is an empty result, not an error. Entries that cannot be
/// read are skipped with a warning.
pub async fn list_project_directories(
    root: &Path,
) -> Result<Vec<ProjectDirectory>, DiscoveryError> {
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Projects root does not exist: {}", root.display());
            return Ok(vec![]);
        }
        Err(e) => return Err(DiscoveryError::io(root, e)),
    };

    let mut projects = Vec::new();

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DiscoveryError::io(root, e))?
    {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let encoded_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => {
                warn!("Skipping directory with non-UTF-8 name: {}", path.display());
                continue;
            }
        };

        let (session_count, last_activity) = match scan_session_files(&path).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Skipping unreadable project dir {}: {}", path.display(), e);
                continue;
            }
        };

        projects.push(ProjectDirectory {
            original_path: decode_project_dir(&encoded_name),
            encoded_name,
            session_count,
            last_activity,
        });
    }

    // Most recently active first.
    projects.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    Ok(projects)
}

/// Count session files and find the newest modification time.
async fn scan_session_files(
    project_dir: &Path,
) -> Result<(usize, Option<DateTime<Utc>>), std::io::Error> {
    let mut entries = fs::read_dir(project_dir).await?;
    let mut count = 0;
    let mut last_activity: Option<DateTime<Utc>> = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SESSION_FILE_EXT) {
            continue;
        }
        count += 1;
        if let Ok(meta) = entry.metadata().await {
            if let Ok(mtime) = meta.modified() {
                let mtime = DateTime::<Utc>::from(mtime);
                last_activity = Some(last_activity.map_or(mtime, |t| t.max(mtime)));
            }
        }
    }

    Ok((count, last_activity))
}

/// List session summaries for one project directory, enriched from the
/// sidecar index when one is present and well-formed.
pub async fn list_session_summaries(
    project_dir: &Path,
) -> Result<Vec<SessionSummary>, DiscoveryError> {
    let mut entries = match fs::read_dir(project_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(DiscoveryError::io(project_dir, e)),
    };

    let index = load_sidecar_index(project_dir);

    let mut summaries = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DiscoveryError::io(project_dir, e))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SESSION_FILE_EXT) {
            continue;
        }
        let id = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => continue,
        };

        let meta = entry.metadata().await.ok();
        let modified_at = meta
            .as_ref()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);
        let size_bytes = meta.map(|m| m.len()).unwrap_or(0);

        let indexed = index.get(&id);
        summaries.push(SessionSummary {
            file_path: path,
            modified_at,
            size_bytes,
            summary: indexed.and_then(|e| e.summary.clone()),
            first_prompt: indexed.and_then(|e| e.first_prompt.clone()),
            message_count: indexed.and_then(|e| e.message_count),
            id,
        });
    }

    summaries.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
    Ok(summaries)
}

/// List session summaries for a project given its original filesystem path.
pub async fn list_sessions_for_project_path(
    root: &Path,
    project_path: &str,
) -> Result<Vec<SessionSummary>, DiscoveryError> {
    let dir = root.join(encode_project_path(project_path));
    list_session_summaries(&dir).await
}

/// Locate a session file by id across all project directories under `root`.
pub async fn find_session_file(root: &Path, session_id: &str) -> Option<PathBuf> {
    let file_name = format!("{session_id}.{SESSION_FILE_EXT}");
    let mut entries = fs::read_dir(root).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let candidate = entry.path().join(&file_name);
        if fs::try_exists(&candidate).await.unwrap_or(false) {
            return Some(candidate);
        }
    }
    None
}

/// Read the sidecar index into an id-keyed map. A missing sidecar is
/// normal; a malformed one degrades to the bare file listing.
fn load_sidecar_index(project_dir: &Path) -> HashMap<String, SessionIndexEntry> {
    let index_path = project_dir.join(SESSION_INDEX_FILE);
    if !index_path.exists() {
        return HashMap::new();
    }
    match parse_session_index(&index_path) {
        Ok(entries) => entries
            .into_iter()
            .filter_map(|e| e.session_id.clone().map(|id| (id, e)))
            .collect(),
        Err(e) => {
            warn!("Ignoring malformed {}: {}", index_path.display(), e);
            HashMap::new()
        }
    }
}
