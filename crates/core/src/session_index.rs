// crates/core/src/session_index.rs
//! Parser for the optional `sessions-index.json` sidecar files.
//!
//! A project directory may carry a sidecar index listing its sessions with
//! metadata (summary, first prompt, message count, timestamps). The file is
//! written as either a JSON array of entries or a map keyed by session id;
//! both forms normalize to the same entry list here.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::SessionIndexError;

/// A single entry from a `sessions-index.json` file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIndexEntry {
    /// Absent in the map form, where the key carries the id.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub first_prompt: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub message_count: Option<usize>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
}

/// The two on-disk shapes of the sidecar.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IndexFile {
    List(Vec<SessionIndexEntry>),
    Map(BTreeMap<String, SessionIndexEntry>),
}

/// Parse a sidecar index file into a normalized entry list.
///
/// In the map form, each key becomes the entry's `session_id` unless the
/// entry already names one.
pub fn parse_session_index(path: &Path) -> Result<Vec<SessionIndexEntry>, SessionIndexError> {
    let contents = std::fs::read_to_string(path).map_err(|e| SessionIndexError::io(path, e))?;
    let parsed: IndexFile =
        serde_json::from_str(&contents).map_err(|e| SessionIndexError::MalformedJson {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(match parsed {
        IndexFile::List(entries) => entries,
        IndexFile::Map(map) => map
            .into_iter()
            .map(|(id, mut entry)| {
                entry.session_id.get_or_insert(id);
                entry
            })
            .collect(),
    })
}
