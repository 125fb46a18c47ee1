// crates/core/src/parser.rs
//! Streaming parser for append-only session log files.
//!
//! Each line of a log file is one JSON record. Input is untrusted: lines may
//! be partial, non-JSON, or carry record kinds we don't care about. The
//! parser is total — it never fails on malformed content, it only drops the
//! offending line.

use crate::discovery::decode_project_dir;
use crate::error::ParseError;
use crate::types::*;
use chrono::{DateTime, NaiveDateTime, Utc};
use memchr::memmem;
use regex_lite::Regex;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Record kinds retained by the parser. Everything else (progress, result,
/// summary markers, ...) is skipped silently.
const KIND_USER: &str = "user";
const KIND_HUMAN: &str = "human";
const KIND_ASSISTANT: &str = "assistant";
const KIND_SYSTEM: &str = "system";

/// Pre-compiled substring finders used to skip uninteresting lines without
/// a JSON decode. Built once per parse and shared across all lines.
struct RecordFinders {
    type_user: memmem::Finder<'static>,
    type_human: memmem::Finder<'static>,
    type_assistant: memmem::Finder<'static>,
    type_system: memmem::Finder<'static>,
    type_key: memmem::Finder<'static>,
}

impl RecordFinders {
    fn new() -> Self {
        Self {
            type_user: memmem::Finder::new(br#""type":"user""#),
            type_human: memmem::Finder::new(br#""type":"human""#),
            type_assistant: memmem::Finder::new(br#""type":"assistant""#),
            type_system: memmem::Finder::new(br#""type":"system""#),
            type_key: memmem::Finder::new(br#""type""#),
        }
    }

    /// Whether this line could be a retained record. Compact-form matches
    /// are definitive enough to proceed; a line with a `"type"` key but no
    /// compact match still gets decoded (non-compact JSON), while a line
    /// with no `"type"` at all is dropped without decoding.
    fn wants(&self, line: &[u8]) -> bool {
        self.type_user.find(line).is_some()
            || self.type_assistant.find(line).is_some()
            || self.type_system.find(line).is_some()
            || self.type_human.find(line).is_some()
            || self.type_key.find(line).is_some()
    }
}

/// Regexes for cleaning command tags out of user prompts.
struct CommandTagCleaner {
    name: Regex,
    args: Regex,
    message: Regex,
}

impl CommandTagCleaner {
    fn new() -> Self {
        Self {
            name: Regex::new(r"(?s)<command-name>.*?</command-name>\s*").unwrap(),
            args: Regex::new(r"(?s)<command-args>(.*?)</command-args>").unwrap(),
            message: Regex::new(r"(?s)<command-message>.*?</command-message>\s*").unwrap(),
        }
    }

    /// Extract `<command-args>` content when present (the actual user input
    /// for slash commands), otherwise strip the name/message tags.
    fn clean(&self, content: &str) -> String {
        if let Some(caps) = self.args.captures(content) {
            if let Some(args_content) = caps.get(1) {
                let extracted = args_content.as_str().trim();
                if !extracted.is_empty() {
                    return extracted.to_string();
                }
            }
        }
        let cleaned = self.name.replace_all(content, "");
        let cleaned = self.message.replace_all(&cleaned, "");
        cleaned.trim().to_string()
    }
}

/// Parse raw log bytes into an ordered message sequence.
///
/// Total function: malformed lines, unknown record kinds, and records
/// without a nested message payload are dropped, never fatal. Message ids
/// are deduplicated within one parse by appending the line index to a
/// repeated id; missing ids are synthesized from the line index so two
/// parses of the same file agree.
pub fn parse_records(bytes: &[u8]) -> Vec<Message> {
    let finders = RecordFinders::new();
    let cleaner = CommandTagCleaner::new();

    let mut messages: Vec<Message> = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();

    for (line_index, raw_line) in bytes.split(|&b| b == b'\n').enumerate() {
        let line = trim_ascii(raw_line);
        if line.is_empty() {
            continue;
        }

        // Structural pre-filter: no "type" key, no decode.
        if !finders.wants(line) {
            continue;
        }

        let value: serde_json::Value = match serde_json::from_slice(line) {
            Ok(v) => v,
            Err(e) => {
                debug!("Skipping malformed record at line {}: {}", line_index, e);
                continue;
            }
        };

        let kind = match value.get("type").and_then(|t| t.as_str()) {
            Some(k) => k,
            None => continue,
        };

        let role = match kind {
            KIND_USER | KIND_HUMAN => Role::User,
            KIND_ASSISTANT => Role::Assistant,
            KIND_SYSTEM => Role::System,
            _ => continue,
        };

        let msg_value = match value.get("message") {
            Some(m) if m.is_object() => m,
            _ => continue,
        };

        let mut id = msg_value
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("msg-{line_index}"));
        if !seen_ids.insert(id.clone()) {
            id = format!("{id}-{line_index}");
            seen_ids.insert(id.clone());
        }

        let content = parse_content(msg_value.get("content"), role, &cleaner);
        let usage = parse_usage(msg_value.get("usage"));
        let timestamp = value
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(parse_timestamp);

        let mut message = Message::new(id, role).with_content(content).with_usage(usage);
        if let Some(ts) = timestamp {
            message = message.with_timestamp(ts);
        }
        if let Some(model) = msg_value.get("model").and_then(|v| v.as_str()) {
            message = message.with_model(model);
        }
        if let Some(stop) = msg_value.get("stop_reason").and_then(|v| v.as_str()) {
            message = message.with_stop_reason(stop);
        }
        messages.push(message);
    }

    messages
}

/// Parse a session log file into a [`Session`].
///
/// The byte parsing runs on a blocking worker thread so interactive callers
/// are not stalled by multi-megabyte logs. I/O errors propagate; per-record
/// problems do not.
pub async fn parse_session_file(file_path: &Path) -> Result<Session, ParseError> {
    let bytes = tokio::fs::read(file_path)
        .await
        .map_err(|e| ParseError::io(file_path, e))?;

    let last_modified = tokio::fs::metadata(file_path)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
        .map(DateTime::<Utc>::from);

    let messages = tokio::task::spawn_blocking(move || parse_records(&bytes))
        .await
        .map_err(|e| ParseError::Io {
            path: file_path.to_path_buf(),
            source: std::io::Error::other(e),
        })?;

    let id = file_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    // The parent directory name encodes the project path when the file
    // lives under a projects root.
    let project_path = file_path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy())
        .filter(|n| n.starts_with('-'))
        .map(|n| decode_project_dir(&n));

    Ok(Session::new(id, file_path, project_path, last_modified, messages))
}

fn trim_ascii(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|b| !b.is_ascii_whitespace());
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace());
    match (start, end) {
        (Some(s), Some(e)) => &line[s..=e],
        _ => &[],
    }
}

/// Best-effort timestamp parse: fractional-seconds format first, plain
/// format second, `None` when both fail.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    const WITH_FRACTION: &str = "%Y-%m-%dT%H:%M:%S%.fZ";
    const WITHOUT_FRACTION: &str = "%Y-%m-%dT%H:%M:%SZ";
    NaiveDateTime::parse_from_str(s, WITH_FRACTION)
        .or_else(|_| NaiveDateTime::parse_from_str(s, WITHOUT_FRACTION))
        .ok()
        .map(|dt| dt.and_utc())
}

fn parse_usage(value: Option<&serde_json::Value>) -> TokenUsage {
    let Some(usage) = value else {
        return TokenUsage::default();
    };
    let counter = |key: &str| usage.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
    TokenUsage {
        input_tokens: counter("input_tokens"),
        output_tokens: counter("output_tokens"),
        cache_read_tokens: counter("cache_read_input_tokens"),
        cache_creation_tokens: counter("cache_creation_input_tokens"),
    }
}

fn parse_content(
    value: Option<&serde_json::Value>,
    role: Role,
    cleaner: &CommandTagCleaner,
) -> Vec<ContentBlock> {
    match value {
        Some(serde_json::Value::String(s)) => {
            let text = if role == Role::User { cleaner.clean(s) } else { s.clone() };
            if text.is_empty() {
                return Vec::new();
            }
            vec![ContentBlock::Text { text: truncate_content(&text) }]
        }
        Some(serde_json::Value::Array(blocks)) => {
            blocks.iter().filter_map(parse_block).collect()
        }
        _ => Vec::new(),
    }
}

fn parse_block(block: &serde_json::Value) -> Option<ContentBlock> {
    let kind = block.get("type").and_then(|t| t.as_str())?;
    match kind {
        "text" => {
            let text = block.get("text").and_then(|t| t.as_str())?;
            Some(ContentBlock::Text { text: truncate_content(text) })
        }
        "tool_use" => {
            let id = block.get("id").and_then(|v| v.as_str()).unwrap_or_default();
            let name = block.get("name").and_then(|v| v.as_str()).unwrap_or_default();
            let input = block
                .get("input")
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();
            Some(ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input: truncate_content(&input),
            })
        }
        "tool_result" => {
            let tool_use_id = block
                .get("tool_use_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let content = extract_tool_result_text(block.get("content"));
            let is_error = block
                .get("is_error")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            Some(ContentBlock::ToolResult {
                tool_use_id: tool_use_id.to_string(),
                content: truncate_content(&content),
                is_error,
            })
        }
        "thinking" => {
            let thinking = block.get("thinking").and_then(|t| t.as_str())?;
            Some(ContentBlock::Thinking { thinking: truncate_content(thinking) })
        }
        "image" => {
            let source = block.get("source")?;
            let media_type = source
                .get("media_type")
                .and_then(|v| v.as_str())
                .unwrap_or("application/octet-stream");
            let data = source.get("data").and_then(|v| v.as_str()).unwrap_or_default();
            Some(ContentBlock::Image {
                media_type: media_type.to_string(),
                data: data.to_string(),
            })
        }
        // Unknown block kinds are ignored for forward compatibility.
        _ => None,
    }
}

/// Tool result content is either a plain string or an array of text blocks.
fn extract_tool_result_text(content: Option<&serde_json::Value>) -> String {
    match content {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                if item.get("type").and_then(|t| t.as_str()) == Some("text") {
                    item.get("text").and_then(|t| t.as_str())
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_str(input: &str) -> Vec<Message> {
        parse_records(input.as_bytes())
    }

    // ========================================================================
    // Record filtering
    // ========================================================================

    #[test]
    fn test_two_line_scenario_user_then_progress() {
        let input = concat!(
            r#"{"type":"user","message":{"id":"1","role":"user","content":"Hello"}}"#,
            "\n",
            r#"{"type":"progress","content":"..."}"#,
        );
        let messages = parse_str(input);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].text(), "Hello");
    }

    #[test]
    fn test_malformed_lines_dropped() {
        let input = concat!(
            r#"{"type":"user","message":{"id":"1","content":"first"}}"#,
            "\n",
            "not json at all\n",
            "{\"type\":\"assistant\",\"message\":\n",
            r#"{"type":"assistant","message":{"id":"2","content":"second"}}"#,
            "\n",
        );
        let messages = parse_str(input);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text(), "first");
        assert_eq!(messages[1].text(), "second");
    }

    #[test]
    fn test_uninteresting_kinds_skipped() {
        let input = concat!(
            r#"{"type":"summary","summary":"did things"}"#,
            "\n",
            r#"{"type":"result","message":{"id":"r","content":"x"}}"#,
            "\n",
            r#"{"type":"file-history-snapshot","snapshot":{}}"#,
            "\n",
        );
        assert!(parse_str(input).is_empty());
    }

    #[test]
    fn test_human_maps_to_user() {
        let input = r#"{"type":"human","message":{"id":"h1","content":"hi"}}"#;
        let messages = parse_str(input);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn test_system_kind_retained() {
        let input = r#"{"type":"system","message":{"id":"s1","content":"ctx"}}"#;
        let messages = parse_str(input);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::System);
    }

    #[test]
    fn test_missing_message_payload_skipped() {
        let input = concat!(
            r#"{"type":"user"}"#,
            "\n",
            r#"{"type":"user","message":"not-an-object"}"#,
            "\n",
        );
        assert!(parse_str(input).is_empty());
    }

    #[test]
    fn test_non_compact_json_still_parsed() {
        let input = r#"{ "type": "user", "message": { "id": "x", "content": "spaced" } }"#;
        let messages = parse_str(input);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "spaced");
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_records(b"").is_empty());
        assert!(parse_records(b"\n\n  \n").is_empty());
    }

    #[test]
    fn test_order_preserved() {
        let input = (0..20)
            .map(|i| format!(r#"{{"type":"user","message":{{"id":"m{i}","content":"n{i}"}}}}"#))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = parse_str(&input);
        assert_eq!(messages.len(), 20);
        for (i, m) in messages.iter().enumerate() {
            assert_eq!(m.text(), format!("n{i}"));
        }
    }

    // ========================================================================
    // Ids
    // ========================================================================

    #[test]
    fn test_missing_id_synthesized_from_line_index() {
        let input = concat!(
            r#"{"type":"user","message":{"content":"a"}}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":"b"}}"#,
        );
        let messages = parse_str(input);
        assert_eq!(messages[0].id, "msg-0");
        assert_eq!(messages[1].id, "msg-1");

        // Deterministic across reparses.
        let again = parse_str(input);
        assert_eq!(again[0].id, "msg-0");
        assert_eq!(again[1].id, "msg-1");
    }

    #[test]
    fn test_duplicate_id_suffixed_with_line_index() {
        let input = concat!(
            r#"{"type":"assistant","message":{"id":"dup","content":"one"}}"#,
            "\n",
            r#"{"type":"assistant","message":{"id":"dup","content":"two"}}"#,
        );
        let messages = parse_str(input);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "dup");
        assert_eq!(messages[1].id, "dup-1");
        assert_eq!(messages[1].text(), "two");
    }

    // ========================================================================
    // Content blocks
    // ========================================================================

    #[test]
    fn test_string_content_single_text_block() {
        let input = r#"{"type":"user","message":{"id":"1","content":"plain"}}"#;
        let messages = parse_str(input);
        assert_eq!(
            messages[0].content,
            vec![ContentBlock::Text { text: "plain".into() }]
        );
    }

    #[test]
    fn test_block_array_walked() {
        let input = r#"{"type":"assistant","message":{"id":"1","content":[
            {"type":"thinking","thinking":"hmm"},
            {"type":"text","text":"I'll read the file"},
            {"type":"tool_use","id":"tu1","name":"Read","input":{"path":"/a"}},
            {"type":"unknown_block","data":1}
        ]}}"#
            .replace('\n', "");
        let messages = parse_str(&input);
        assert_eq!(messages[0].content.len(), 3);
        assert!(matches!(messages[0].content[0], ContentBlock::Thinking { .. }));
        assert!(matches!(messages[0].content[1], ContentBlock::Text { .. }));
        match &messages[0].content[2] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "tu1");
                assert_eq!(name, "Read");
                assert!(input.contains("/a"));
            }
            other => panic!("expected tool_use, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_result_string_and_array_content() {
        let input = r#"{"type":"user","message":{"id":"1","content":[
            {"type":"tool_result","tool_use_id":"tu1","content":"ok","is_error":false},
            {"type":"tool_result","tool_use_id":"tu2","content":[{"type":"text","text":"line1"},{"type":"text","text":"line2"}],"is_error":true}
        ]}}"#
            .replace('\n', "");
        let messages = parse_str(&input);
        match &messages[0].content[0] {
            ContentBlock::ToolResult { tool_use_id, content, is_error } => {
                assert_eq!(tool_use_id, "tu1");
                assert_eq!(content, "ok");
                assert!(!is_error);
            }
            other => panic!("expected tool_result, got {:?}", other),
        }
        match &messages[0].content[1] {
            ContentBlock::ToolResult { content, is_error, .. } => {
                assert_eq!(content, "line1\nline2");
                assert!(is_error);
            }
            other => panic!("expected tool_result, got {:?}", other),
        }
    }

    #[test]
    fn test_image_block() {
        let input = r#"{"type":"user","message":{"id":"1","content":[{"type":"image","source":{"media_type":"image/png","data":"aGk="}}]}}"#;
        let messages = parse_str(input);
        match &messages[0].content[0] {
            ContentBlock::Image { media_type, data } => {
                assert_eq!(media_type, "image/png");
                assert_eq!(data, "aGk=");
            }
            other => panic!("expected image, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_text_truncated_with_marker() {
        let big = "z".repeat(MAX_CONTENT_LEN + 500);
        let input = format!(
            r#"{{"type":"user","message":{{"id":"1","content":"{big}"}}}}"#
        );
        let messages = parse_str(&input);
        match &messages[0].content[0] {
            ContentBlock::Text { text } => {
                assert!(text.ends_with("[+500 chars truncated]"));
                assert!(text.len() < big.len());
            }
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_command_tags_cleaned_from_user_prompt() {
        let input = r#"{"type":"user","message":{"id":"1","content":"<command-name>/commit</command-name>\nPlease commit my changes"}}"#;
        let messages = parse_str(input);
        let text = messages[0].text();
        assert!(!text.contains("<command-name>"));
        assert!(text.contains("Please commit my changes"));
    }

    #[test]
    fn test_command_args_become_the_prompt() {
        let input = r#"{"type":"user","message":{"id":"1","content":"<command-name>/review</command-name><command-args>PR #123</command-args>"}}"#;
        let messages = parse_str(input);
        assert_eq!(messages[0].text(), "PR #123");
    }

    // ========================================================================
    // Usage, model, stop reason
    // ========================================================================

    #[test]
    fn test_usage_counters_parsed() {
        let input = r#"{"type":"assistant","message":{"id":"1","content":"x","model":"claude-opus-4-6","stop_reason":"end_turn","usage":{"input_tokens":10,"output_tokens":20,"cache_read_input_tokens":30,"cache_creation_input_tokens":40}}}"#;
        let messages = parse_str(input);
        let m = &messages[0];
        assert_eq!(m.usage.input_tokens, 10);
        assert_eq!(m.usage.output_tokens, 20);
        assert_eq!(m.usage.cache_read_tokens, 30);
        assert_eq!(m.usage.cache_creation_tokens, 40);
        assert_eq!(m.model.as_deref(), Some("claude-opus-4-6"));
        assert_eq!(m.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn test_absent_usage_defaults_to_zero() {
        let input = r#"{"type":"assistant","message":{"id":"1","content":"x","usage":{"output_tokens":5}}}"#;
        let messages = parse_str(input);
        assert_eq!(messages[0].usage.input_tokens, 0);
        assert_eq!(messages[0].usage.output_tokens, 5);
        assert_eq!(messages[0].usage.cache_read_tokens, 0);
    }

    // ========================================================================
    // Timestamps
    // ========================================================================

    #[test]
    fn test_timestamp_with_fraction() {
        let ts = parse_timestamp("2026-02-03T10:15:30.123Z").unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 123);
    }

    #[test]
    fn test_timestamp_without_fraction() {
        let ts = parse_timestamp("2026-02-03T10:15:30Z").unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 0);
    }

    #[test]
    fn test_timestamp_garbage_is_none() {
        assert!(parse_timestamp("yesterday at noon").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_record_timestamp_attached() {
        let input = r#"{"type":"user","message":{"id":"1","content":"x"},"timestamp":"2026-02-03T10:15:30.500Z"}"#;
        let messages = parse_str(input);
        assert!(messages[0].timestamp.is_some());
    }

    #[test]
    fn test_bad_record_timestamp_is_none_not_error() {
        let input = r#"{"type":"user","message":{"id":"1","content":"x"},"timestamp":"not-a-time"}"#;
        let messages = parse_str(input);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].timestamp.is_none());
    }

    // ========================================================================
    // File-level parsing
    // ========================================================================

    #[tokio::test]
    async fn test_parse_session_file() {
        use tokio::io::AsyncWriteExt;
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("abc-123.jsonl");

        let content = concat!(
            r#"{"type":"user","message":{"id":"1","content":"Test question"},"timestamp":"2026-02-03T12:00:00Z"}"#,
            "\n",
            r#"{"type":"assistant","message":{"id":"2","content":"Test answer"},"timestamp":"2026-02-03T12:00:01Z"}"#,
        );
        let mut file = tokio::fs::File::create(&path).await.unwrap();
        file.write_all(content.as_bytes()).await.unwrap();
        file.flush().await.unwrap();

        let session = parse_session_file(&path).await.unwrap();
        assert_eq!(session.id, "abc-123");
        assert_eq!(session.messages.len(), 2);
        assert!(session.last_modified.is_some());
        assert_eq!(
            session.start_time,
            Some("2026-02-03T12:00:00Z".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn test_parse_session_file_derives_project_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let project_dir = dir.path().join("-home-user-my-project");
        tokio::fs::create_dir(&project_dir).await.unwrap();
        let path = project_dir.join("s1.jsonl");
        tokio::fs::write(&path, b"").await.unwrap();

        let session = parse_session_file(&path).await.unwrap();
        assert_eq!(
            session.project_path.as_deref(),
            Some(Path::new("/home/user/my/project"))
        );
    }

    #[tokio::test]
    async fn test_parse_session_file_not_found() {
        let result = parse_session_file(Path::new("/nonexistent/file.jsonl")).await;
        assert!(matches!(result, Err(ParseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_parse_session_file_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("empty.jsonl");
        tokio::fs::write(&path, b"").await.unwrap();

        let session = parse_session_file(&path).await.unwrap();
        assert!(session.is_empty());
        assert!(session.start_time.is_none());
    }
}
