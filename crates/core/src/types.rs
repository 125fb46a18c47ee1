// crates/core/src/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};
use std::path::PathBuf;

/// Maximum retained length (in characters) for any textual content payload.
///
/// Tool outputs can reach megabytes; everything past this limit is replaced
/// by a marker noting how much was cut, so downstream consumers never hold
/// pathological strings.
pub const MAX_CONTENT_LEN: usize = 50_000;

/// Truncate `text` to [`MAX_CONTENT_LEN`] characters, appending a marker
/// with the omitted character count. Shorter input passes through unchanged.
pub fn truncate_content(text: &str) -> String {
    let char_count = text.chars().count();
    if char_count <= MAX_CONTENT_LEN {
        return text.to_string();
    }
    let kept: String = text.chars().take(MAX_CONTENT_LEN).collect();
    format!("{}… [+{} chars truncated]", kept, char_count - MAX_CONTENT_LEN)
}

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        /// Tool input rendered to compact JSON text.
        input: String,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    Thinking {
        thinking: String,
    },
    Image {
        media_type: String,
        data: String,
    },
}

impl ContentBlock {
    /// The textual payload of this block, if it has one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::ToolUse { input, .. } => Some(input),
            ContentBlock::ToolResult { content, .. } => Some(content),
            ContentBlock::Thinking { thinking } => Some(thinking),
            ContentBlock::Image { .. } => None,
        }
    }
}

/// Token counters reported per message.
///
/// `total()` covers input + output only; cache tokens are billed separately
/// and excluded from the total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0
            && self.output_tokens == 0
            && self.cache_read_tokens == 0
            && self.cache_creation_tokens == 0
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            cache_read_tokens: self.cache_read_tokens + rhs.cache_read_tokens,
            cache_creation_tokens: self.cache_creation_tokens + rhs.cache_creation_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for TokenUsage {
    fn sum<I: Iterator<Item = TokenUsage>>(iter: I) -> TokenUsage {
        iter.fold(TokenUsage::default(), |acc, u| acc + u)
    }
}

/// A message in a conversation. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            content: Vec::new(),
            timestamp: None,
            usage: TokenUsage::default(),
            model: None,
            stop_reason: None,
        }
    }

    pub fn with_content(mut self, content: Vec<ContentBlock>) -> Self {
        self.content = content;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_stop_reason(mut self, stop_reason: impl Into<String>) -> Self {
        self.stop_reason = Some(stop_reason.into());
        self
    }

    /// Concatenated text of all `Text` blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The full parsed conversation history backing one log file.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub file_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<PathBuf>,
    /// Earliest message timestamp, when any message carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// File modification time at load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    pub messages: Vec<Message>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        file_path: impl Into<PathBuf>,
        project_path: Option<PathBuf>,
        last_modified: Option<DateTime<Utc>>,
        messages: Vec<Message>,
    ) -> Self {
        let start_time = messages.iter().filter_map(|m| m.timestamp).min();
        Self {
            id: id.into(),
            file_path: file_path.into(),
            project_path,
            start_time,
            last_modified,
            messages,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Componentwise sum of token usage across all messages.
    pub fn total_usage(&self) -> TokenUsage {
        self.messages.iter().map(|m| m.usage).sum()
    }
}

/// One project subdirectory under the log root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectDirectory {
    /// Directory name as it appears on disk (encoded form).
    pub encoded_name: String,
    /// Decoded filesystem path of the project.
    pub original_path: PathBuf,
    pub session_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

/// Session listing entry (without full message content).
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub file_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    pub size_bytes: u64,
    /// Summary text from the sidecar index, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// First user prompt from the sidecar index, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<usize>,
}
