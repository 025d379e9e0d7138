// db/types.rs
// Row types shared across the database layer

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A uniquely named unit of knowledge: code symbol, file, document section,
/// decision, session, concept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    /// Open set: file, function, class, interface, method, module, document,
    /// section, decision, session, concept, reflection, ...
    pub entity_type: String,
    pub name: String,
    /// Unique within a project; convention `path::symbol`.
    pub qualified_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

/// Input for entity create/upsert.
#[derive(Debug, Clone, Default)]
pub struct EntityInput {
    pub entity_type: String,
    pub name: String,
    pub qualified_name: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub file_path: Option<String>,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
    /// Overrides the hash computed from `content`. The indexer hashes file
    /// entities over the source text rather than the stored overview.
    pub content_hash: Option<String>,
    pub metadata: serde_json::Value,
}

/// What an upsert did to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Modified,
    Unchanged,
}

/// Directed weighted edge between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    /// calls, imports, implements, references, relates_to, supersedes, mentions, ...
    pub relation_type: String,
    /// In [0, 1].
    pub weight: f64,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

/// Edge direction filter for relationship queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Both,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in" => Some(Self::In),
            "out" => Some(Self::Out),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

/// Conversation session lifecycle: active -> archived -> summarized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Archived,
    Summarized,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Summarized => "summarized",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            "summarized" => Some(Self::Summarized),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub message_count: i64,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<String>,
}

/// Well-known message metadata with an escape hatch for free-form keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// "decision" or "reflection" marker messages.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl MessageMetadata {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.tokens.is_none()
            && self.tool_calls.is_none()
            && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    /// user, assistant, system
    pub role: String,
    pub content: String,
    pub metadata: MessageMetadata,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub alternatives: Vec<String>,
    pub related_entity_ids: Vec<String>,
    /// open | superseded
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub session_id: String,
    /// Monotonic per session.
    pub step_number: i64,
    /// Opaque JSON state.
    pub state: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub id: String,
    pub query: String,
    pub tokens_retrieved: i64,
    pub tokens_saved: i64,
    pub average_relevance: f64,
    pub strategies_used: Vec<String>,
    pub latency_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub was_useful: Option<bool>,
    pub created_at: String,
}
