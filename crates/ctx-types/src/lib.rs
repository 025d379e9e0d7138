// crates/ctx-types/src/lib.rs

//! Shared data contracts between the ctx-sys engine and its embedders.
//!
//! This crate provides the types that cross the service facade:
//! - **Project context**: mapping filesystem paths to database projects
//! - **Action envelope**: the uniform `{success, data, error}` response shape
//!
//! These types carry no engine dependencies so that thin clients (CLI
//! front-ends, RPC routers) can consume them without pulling in the core.

use serde::{Deserialize, Serialize};

/// Represents the connection between a local filesystem path and a ctx-sys
/// database project.
///
/// Required for almost all operations (indexing, search, conversations). It
/// ensures data is scoped to the correct per-project table namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectContext {
    /// Persistent database ID. Use this for all foreign keys.
    pub id: i64,
    /// Sanitized table-prefix slug (`[a-z0-9_]+`), unique per installation.
    pub slug: String,
    /// Absolute filesystem path to the project root.
    pub path: String,
    /// Human-readable display name.
    pub name: String,
}

/// Error payload carried by a failed action response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionError {
    /// Stable error kind (`not_found`, `invalid_input`, `conflict`, ...).
    pub kind: String,
    pub message: String,
    /// Optional remediation hint for the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Uniform response envelope for every facade operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

impl ActionResponse {
    /// Successful response wrapping a serializable payload.
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed response with a kind, message, and optional hint.
    pub fn err(kind: impl Into<String>, message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ActionError {
                kind: kind.into(),
                message: message.into(),
                hint,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_context_roundtrip() {
        let ctx = ProjectContext {
            id: 7,
            slug: "my_project".to_string(),
            path: "/home/user/project".to_string(),
            name: "my-project".to_string(),
        };
        let json = serde_json::to_string(&ctx).unwrap();
        let back: ProjectContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 7);
        assert_eq!(back.slug, "my_project");
    }

    #[test]
    fn test_action_response_ok_omits_error() {
        let resp = ActionResponse::ok(serde_json::json!({"count": 3}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_action_response_err_shape() {
        let resp = ActionResponse::err("not_found", "no such entity", Some("check the id".into()));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"kind\":\"not_found\""));
        assert!(json.contains("\"hint\":\"check the id\""));
        assert!(!json.contains("data"));
    }
}
