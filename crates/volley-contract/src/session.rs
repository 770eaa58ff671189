//! Session, message, and turn records.
//!
//! A [`Session`] is the durable container the engine checks out, mutates, and
//! writes back after every semantic step. Its message list is always a
//! well-formed LLM conversation: an assistant message carrying tool calls is
//! followed, before the next user message, by one tool message per call.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{ErrorPayload, Preview, ToolCallPayload};
use crate::policy::ApprovalMode;

/// Canonical argument container for tools: an untyped JSON object.
pub type Args = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the conversation, in provider wire shape.
///
/// `content` is never null on the wire; assistant messages that only carry
/// tool calls use the empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Tool calls made by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Tool call this message responds to (tool role only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A tool call as produced by the model: the arguments stay a raw JSON
/// string until the runtime parses them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw argument string; a valid JSON object when non-empty.
    #[serde(default)]
    pub args: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args: args.into(),
        }
    }
}

/// The persisted session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub active_skill: String,
    /// Free-form per-session settings: `approval_mode`, `emit_thinking`,
    /// `auto_skill`, `skill_locked`, ...
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Compressed-history summary carried across turns.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingApproval>,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            created_at: now,
            updated_at: now,
            active_skill: String::new(),
            metadata: BTreeMap::new(),
            summary: String::new(),
            messages: Vec::new(),
            pending: None,
        }
    }

    /// Approval mode from metadata; defaults to `auto`.
    pub fn approval_mode(&self) -> ApprovalMode {
        self.metadata
            .get("approval_mode")
            .and_then(|v| ApprovalMode::parse(v))
            .unwrap_or_default()
    }

    pub fn emit_thinking(&self) -> bool {
        self.metadata.get("emit_thinking").map(String::as_str) == Some("true")
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// The durable marker that a turn is suspended awaiting a decision on one
/// specific tool call. Survives process restarts with the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub turn_id: String,
    pub request_id: String,
    /// The frozen tool call as it was advertised to the UI.
    pub tool_call: ToolCallPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<Preview>,
    pub created_at: DateTime<Utc>,
    /// Terminate the turn after executing this call instead of re-entering
    /// the agent loop (used by engine-originated proposals).
    #[serde(default, skip_serializing_if = "is_false")]
    pub stop_after: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Approve,
    Reject,
    Modify,
}

/// A user's response to an approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub kind: DecisionKind,
    pub request_id: String,
    /// Optional cross-check against the pending tool call.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_call_id: String,
    /// Replacement arguments for `modify`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_args: Option<Args>,
}

impl Decision {
    pub fn approve(request_id: impl Into<String>) -> Self {
        Self {
            kind: DecisionKind::Approve,
            request_id: request_id.into(),
            tool_call_id: String::new(),
            modified_args: None,
        }
    }

    pub fn reject(request_id: impl Into<String>) -> Self {
        Self {
            kind: DecisionKind::Reject,
            request_id: request_id.into(),
            tool_call_id: String::new(),
            modified_args: None,
        }
    }

    pub fn modify(request_id: impl Into<String>, args: Args) -> Self {
        Self {
            kind: DecisionKind::Modify,
            request_id: request_id.into(),
            tool_call_id: String::new(),
            modified_args: Some(args),
        }
    }

    #[must_use]
    pub fn with_tool_call_id(mut self, id: impl Into<String>) -> Self {
        self.tool_call_id = id.into();
        self
    }
}

/// Session creation options.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub approval_mode: Option<ApprovalMode>,
    pub emit_thinking: bool,
    pub active_skill: String,
}

/// Public view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub active_skill: String,
}

/// How a turn completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnOutcome {
    Completed,
    Canceled,
    Error,
}

/// Per-turn mutable state threaded through the middleware chain.
///
/// Middlewares layer onto `system_prompt` and may publish an
/// `allowed_tools` list through `metadata`; the runner rebuilds this state
/// from the session at the top of every agent-loop iteration.
#[derive(Debug, Clone, Default)]
pub struct TurnState {
    pub session_id: String,
    pub turn_id: String,
    pub active_skill: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub metadata: serde_json::Map<String, Value>,
}

impl TurnState {
    /// The `allowed_tools` list a middleware published, if any.
    pub fn allowed_tools(&self) -> Vec<String> {
        match self.metadata.get("allowed_tools") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Immutable view of a completed turn handed to `after_turn` hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSummary {
    pub session_id: String,
    pub turn_id: String,
    pub outcome: TurnOutcome,
    pub assistant_text: String,
    pub tool_calls: Vec<ToolCallRef>,
    pub approvals: Vec<ApprovalRef>,
    pub error: Option<ErrorPayload>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRef {
    pub tool_call_id: String,
    pub tool_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRef {
    pub request_id: String,
    pub tool_call_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_with_only_tool_calls_keeps_empty_content_on_wire() {
        let msg = Message::assistant_with_tool_calls(
            "",
            vec![ToolCallRequest::new("c1", "read_file", r#"{"path":"a"}"#)],
        );
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["content"], "");
        assert_eq!(wire["tool_calls"][0]["name"], "read_file");
    }

    #[test]
    fn tool_message_carries_call_id() {
        let msg = Message::tool("c1", "done");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("c1"));
        let wire = serde_json::to_string(&Message::user("hi")).unwrap();
        assert!(!wire.contains("tool_call_id"));
        assert!(!wire.contains("tool_calls"));
    }

    #[test]
    fn session_round_trip_is_lossless() {
        let mut session = Session::new("s1");
        session.active_skill = "chapter-write".into();
        session
            .metadata
            .insert("approval_mode".into(), "suggest".into());
        session.summary = "earlier context".into();
        session.messages = vec![
            Message::user("hello"),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCallRequest::new("c1", "read_file", r#"{"path":"a"}"#)],
            ),
            Message::tool("c1", "contents"),
        ];

        let wire = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, session);

        // A second encode is byte-identical (BTreeMap keeps key order stable).
        assert_eq!(serde_json::to_string(&back).unwrap(), wire);
    }

    #[test]
    fn approval_mode_defaults_to_auto() {
        let session = Session::new("s1");
        assert_eq!(session.approval_mode(), ApprovalMode::Auto);

        let mut session = Session::new("s2");
        session
            .metadata
            .insert("approval_mode".into(), "full-auto".into());
        assert_eq!(session.approval_mode(), ApprovalMode::FullAuto);
    }

    #[test]
    fn pending_stop_after_omitted_when_false() {
        let pending = PendingApproval {
            turn_id: "t1".into(),
            request_id: "r1".into(),
            tool_call: ToolCallPayload {
                tool_call_id: "c1".into(),
                tool_name: "write_file".into(),
                args: Args::new(),
                preview: None,
                need_approval: true,
            },
            preview: None,
            created_at: Utc::now(),
            stop_after: false,
        };
        let wire = serde_json::to_string(&pending).unwrap();
        assert!(!wire.contains("stop_after"));
    }

    #[test]
    fn turn_state_allowed_tools_reads_string_array() {
        let mut state = TurnState::default();
        assert!(state.allowed_tools().is_empty());

        state
            .metadata
            .insert("allowed_tools".into(), json!(["read_file", "write_file"]));
        assert_eq!(state.allowed_tools(), vec!["read_file", "write_file"]);

        state.metadata.insert("allowed_tools".into(), json!("nope"));
        assert!(state.allowed_tools().is_empty());
    }
}
