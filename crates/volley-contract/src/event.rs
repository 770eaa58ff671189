//! The event stream protocol.
//!
//! Every turn emits an ordered sequence of [`Event`]s: a common envelope
//! (protocol version, session/turn ids, a strictly monotonic sequence number
//! starting at 1, timestamp) around exactly one payload variant. On the wire
//! an event is `{"type": "tool_call", "tool_call": {...}, ...}` — the
//! internally tagged [`EventBody`] keeps the union strict while matching that
//! layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::PlanSnapshot;
use crate::policy::ApprovalMode;
use crate::session::Args;

/// Wire protocol version stamped on every event.
pub const PROTOCOL_VERSION: u32 = 1;

/// A single event emitted by a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub version: u32,
    pub session_id: String,
    pub turn_id: String,
    /// Monotonically increasing within a turn, starting at 1.
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub body: EventBody,
    /// UI rendering suggestion; never affects engine semantics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayHint>,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }
}

/// Discriminant of an event, matching the wire `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Delta,
    Thinking,
    ToolCall,
    ToolResult,
    Approval,
    Plan,
    Done,
    Error,
}

/// The strict payload union. Exactly one variant per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    Delta { delta: DeltaPayload },
    Thinking { thinking: ThinkingPayload },
    ToolCall { tool_call: ToolCallPayload },
    ToolResult { tool_result: ToolResultPayload },
    Approval { approval: ApprovalPayload },
    Plan { plan: PlanSnapshot },
    Done { done: DonePayload },
    Error { error: ErrorPayload },
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            EventBody::Delta { .. } => EventKind::Delta,
            EventBody::Thinking { .. } => EventKind::Thinking,
            EventBody::ToolCall { .. } => EventKind::ToolCall,
            EventBody::ToolResult { .. } => EventKind::ToolResult,
            EventBody::Approval { .. } => EventKind::Approval,
            EventBody::Plan { .. } => EventKind::Plan,
            EventBody::Done { .. } => EventKind::Done,
            EventBody::Error { .. } => EventKind::Error,
        }
    }

    /// Streamed text delta.
    pub fn delta(text: impl Into<String>, source: DeltaSource) -> Self {
        EventBody::Delta {
            delta: DeltaPayload {
                text: text.into(),
                source,
            },
        }
    }

    /// Progress/explanation message.
    pub fn thinking(message: impl Into<String>) -> Self {
        EventBody::Thinking {
            thinking: ThinkingPayload {
                message: message.into(),
            },
        }
    }

    /// Result of a tool execution (success or error).
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: ToolResult,
    ) -> Self {
        EventBody::ToolResult {
            tool_result: ToolResultPayload {
                tool_call_id: tool_call_id.into(),
                tool_name: tool_name.into(),
                result,
            },
        }
    }

    /// Turn completion marker.
    pub fn done(reason: DoneReason) -> Self {
        EventBody::Done {
            done: DonePayload { reason },
        }
    }

    /// Terminal error.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        EventBody::Error {
            error: ErrorPayload {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

/// Origin of streamed content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaSource {
    /// Normal assistant response text.
    #[default]
    Text,
    /// Tool arguments being generated (UI renders these dimmed).
    ToolArg,
}

impl DeltaSource {
    fn is_text(&self) -> bool {
        *self == DeltaSource::Text
    }
}

/// Streaming text increment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "DeltaSource::is_text")]
    pub source: DeltaSource,
}

/// Progress/explanation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingPayload {
    pub message: String,
}

/// Tool invocation details as advertised to the UI.
///
/// `args` are the parsed model-supplied arguments, before any engine-side
/// injection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Args,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<Preview>,
    pub need_approval: bool,
}

/// Tool execution outcome attached to a `tool_result` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPayload {
    pub tool_call_id: String,
    pub tool_name: String,
    pub result: ToolResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

/// The outcome of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default)]
    pub content: String,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Optional structured data mirroring `content`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status: ToolStatus::Success,
            error: String::new(),
            data: None,
        }
    }

    pub fn success_with_data(content: impl Into<String>, data: Value) -> Self {
        Self {
            content: content.into(),
            status: ToolStatus::Success,
            error: String::new(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            status: ToolStatus::Error,
            error: message.into(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }
}

/// Request for user approval of a tool call. Emitting this suspends the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPayload {
    pub request_id: String,
    pub tool_call_id: String,
    pub tool_call: ToolCallPayload,
    pub mode: ApprovalMode,
}

/// Why a turn terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoneReason {
    Completed,
    Rejected,
    Canceled,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonePayload {
    pub reason: DoneReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Content shown to the user when presenting an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewKind {
    Diff,
    Command,
    Files,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    pub kind: PreviewKind,
    pub summary: String,
    /// Diff or command text.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    /// Affected paths.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub risk_hint: String,
}

/// UI rendering suggestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayHint {
    /// "debug" | "info" | "warning" | "error"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub level: String,
    /// "inline" | "block" | "collapsible"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub style: String,
    /// Keep visible in the UI.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sticky: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(body: EventBody) -> Event {
        Event {
            version: PROTOCOL_VERSION,
            session_id: "s1".into(),
            turn_id: "t1".into(),
            seq: 1,
            ts: Utc::now(),
            body,
            display: None,
        }
    }

    #[test]
    fn delta_wire_format_carries_type_tag_and_payload_field() {
        let e = envelope(EventBody::delta("hi", DeltaSource::Text));
        let wire = serde_json::to_value(&e).unwrap();

        assert_eq!(wire["type"], "delta");
        assert_eq!(wire["delta"]["text"], "hi");
        // Default source is omitted.
        assert!(wire["delta"].get("source").is_none());
        assert_eq!(wire["seq"], 1);
        assert_eq!(wire["version"], 1);
    }

    #[test]
    fn tool_arg_delta_serializes_source() {
        let e = envelope(EventBody::delta("{\"pa", DeltaSource::ToolArg));
        let wire = serde_json::to_value(&e).unwrap();
        assert_eq!(wire["delta"]["source"], "tool_arg");
    }

    #[test]
    fn done_reason_round_trip() {
        let e = envelope(EventBody::done(DoneReason::Rejected));
        let wire = serde_json::to_string(&e).unwrap();
        assert!(wire.contains(r#""type":"done""#));
        assert!(wire.contains(r#""reason":"rejected""#));

        let back: Event = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.kind(), EventKind::Done);
        match back.body {
            EventBody::Done { done } => assert_eq!(done.reason, DoneReason::Rejected),
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[test]
    fn tool_result_error_round_trip() {
        let body = EventBody::tool_result("call_1", "write_file", ToolResult::error("boom"));
        let e = envelope(body);
        let wire = serde_json::to_string(&e).unwrap();
        let back: Event = serde_json::from_str(&wire).unwrap();
        match back.body {
            EventBody::ToolResult { tool_result } => {
                assert_eq!(tool_result.tool_call_id, "call_1");
                assert!(tool_result.result.is_error());
                assert_eq!(tool_result.result.error, "boom");
            }
            other => panic!("expected tool_result, got {other:?}"),
        }
    }

    #[test]
    fn approval_payload_embeds_frozen_tool_call() {
        let mut args = Args::new();
        args.insert("path".into(), json!("a.txt"));
        let body = EventBody::Approval {
            approval: ApprovalPayload {
                request_id: "req_1".into(),
                tool_call_id: "call_1".into(),
                tool_call: ToolCallPayload {
                    tool_call_id: "call_1".into(),
                    tool_name: "write_file".into(),
                    args,
                    preview: None,
                    need_approval: true,
                },
                mode: ApprovalMode::Auto,
            },
        };
        let wire = serde_json::to_value(envelope(body)).unwrap();
        assert_eq!(wire["approval"]["tool_call"]["tool_name"], "write_file");
        assert_eq!(wire["approval"]["mode"], "auto");
    }

    #[test]
    fn success_result_omits_error_field() {
        let wire = serde_json::to_value(ToolResult::success("ok")).unwrap();
        assert_eq!(wire["status"], "success");
        assert!(wire.get("error").is_none());
        assert!(wire.get("data").is_none());
    }
}
