//! Policy inputs: approval modes, risk levels, tool-call origins, and the
//! per-call context every policy decision receives.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How often the user is consulted before a tool runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalMode {
    /// Every tool call requires approval.
    Suggest,
    /// Only risky operations require approval.
    #[default]
    Auto,
    /// No approvals; validation still applies.
    FullAuto,
}

impl ApprovalMode {
    /// Parse the metadata string form (`suggest` / `auto` / `full-auto`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "suggest" => Some(ApprovalMode::Suggest),
            "auto" => Some(ApprovalMode::Auto),
            "full-auto" => Some(ApprovalMode::FullAuto),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalMode::Suggest => "suggest",
            ApprovalMode::Auto => "auto",
            ApprovalMode::FullAuto => "full-auto",
        }
    }
}

/// Declared risk of a tool, used by approval classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    None,
    #[default]
    Low,
    High,
}

/// Where a tool call came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallOrigin {
    Model,
    Middleware,
    System,
}

/// Input for every policy decision. Stable and serializable for audit.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub session_id: String,
    pub turn_id: String,
    pub approval_mode: ApprovalMode,
    /// Allowlist from the active skill; empty means unrestricted.
    pub allowed_tools: Vec<String>,
    pub origin: ToolCallOrigin,
    pub workspace_root: PathBuf,
}

/// Tools that bypass skill allowed-tools restrictions. Always visible and
/// callable, but still subject to approval classification and validation.
pub const SYSTEM_TOOL_ALLOWLIST: &[&str] = &[
    "list_skills",
    "read_skill",
    "activate_skill",
    "read_memory",
    "update_memory",
    "read_todos",
    "write_todos",
    "understand_intent",
];

pub fn is_system_tool(name: &str) -> bool {
    SYSTEM_TOOL_ALLOWLIST.contains(&name)
}

/// The model-visible tool description (safe to send to the provider).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON-Schema-shaped parameters object.
    pub parameters: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_mode_parse_and_wire_form_agree() {
        for mode in [
            ApprovalMode::Suggest,
            ApprovalMode::Auto,
            ApprovalMode::FullAuto,
        ] {
            assert_eq!(ApprovalMode::parse(mode.as_str()), Some(mode));
            let wire = serde_json::to_string(&mode).unwrap();
            assert_eq!(wire, format!("\"{}\"", mode.as_str()));
        }
        assert_eq!(ApprovalMode::parse("yolo"), None);
    }

    #[test]
    fn system_allowlist_contains_plan_and_skill_tools() {
        assert!(is_system_tool("write_todos"));
        assert!(is_system_tool("activate_skill"));
        assert!(is_system_tool("understand_intent"));
        assert!(!is_system_tool("write_file"));
        assert!(!is_system_tool("shell"));
    }
}
