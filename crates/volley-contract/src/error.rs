//! The engine's error taxonomy. Every variant maps to a stable wire code.

use thiserror::Error;

use crate::event::ErrorPayload;

/// Stable string codes carried by `error` events and logged failures.
pub mod code {
    pub const INVALID_SESSION: &str = "invalid_session";
    pub const TURN_IN_PROGRESS: &str = "turn_in_progress";
    pub const NO_PENDING_APPROVAL: &str = "no_pending_approval";
    pub const APPROVAL_MISMATCH: &str = "approval_mismatch";
    pub const TOOL_NOT_FOUND: &str = "tool_not_found";
    pub const TOOL_ARGS_INVALID: &str = "tool_args_invalid";
    pub const POLICY_DENIED: &str = "policy_denied";
    pub const WORKSPACE_ESCAPE: &str = "workspace_escape";
    pub const TOOL_EXECUTE_FAILED: &str = "tool_execute_failed";
    pub const STORE_ERROR: &str = "store_error";
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown session: {0}")]
    InvalidSession(String),

    #[error("turn already in progress for session {0}")]
    TurnInProgress(String),

    #[error("no pending approval for session {0}")]
    NoPendingApproval(String),

    #[error("approval mismatch: {0}")]
    ApprovalMismatch(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("invalid tool arguments: {0}")]
    ToolArgsInvalid(String),

    #[error("denied by policy: {0}")]
    PolicyDenied(String),

    #[error("path {0:?} escapes workspace boundary")]
    WorkspaceEscape(String),

    #[error("tool execution failed: {0}")]
    ToolExecuteFailed(String),

    #[error("store error: {0}")]
    StoreError(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidSession(_) => code::INVALID_SESSION,
            EngineError::TurnInProgress(_) => code::TURN_IN_PROGRESS,
            EngineError::NoPendingApproval(_) => code::NO_PENDING_APPROVAL,
            EngineError::ApprovalMismatch(_) => code::APPROVAL_MISMATCH,
            EngineError::ToolNotFound(_) => code::TOOL_NOT_FOUND,
            EngineError::ToolArgsInvalid(_) => code::TOOL_ARGS_INVALID,
            EngineError::PolicyDenied(_) => code::POLICY_DENIED,
            EngineError::WorkspaceEscape(_) => code::WORKSPACE_ESCAPE,
            EngineError::ToolExecuteFailed(_) => code::TOOL_EXECUTE_FAILED,
            EngineError::StoreError(_) => code::STORE_ERROR,
        }
    }

    /// The wire payload for a terminal `error` event.
    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}
