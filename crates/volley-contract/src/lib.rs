//! Stable wire contract for the volley agent engine.
//!
//! Everything a consumer needs to talk to the engine lives here: the event
//! union streamed out of a turn, the persisted session and plan records, the
//! policy inputs, and the error-code taxonomy. The crate is pure data —
//! no IO, no runtime — so UIs, stores, and tools can depend on it without
//! pulling in the engine.

pub mod error;
pub mod event;
pub mod memory;
pub mod plan;
pub mod policy;
pub mod session;
pub mod skill;

pub use error::{code, EngineError};
pub use event::{
    ApprovalPayload, DeltaPayload, DeltaSource, DisplayHint, DonePayload, DoneReason,
    ErrorPayload, Event, EventBody, EventKind, Preview, PreviewKind, ThinkingPayload,
    ToolCallPayload, ToolResult, ToolResultPayload, ToolStatus, PROTOCOL_VERSION,
};
pub use memory::{MemoryEntry, MemoryKind, MemorySource};
pub use plan::{plan_id_for, PlanItem, PlanSnapshot, PlanStatus};
pub use policy::{
    is_system_tool, ApprovalMode, PolicyContext, RiskLevel, ToolCallOrigin, ToolSchema,
    SYSTEM_TOOL_ALLOWLIST,
};
pub use session::{
    ApprovalRef, Args, Decision, DecisionKind, Message, PendingApproval, Role, Session,
    SessionInfo, StartOptions, ToolCallRef, ToolCallRequest, TurnOutcome, TurnState, TurnSummary,
};
pub use skill::{Skill, SkillMeta};
