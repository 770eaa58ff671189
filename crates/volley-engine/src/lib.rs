//! Single-tenant agent turn runtime.
//!
//! The engine drives one conversation at a time per session: it streams
//! model output as an ordered event sequence, validates every proposed tool
//! call against a policy, pauses durably for human approval when required,
//! executes the call, feeds the result back, and loops until the model
//! produces a terminal response.
//!
//! ```text
//! caller ──Send/Resume──▶ Engine ──▶ TurnRunner ──▶ Middlewares (state)
//!                                        │
//!                                        ├──▶ Policy (filter/approve/validate)
//!                                        ├──▶ LLM stream ──▶ events
//!                                        └──▶ Tools ──▶ results ──▶ events
//! ```
//!
//! Collaborators the core only knows by trait: the LLM transport
//! ([`llm::Llm`]), the stores ([`store`]), tools ([`registry::Tool`]),
//! skill discovery ([`skills::SkillIndex`]), and memory
//! ([`memory::MemoryStore`]).
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use volley_engine::prelude::*;
//!
//! let tools = Arc::new(ToolRegistry::new());
//! register_file_tools(&tools, "/work")?;
//!
//! let engine = Engine::new(EngineConfig {
//!     llm: Arc::new(GenaiLlm::new("gpt-4o-mini")),
//!     tools,
//!     policy: Arc::new(DefaultPolicy::new()),
//!     middlewares: Arc::new(MiddlewareChain::default()),
//!     skill_index: None,
//!     workspace_root: "/work".into(),
//!     session_store: None,
//!     plan_store: None,
//!     event_log: None,
//!     prompts: None,
//!     auto_compress_threshold: 60,
//!     compress_keep_turns: 3,
//!     filter_history_tools: false,
//! });
//!
//! let session_id = engine.start_session(StartOptions::default()).await?;
//! let mut stream = engine
//!     .send(&session_id, "hello", CancellationToken::new())
//!     .await?;
//! while let Some(event) = stream.recv().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod autosave;
pub mod bus;
pub mod compress;
pub mod engine;
pub mod llm;
pub mod memory;
pub mod middleware;
pub mod policy;
pub mod prompts;
pub mod registry;
pub mod router;
pub mod skills;
pub mod store;
pub mod systool;
pub mod tools;
pub mod turn;

pub use bus::{EventBus, EventStream, DEFAULT_EVENT_BUFFER};
pub use compress::{compress_history, CompressConfig, CompressResult};
pub use engine::{Engine, EngineConfig};
pub use llm::{GenaiLlm, Llm, LlmChunk, LlmError, LlmRequest, LlmStream, MockLlm};
pub use middleware::{
    BasePromptMiddleware, MemoryMiddleware, Middleware, MiddlewareChain, MiddlewareError,
    PlanningMiddleware, SkillsMiddleware,
};
pub use policy::DefaultPolicy;
pub use prompts::PromptLoader;
pub use registry::{Tool, ToolError, ToolRegistry};
pub use skills::{InMemorySkillIndex, SkillIndex};
pub use store::{
    EventLog, FilePlanStore, FileSessionStore, JsonlEventLog, PlanStore, SessionStore, StoreError,
};
pub use turn::{TurnRunner, TurnRunnerConfig};

/// Everything an embedder usually needs.
pub mod prelude {
    pub use crate::engine::{Engine, EngineConfig};
    pub use crate::llm::{GenaiLlm, Llm, MockLlm};
    pub use crate::memory::{FileMemoryStore, MemoryStore};
    pub use crate::middleware::{
        BasePromptMiddleware, MemoryMiddleware, MiddlewareChain, PlanningMiddleware,
        SkillsMiddleware,
    };
    pub use crate::policy::DefaultPolicy;
    pub use crate::registry::{Tool, ToolRegistry};
    pub use crate::skills::{InMemorySkillIndex, SkillIndex};
    pub use crate::systool::register_system_tools;
    pub use crate::tools::register_file_tools;
    pub use volley_contract::{
        ApprovalMode, Decision, EngineError, Event, EventBody, EventKind, Session, StartOptions,
    };
}
