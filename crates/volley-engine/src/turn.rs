//! The turn state machine.
//!
//! A turn moves through idle → running → tool-proposed → awaiting-approval →
//! executing → completed/error. Everything is internal to one spawned task
//! except the awaiting-approval boundary, which persists across process
//! restarts through the session's pending-approval record: the task returns
//! (suspends) after emitting the `approval` event, and a later `Resume` picks
//! the turn back up under the same turn id.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use volley_contract::{
    plan_id_for, ApprovalMode, ApprovalPayload, ApprovalRef, Args, Decision, DecisionKind,
    EngineError, ErrorPayload, Event, EventBody, Message, PendingApproval, PolicyContext, Role,
    Session, ToolCallOrigin, ToolCallPayload, ToolCallRef, ToolResult, TurnOutcome, TurnState,
    TurnSummary, PROTOCOL_VERSION,
};

use crate::autosave::{plan_autosave, AutosaveProposal};
use crate::bus::EventBus;
use crate::compress::{compress_history, CompressConfig};
use crate::llm::{Llm, LlmRequest};
use crate::middleware::MiddlewareChain;
use crate::policy::DefaultPolicy;
use crate::prompts::PromptLoader;
use crate::registry::{str_arg, ToolRegistry};
use crate::router::{
    is_unlock_skill_message, parse_user_skill_override, plan_hint_from_plan, route_skill,
    RouteInput, RouteSource,
};
use crate::skills::SkillIndex;
use crate::store::{EventLog, PlanStore, SessionStore, StoreError};

use std::path::PathBuf;
use std::sync::Arc;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifier with a coarse time component and a process-local counter:
/// unique within a session, sortable enough for humans.
pub(crate) fn next_id(prefix: &str) -> String {
    let n = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{n}", Utc::now().timestamp_millis())
}

/// Static wiring a turn runs with, assembled by the session engine.
#[derive(Clone)]
pub struct TurnRunnerConfig {
    pub llm: Arc<dyn Llm>,
    pub tools: Arc<ToolRegistry>,
    pub policy: Arc<DefaultPolicy>,
    pub session_store: Arc<dyn SessionStore>,
    pub plan_store: Arc<dyn PlanStore>,
    pub event_log: Option<Arc<dyn EventLog>>,
    pub middlewares: Arc<MiddlewareChain>,
    pub skill_index: Option<Arc<dyn SkillIndex>>,
    pub prompts: Arc<PromptLoader>,

    pub workspace_root: PathBuf,
    pub approval_mode: ApprovalMode,
    pub emit_thinking: bool,

    /// 0 disables auto-compression; otherwise compress when the message
    /// count reaches this at turn start.
    pub auto_compress_threshold: usize,
    pub compress_keep_turns: usize,

    /// Strip historical tool traffic from the request (keep the current
    /// turn intact).
    pub filter_history_tools: bool,
}

enum LoopOutcome {
    Completed,
    Suspended,
}

#[derive(Debug)]
enum LoopError {
    Canceled,
    Store(String),
    Internal(String),
}

impl From<StoreError> for LoopError {
    fn from(e: StoreError) -> Self {
        LoopError::Store(e.to_string())
    }
}

/// Executes a single turn of conversation against one checked-out session.
pub struct TurnRunner {
    cfg: TurnRunnerConfig,
    session: Session,
    turn_id: String,
    seq: u64,
    bus: EventBus,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,

    state: TurnState,
    tool_call_refs: Vec<ToolCallRef>,
    approval_refs: Vec<ApprovalRef>,
    assistant_text: String,
    outcome: Option<TurnOutcome>,
    turn_error: Option<ErrorPayload>,
}

impl TurnRunner {
    /// Runner for a fresh turn.
    pub fn for_run(
        cfg: TurnRunnerConfig,
        session: Session,
        bus: EventBus,
        cancel: CancellationToken,
    ) -> Self {
        let turn_id = next_id("turn");
        Self::with_turn_id(cfg, session, bus, cancel, turn_id)
    }

    /// Runner resuming the suspended turn recorded in the session's pending
    /// approval. The caller must have validated the decision first.
    pub fn for_resume(
        cfg: TurnRunnerConfig,
        session: Session,
        bus: EventBus,
        cancel: CancellationToken,
    ) -> Self {
        let turn_id = session
            .pending
            .as_ref()
            .map(|p| p.turn_id.clone())
            .unwrap_or_else(|| next_id("turn"));
        Self::with_turn_id(cfg, session, bus, cancel, turn_id)
    }

    fn with_turn_id(
        cfg: TurnRunnerConfig,
        session: Session,
        bus: EventBus,
        cancel: CancellationToken,
        turn_id: String,
    ) -> Self {
        let state = TurnState {
            session_id: session.session_id.clone(),
            turn_id: turn_id.clone(),
            active_skill: session.active_skill.clone(),
            ..TurnState::default()
        };
        Self {
            cfg,
            session,
            turn_id,
            seq: 0,
            bus,
            cancel,
            started_at: Utc::now(),
            state,
            tool_call_refs: Vec::new(),
            approval_refs: Vec::new(),
            assistant_text: String::new(),
            outcome: None,
            turn_error: None,
        }
    }

    /// Check a resume decision against the session's pending record.
    pub fn validate_decision(session: &Session, decision: &Decision) -> Result<(), EngineError> {
        let Some(pending) = session.pending.as_ref() else {
            return Err(EngineError::NoPendingApproval(session.session_id.clone()));
        };
        if decision.request_id != pending.request_id {
            return Err(EngineError::ApprovalMismatch("request id mismatch".into()));
        }
        if !decision.tool_call_id.is_empty()
            && decision.tool_call_id != pending.tool_call.tool_call_id
        {
            return Err(EngineError::ApprovalMismatch("tool call id mismatch".into()));
        }
        Ok(())
    }

    // ── Entry points (spawned as tasks) ─────────────────────────────────

    pub async fn run(mut self, message: String) {
        self.run_inner(message).await;
        self.finalize().await;
    }

    async fn run_inner(&mut self, message: String) {
        if self.cfg.emit_thinking {
            self.emit(EventBody::thinking("Analyzing request...")).await;
        }

        if let Err(e) = self.emit_plan_snapshot("").await {
            self.emit_error(&EngineError::StoreError(e.to_string())).await;
            return;
        }

        self.maybe_route_skill(&message).await;

        self.session.messages.push(Message::user(message.clone()));

        if self.cfg.auto_compress_threshold > 0
            && self.session.messages.len() >= self.cfg.auto_compress_threshold
        {
            let keep_turns = self.cfg.compress_keep_turns.max(1);
            info!(
                threshold = self.cfg.auto_compress_threshold,
                message_count = self.session.messages.len(),
                keep_turns,
                "auto-compressing session"
            );
            self.emit(EventBody::thinking(
                "🔄 Auto-compressing conversation history...",
            ))
            .await;
            let cfg = CompressConfig {
                keep_turns,
                ..CompressConfig::default()
            };
            if let Err(e) = compress_history(
                self.cfg.llm.as_ref(),
                &self.cfg.prompts,
                &mut self.session,
                cfg,
            )
            .await
            {
                warn!(error = %e, "auto-compression failed");
            }
        }

        if let Err(e) = self.save_session().await {
            self.emit_error(&EngineError::StoreError(e.to_string())).await;
            return;
        }

        match self.agent_loop(&message).await {
            Ok(LoopOutcome::Completed) => self.emit_done("completed").await,
            Ok(LoopOutcome::Suspended) => {}
            Err(e) => self.emit_loop_error(e).await,
        }
    }

    pub async fn resume(mut self, decision: Decision) {
        self.resume_inner(decision).await;
        self.finalize().await;
    }

    async fn resume_inner(&mut self, decision: Decision) {
        if let Err(e) = self.emit_plan_snapshot("").await {
            self.emit_error(&EngineError::StoreError(e.to_string())).await;
            return;
        }

        let Some(pending) = self.session.pending.clone() else {
            self.emit_error(&EngineError::NoPendingApproval(
                self.session.session_id.clone(),
            ))
            .await;
            return;
        };

        if decision.kind == DecisionKind::Reject {
            // Answer the model-proposed call in history so its tool call
            // does not dangle into the next turn.
            if self.has_open_tool_call(&pending.tool_call.tool_call_id) {
                self.session.messages.push(Message::tool(
                    &pending.tool_call.tool_call_id,
                    "ERROR: rejected by user",
                ));
            }
            self.session.pending = None;
            if let Err(e) = self.save_session().await {
                self.emit_error(&EngineError::StoreError(e.to_string())).await;
                return;
            }
            self.emit_done("rejected").await;
            return;
        }

        let args = match (decision.kind, decision.modified_args) {
            (DecisionKind::Modify, Some(modified)) => modified,
            _ => pending.tool_call.args.clone(),
        };
        let tool_name = pending.tool_call.tool_name.clone();
        let tool_call_id = pending.tool_call.tool_call_id.clone();
        let exec_args = self.prepare_exec_args(&tool_name, &args);

        // Rebuild the middleware-enriched state so allowed-tools are
        // enforced on the resumed call.
        if let Err(e) = self.refresh_state().await {
            self.emit_loop_error(e).await;
            return;
        }

        let Some(tool) = self.cfg.tools.get(&tool_name) else {
            self.emit_error(&EngineError::ToolNotFound(tool_name)).await;
            return;
        };

        let pctx = self.policy_context(ToolCallOrigin::Model);
        // Modified arguments re-validate; approval is NOT re-checked — the
        // user already decided, and re-classifying would loop forever on
        // tools that always require approval under `auto`.
        if let Err(e) = self.cfg.policy.validate(&pctx, tool.as_ref(), &exec_args) {
            let result = ToolResult::error(e.to_string());
            self.emit(EventBody::tool_result(&tool_call_id, &tool_name, result.clone()))
                .await;
            if self.has_open_tool_call(&tool_call_id) {
                self.session
                    .messages
                    .push(Message::tool(&tool_call_id, tool_message_content(&result)));
            }
            self.session.pending = None;
            let _ = self.save_session().await;
            self.emit_done("completed").await;
            return;
        }

        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.emit_done("canceled").await;
                return;
            }
            result = tool.execute(&exec_args) => match result {
                Ok(result) => result,
                Err(e) => ToolResult::error(e.to_string()),
            },
        };

        self.apply_engine_side_effects(&tool_name, &args, &result);

        self.emit(EventBody::tool_result(
            &tool_call_id,
            &tool_name,
            result.clone(),
        ))
        .await;

        self.session
            .messages
            .push(Message::tool(&tool_call_id, tool_message_content(&result)));
        self.session.pending = None;
        if let Err(e) = self.save_session().await {
            self.emit_error(&EngineError::StoreError(e.to_string())).await;
            return;
        }

        if tool_name == "write_todos" {
            if let Err(e) = self.emit_plan_snapshot(&tool_call_id).await {
                self.emit_error(&EngineError::StoreError(e.to_string())).await;
                return;
            }
        }

        if pending.stop_after {
            // Engine-originated proposal at the end of a turn: the model
            // already produced its terminal output.
            self.emit_done("completed").await;
            return;
        }

        let user_message = last_user_message(&self.session);
        match self.agent_loop(&user_message).await {
            Ok(LoopOutcome::Completed) => self.emit_done("completed").await,
            Ok(LoopOutcome::Suspended) => {}
            Err(e) => self.emit_loop_error(e).await,
        }
    }

    // ── Agent loop ──────────────────────────────────────────────────────

    async fn agent_loop(&mut self, user_message: &str) -> Result<LoopOutcome, LoopError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(LoopError::Canceled);
            }

            self.refresh_state().await?;
            let pctx = self.policy_context(ToolCallOrigin::Model);

            let visible = self.cfg.policy.filter(&pctx, self.cfg.tools.all());
            let tool_schemas: Vec<_> = visible.iter().map(|t| t.schema()).collect();

            let mut messages = self.state.messages.clone();
            if self.cfg.filter_history_tools {
                messages = filter_history_tool_messages(&messages);
            }
            let request = LlmRequest {
                messages: build_request_messages(
                    &self.state.system_prompt,
                    &self.session.summary,
                    &messages,
                ),
                tools: tool_schemas,
                max_tokens: None,
            };

            let mut stream = self
                .cfg
                .llm
                .stream(request)
                .await
                .map_err(|e| LoopError::Internal(format!("LLM stream error: {e}")))?;

            let mut assistant_content = String::new();
            let mut tool_calls = Vec::new();

            loop {
                let chunk = tokio::select! {
                    _ = self.cancel.cancelled() => return Err(LoopError::Canceled),
                    chunk = stream.next() => chunk,
                };
                let Some(chunk) = chunk else { break };
                let chunk =
                    chunk.map_err(|e| LoopError::Internal(format!("LLM recv error: {e}")))?;

                if !chunk.delta.is_empty() {
                    assistant_content.push_str(&chunk.delta);
                    self.emit(EventBody::delta(
                        chunk.delta,
                        volley_contract::DeltaSource::Text,
                    ))
                    .await;
                }
                if !chunk.tool_arg_delta.is_empty() {
                    self.emit(EventBody::delta(
                        chunk.tool_arg_delta,
                        volley_contract::DeltaSource::ToolArg,
                    ))
                    .await;
                }
                if let Some(call) = chunk.tool_call {
                    tool_calls.push(call);
                }
                if chunk.finish_reason.is_some() {
                    break;
                }
            }
            drop(stream);

            if tool_calls.is_empty() {
                if !assistant_content.is_empty() {
                    self.session
                        .messages
                        .push(Message::assistant(assistant_content.clone()));
                    self.save_session().await?;
                }
                self.assistant_text = assistant_content.clone();

                if let Some(outcome) =
                    self.maybe_autosave(user_message, &assistant_content).await?
                {
                    return Ok(outcome);
                }
                return Ok(LoopOutcome::Completed);
            }

            // The provider requires the assistant message carrying the tool
            // calls before any tool results follow.
            self.session.messages.push(Message::assistant_with_tool_calls(
                assistant_content.clone(),
                tool_calls.clone(),
            ));
            self.save_session().await?;

            for tc in tool_calls {
                let args: Args = if tc.args.trim().is_empty() {
                    Args::new()
                } else {
                    match serde_json::from_str(&tc.args) {
                        Ok(args) => args,
                        Err(e) => {
                            let result = ToolResult::error(format!(
                                "{}: invalid JSON args: {e}",
                                volley_contract::code::TOOL_ARGS_INVALID
                            ));
                            self.fail_tool_call(&tc.id, &tc.name, result).await?;
                            continue;
                        }
                    }
                };

                let Some(tool) = self.cfg.tools.get(&tc.name) else {
                    self.fail_tool_call(&tc.id, &tc.name, ToolResult::error("tool not found"))
                        .await?;
                    continue;
                };

                let exec_args = self.prepare_exec_args(&tc.name, &args);
                let need_approval = self.cfg.policy.need_approval(&pctx, tool.as_ref(), &exec_args);
                let preview = if need_approval {
                    tool.preview(&exec_args).await
                } else {
                    None
                };

                let payload = ToolCallPayload {
                    tool_call_id: tc.id.clone(),
                    tool_name: tc.name.clone(),
                    args: args.clone(),
                    preview: preview.clone(),
                    need_approval,
                };
                self.emit(EventBody::ToolCall {
                    tool_call: payload.clone(),
                })
                .await;

                if let Err(e) = self.cfg.policy.validate(&pctx, tool.as_ref(), &exec_args) {
                    self.fail_tool_call(&tc.id, &tc.name, ToolResult::error(e.to_string()))
                        .await?;
                    continue;
                }

                if need_approval {
                    let request_id = next_id("req");
                    self.emit(EventBody::Approval {
                        approval: ApprovalPayload {
                            request_id: request_id.clone(),
                            tool_call_id: tc.id.clone(),
                            tool_call: payload.clone(),
                            mode: self.cfg.approval_mode,
                        },
                    })
                    .await;

                    self.session.pending = Some(PendingApproval {
                        turn_id: self.turn_id.clone(),
                        request_id,
                        tool_call: payload,
                        preview,
                        created_at: Utc::now(),
                        stop_after: false,
                    });
                    self.save_session().await?;
                    return Ok(LoopOutcome::Suspended);
                }

                let result = tokio::select! {
                    _ = self.cancel.cancelled() => return Err(LoopError::Canceled),
                    result = tool.execute(&exec_args) => match result {
                        Ok(result) => result,
                        Err(e) => ToolResult::error(e.to_string()),
                    },
                };

                self.apply_engine_side_effects(&tc.name, &args, &result);

                self.emit(EventBody::tool_result(&tc.id, &tc.name, result.clone()))
                    .await;

                self.session
                    .messages
                    .push(Message::tool(&tc.id, tool_message_content(&result)));
                self.save_session().await?;

                if tc.name == "write_todos" {
                    if let Err(e) = self.emit_plan_snapshot(&tc.id).await {
                        warn!(error = %e, "plan snapshot after write_todos failed");
                    }
                }
            }
        }
    }

    // ── Auto-behaviours ─────────────────────────────────────────────────

    async fn maybe_autosave(
        &mut self,
        user_message: &str,
        assistant_content: &str,
    ) -> Result<Option<LoopOutcome>, LoopError> {
        let Some(index) = self.cfg.skill_index.clone() else {
            return Ok(None);
        };
        if self.session.active_skill.trim().is_empty() {
            return Ok(None);
        }
        let Some(skill) = index.load(&self.session.active_skill) else {
            return Ok(None);
        };
        let Some(proposal) = plan_autosave(
            &skill,
            &self.cfg.workspace_root,
            user_message,
            assistant_content,
        ) else {
            return Ok(None);
        };
        let outcome = self.propose_tool(proposal).await?;
        Ok(Some(outcome))
    }

    /// Run an engine-originated tool call through the normal policy,
    /// preview, approval, and result pipeline.
    async fn propose_tool(&mut self, proposal: AutosaveProposal) -> Result<LoopOutcome, LoopError> {
        let Some(tool) = self.cfg.tools.get(proposal.tool_name) else {
            return Ok(LoopOutcome::Completed);
        };

        let pctx = self.policy_context(ToolCallOrigin::System);
        let exec_args = self.prepare_exec_args(proposal.tool_name, &proposal.args);
        let tool_call_id = next_id("sys");

        let need_approval = self.cfg.policy.need_approval(&pctx, tool.as_ref(), &exec_args);
        let preview = if need_approval {
            tool.preview(&exec_args).await
        } else {
            None
        };

        let payload = ToolCallPayload {
            tool_call_id: tool_call_id.clone(),
            tool_name: proposal.tool_name.to_string(),
            args: proposal.args.clone(),
            preview: preview.clone(),
            need_approval,
        };
        self.emit(EventBody::ToolCall {
            tool_call: payload.clone(),
        })
        .await;

        if let Err(e) = self.cfg.policy.validate(&pctx, tool.as_ref(), &exec_args) {
            self.emit(EventBody::tool_result(
                &tool_call_id,
                proposal.tool_name,
                ToolResult::error(e.to_string()),
            ))
            .await;
            return Ok(LoopOutcome::Completed);
        }

        if need_approval {
            let request_id = next_id("req");
            self.emit(EventBody::Approval {
                approval: ApprovalPayload {
                    request_id: request_id.clone(),
                    tool_call_id: tool_call_id.clone(),
                    tool_call: payload.clone(),
                    mode: self.cfg.approval_mode,
                },
            })
            .await;
            self.session.pending = Some(PendingApproval {
                turn_id: self.turn_id.clone(),
                request_id,
                tool_call: payload,
                preview,
                created_at: Utc::now(),
                stop_after: proposal.stop_after,
            });
            self.save_session().await?;
            return Ok(LoopOutcome::Suspended);
        }

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Err(LoopError::Canceled),
            result = tool.execute(&exec_args) => match result {
                Ok(result) => result,
                Err(e) => ToolResult::error(e.to_string()),
            },
        };

        self.emit(EventBody::tool_result(
            &tool_call_id,
            proposal.tool_name,
            result.clone(),
        ))
        .await;

        self.session
            .messages
            .push(Message::tool(&tool_call_id, tool_message_content(&result)));
        self.save_session().await?;
        Ok(LoopOutcome::Completed)
    }

    async fn maybe_route_skill(&mut self, user_message: &str) {
        let Some(index) = self.cfg.skill_index.clone() else {
            return;
        };
        if !auto_skill_enabled(&self.session.metadata) {
            return;
        }

        // An unlock request can be combined with a task, so treat it as a
        // flag and keep routing within the same turn.
        let mut unlocked = false;
        if is_unlock_skill_message(user_message) {
            self.session
                .metadata
                .insert("skill_locked".into(), "false".into());
            self.session
                .metadata
                .insert("skill_source".into(), "none".into());
            self.session
                .metadata
                .insert("skill_last_reason".into(), "user_unlock".into());
            unlocked = true;
        }

        let skills = index.list();
        let plan_hint = self.read_plan_hint().await;

        // An explicit override always wins, even over a lock.
        if let Some(name) = parse_user_skill_override(&skills, user_message) {
            info!(skill = %name, "skill locked by user");
            self.session.active_skill = name;
            self.session
                .metadata
                .insert("skill_locked".into(), "true".into());
            self.session
                .metadata
                .insert("skill_source".into(), "user".into());
            self.session
                .metadata
                .insert("skill_last_reason".into(), "explicit_user_override".into());
            return;
        }

        let locked = self
            .session
            .metadata
            .get("skill_locked")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        if locked && !unlocked {
            return;
        }

        let Some(decision) = route_skill(
            &skills,
            &RouteInput {
                user_message: user_message.to_string(),
                plan_hint,
            },
        ) else {
            return;
        };

        if decision.source == RouteSource::Auto
            && !decision.skill.is_empty()
            && decision.skill != self.session.active_skill
        {
            info!(
                from = %self.session.active_skill,
                to = %decision.skill,
                score = decision.score,
                "auto-selected skill"
            );
            self.session.active_skill = decision.skill;
            self.session
                .metadata
                .insert("skill_source".into(), "auto".into());
            self.session
                .metadata
                .insert("skill_last_reason".into(), decision.reason);
            self.session
                .metadata
                .insert("skill_locked".into(), "false".into());
        }
    }

    async fn read_plan_hint(&self) -> String {
        let plan_id = plan_id_for(&self.session.session_id);
        match self.cfg.plan_store.get(&plan_id).await {
            Ok(plan) => plan_hint_from_plan(&plan),
            Err(_) => String::new(),
        }
    }

    // ── State & emission plumbing ───────────────────────────────────────

    /// Rebuild the per-turn state from the session and run the middleware
    /// chain over it.
    async fn refresh_state(&mut self) -> Result<(), LoopError> {
        self.state.active_skill = self.session.active_skill.clone();
        self.state.messages = self.session.messages.clone();
        self.state.system_prompt.clear();
        self.state.metadata.clear();
        if !self.session.summary.is_empty() {
            self.state.metadata.insert(
                "session_summary".into(),
                serde_json::Value::String(self.session.summary.clone()),
            );
        }

        let chain = Arc::clone(&self.cfg.middlewares);
        chain
            .before_turn(&mut self.state)
            .await
            .map_err(|e| LoopError::Internal(e.to_string()))
    }

    fn policy_context(&self, origin: ToolCallOrigin) -> PolicyContext {
        PolicyContext {
            session_id: self.session.session_id.clone(),
            turn_id: self.turn_id.clone(),
            approval_mode: self.cfg.approval_mode,
            allowed_tools: self.state.allowed_tools(),
            origin,
            workspace_root: self.cfg.workspace_root.clone(),
        }
    }

    /// Engine-injected arguments that must never be model-influenced. The
    /// advertised (event/pending) arguments stay untouched.
    fn prepare_exec_args(&self, tool_name: &str, args: &Args) -> Args {
        let mut out = args.clone();
        match tool_name {
            "read_todos" | "write_todos" => {
                out.insert(
                    "session_id".into(),
                    serde_json::Value::String(self.session.session_id.clone()),
                );
            }
            "run_skill_script" => {
                out.insert(
                    "_active_skill".into(),
                    serde_json::Value::String(self.session.active_skill.clone()),
                );
            }
            _ => {}
        }
        out
    }

    /// Report a failed call and answer it in history, so the assistant's
    /// tool call never dangles into later requests.
    async fn fail_tool_call(
        &mut self,
        call_id: &str,
        tool_name: &str,
        result: ToolResult,
    ) -> Result<(), LoopError> {
        self.emit(EventBody::tool_result(call_id, tool_name, result.clone()))
            .await;
        self.session
            .messages
            .push(Message::tool(call_id, tool_message_content(&result)));
        self.save_session().await?;
        Ok(())
    }

    /// Whether an assistant message references this call with no tool
    /// message answering it yet. System-originated proposals have no
    /// assistant-side call and return false.
    fn has_open_tool_call(&self, call_id: &str) -> bool {
        let called = self.session.messages.iter().any(|m| {
            m.role == Role::Assistant && m.tool_calls.iter().any(|c| c.id == call_id)
        });
        let answered = self
            .session
            .messages
            .iter()
            .any(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call_id));
        called && !answered
    }

    fn apply_engine_side_effects(&mut self, tool_name: &str, args: &Args, result: &ToolResult) {
        if tool_name == "activate_skill" && result.is_success() {
            if let Some(name) = str_arg(args, "name") {
                if !name.is_empty() {
                    self.session.active_skill = name.to_string();
                }
            }
        }
    }

    async fn emit(&mut self, body: EventBody) {
        self.seq += 1;
        let event = Event {
            version: PROTOCOL_VERSION,
            session_id: self.session.session_id.clone(),
            turn_id: self.turn_id.clone(),
            seq: self.seq,
            ts: Utc::now(),
            body,
            display: None,
        };

        // Track refs for the after-turn summary.
        match &event.body {
            EventBody::ToolCall { tool_call } => self.tool_call_refs.push(ToolCallRef {
                tool_call_id: tool_call.tool_call_id.clone(),
                tool_name: tool_call.tool_name.clone(),
            }),
            EventBody::Approval { approval } => self.approval_refs.push(ApprovalRef {
                request_id: approval.request_id.clone(),
                tool_call_id: approval.tool_call_id.clone(),
            }),
            _ => {}
        }

        if !self.bus.send(event.clone()).await {
            // Consumer walked away; the audit log still gets everything.
            debug!(seq = event.seq, "event dropped, stream closed");
        }

        if let Some(log) = &self.cfg.event_log {
            if let Err(e) = log.append(&event).await {
                warn!(error = %e, "event log append failed");
            }
        }

        let chain = Arc::clone(&self.cfg.middlewares);
        chain.on_event(&self.state, &event).await;
    }

    async fn emit_plan_snapshot(&mut self, tool_call_id: &str) -> Result<(), StoreError> {
        let plan_id = plan_id_for(&self.session.session_id);
        let mut plan = match self.cfg.plan_store.get(&plan_id).await {
            Ok(plan) => plan,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if !tool_call_id.is_empty() {
            plan.tool_call_id = tool_call_id.to_string();
        }
        self.emit(EventBody::Plan { plan }).await;
        Ok(())
    }

    async fn emit_done(&mut self, reason: &str) {
        let (reason, outcome) = match reason {
            "canceled" => (
                volley_contract::DoneReason::Canceled,
                TurnOutcome::Canceled,
            ),
            "error" => (volley_contract::DoneReason::Error, TurnOutcome::Error),
            "rejected" => (
                volley_contract::DoneReason::Rejected,
                TurnOutcome::Completed,
            ),
            _ => (
                volley_contract::DoneReason::Completed,
                TurnOutcome::Completed,
            ),
        };
        self.outcome = Some(outcome);
        self.emit(EventBody::done(reason)).await;
    }

    async fn emit_error(&mut self, err: &EngineError) {
        self.turn_error = Some(err.payload());
        self.emit(EventBody::error(err.code(), err.to_string())).await;
        self.emit_done("error").await;
    }

    async fn emit_loop_error(&mut self, err: LoopError) {
        match err {
            LoopError::Canceled => self.emit_done("canceled").await,
            LoopError::Store(m) => self.emit_error(&EngineError::StoreError(m)).await,
            LoopError::Internal(m) => {
                self.emit_error(&EngineError::ToolExecuteFailed(m)).await
            }
        }
    }

    /// Build the immutable turn summary and run after-turn hooks in reverse
    /// order. Suspended turns carry no outcome and skip finalization.
    async fn finalize(&mut self) {
        let Some(outcome) = self.outcome.take() else {
            return;
        };
        let summary = TurnSummary {
            session_id: self.session.session_id.clone(),
            turn_id: self.turn_id.clone(),
            outcome,
            assistant_text: self.assistant_text.clone(),
            tool_calls: self.tool_call_refs.clone(),
            approvals: self.approval_refs.clone(),
            error: self.turn_error.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        };
        let chain = Arc::clone(&self.cfg.middlewares);
        chain.after_turn(&self.state, &summary).await;
    }

    async fn save_session(&mut self) -> Result<(), StoreError> {
        self.session.updated_at = Utc::now();
        self.cfg
            .session_store
            .put(&self.session.session_id, &self.session)
            .await
    }
}

/// The error-aware tool message the model sees for a result.
fn tool_message_content(result: &ToolResult) -> String {
    if result.is_error() {
        format!("ERROR: {}", result.error)
    } else {
        result.content.clone()
    }
}

fn last_user_message(session: &Session) -> String {
    session
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

fn auto_skill_enabled(metadata: &std::collections::BTreeMap<String, String>) -> bool {
    let disabled = |v: &str| {
        let v = v.trim().to_lowercase();
        v == "0" || v == "false" || v == "off"
    };
    if let Ok(v) = std::env::var("AUTO_SKILL") {
        if !v.trim().is_empty() && disabled(&v) {
            return false;
        }
    }
    match metadata.get("auto_skill") {
        Some(v) => !disabled(v),
        None => true,
    }
}

/// Compose the final request: optional system message first, then history.
/// The compressed-history summary is a free-text block prepended to the
/// system prompt.
fn build_request_messages(
    system_prompt: &str,
    summary: &str,
    messages: &[Message],
) -> Vec<Message> {
    let mut system = String::new();
    if !summary.is_empty() {
        system.push_str("## Context from earlier conversation\n");
        system.push_str(summary);
        system.push_str("\n\n");
    }
    system.push_str(system_prompt.trim());
    let system = system.trim();

    if system.is_empty() {
        return messages.to_vec();
    }
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(Message::system(system));
    out.extend_from_slice(messages);
    out
}

/// Drop historical tool traffic: keep user messages and assistant text from
/// prior turns (assistant tool calls collapse to their text, tool messages
/// drop), and keep everything from the latest user message onward intact.
fn filter_history_tool_messages(messages: &[Message]) -> Vec<Message> {
    if messages.is_empty() {
        return Vec::new();
    }

    let Some(last_user_idx) = messages.iter().rposition(|m| m.role == Role::User) else {
        return messages.to_vec();
    };

    let mut out = Vec::with_capacity(messages.len());
    for m in &messages[..last_user_idx] {
        match m.role {
            Role::User | Role::System => out.push(m.clone()),
            Role::Assistant => {
                if m.tool_calls.is_empty() {
                    out.push(m.clone());
                } else if !m.content.is_empty() {
                    out.push(Message::assistant(m.content.clone()));
                }
            }
            Role::Tool => {}
        }
    }
    out.extend_from_slice(&messages[last_user_idx..]);
    out
}
