//! The session engine: lifecycle, the one-active-turn-per-session guard,
//! and the `Send`/`Resume`/`CompressSession` entry points.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use volley_contract::{
    Decision, EngineError, Session, SessionInfo, StartOptions,
};

use crate::bus::{EventBus, EventStream, DEFAULT_EVENT_BUFFER};
use crate::compress::{compress_history, CompressConfig, CompressResult};
use crate::llm::Llm;
use crate::middleware::MiddlewareChain;
use crate::policy::DefaultPolicy;
use crate::prompts::PromptLoader;
use crate::registry::ToolRegistry;
use crate::skills::SkillIndex;
use crate::store::{
    EventLog, FilePlanStore, FileSessionStore, JsonlEventLog, PlanStore, SessionStore,
};
use crate::turn::{next_id, TurnRunner, TurnRunnerConfig};

/// How often and how long `Resume` re-reads a session whose pending record
/// is not visible yet (write-visibility lag after a suspend).
const RESUME_RELOAD_ATTEMPTS: usize = 3;
const RESUME_RELOAD_PAUSE: Duration = Duration::from_millis(100);

pub struct EngineConfig {
    pub llm: Arc<dyn Llm>,
    pub tools: Arc<ToolRegistry>,
    pub policy: Arc<DefaultPolicy>,
    pub middlewares: Arc<MiddlewareChain>,
    pub skill_index: Option<Arc<dyn SkillIndex>>,
    pub workspace_root: PathBuf,

    /// Optional stores; file-backed stores under the workspace root are
    /// created when omitted.
    pub session_store: Option<Arc<dyn SessionStore>>,
    pub plan_store: Option<Arc<dyn PlanStore>>,
    pub event_log: Option<Arc<dyn EventLog>>,
    pub prompts: Option<Arc<PromptLoader>>,

    pub auto_compress_threshold: usize,
    pub compress_keep_turns: usize,
    pub filter_history_tools: bool,
}

/// The engine owns the stores and serializes turns per session. Sessions
/// are independent: turns on different sessions run in parallel.
pub struct Engine {
    llm: Arc<dyn Llm>,
    tools: Arc<ToolRegistry>,
    policy: Arc<DefaultPolicy>,
    middlewares: Arc<MiddlewareChain>,
    skill_index: Option<Arc<dyn SkillIndex>>,
    workspace_root: PathBuf,
    session_store: Arc<dyn SessionStore>,
    plan_store: Arc<dyn PlanStore>,
    event_log: Arc<dyn EventLog>,
    prompts: Arc<PromptLoader>,
    auto_compress_threshold: usize,
    compress_keep_turns: usize,
    filter_history_tools: bool,

    /// Sessions with a live turn. Guard for the at-most-one-turn invariant.
    active_turns: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Self {
        let session_store = cfg
            .session_store
            .unwrap_or_else(|| Arc::new(FileSessionStore::sessions(&cfg.workspace_root)));
        let plan_store = cfg
            .plan_store
            .unwrap_or_else(|| Arc::new(FilePlanStore::plans(&cfg.workspace_root)));
        let event_log = cfg
            .event_log
            .unwrap_or_else(|| Arc::new(JsonlEventLog::new(&cfg.workspace_root)));
        let prompts = cfg
            .prompts
            .unwrap_or_else(|| Arc::new(PromptLoader::new(&cfg.workspace_root)));

        Self {
            llm: cfg.llm,
            tools: cfg.tools,
            policy: cfg.policy,
            middlewares: cfg.middlewares,
            skill_index: cfg.skill_index,
            workspace_root: cfg.workspace_root,
            session_store,
            plan_store,
            event_log,
            prompts,
            auto_compress_threshold: cfg.auto_compress_threshold,
            compress_keep_turns: cfg.compress_keep_turns,
            filter_history_tools: cfg.filter_history_tools,
            active_turns: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    // ── Session lifecycle ───────────────────────────────────────────────

    pub async fn start_session(&self, opts: StartOptions) -> Result<String, EngineError> {
        let session_id = next_id("session");

        let mut session = Session::new(&session_id);
        session.active_skill = opts.active_skill;
        if let Some(mode) = opts.approval_mode {
            session
                .metadata
                .insert("approval_mode".into(), mode.as_str().into());
        }
        if opts.emit_thinking {
            session
                .metadata
                .insert("emit_thinking".into(), "true".into());
        }

        self.session_store
            .put(&session_id, &session)
            .await
            .map_err(|e| EngineError::StoreError(e.to_string()))?;
        Ok(session_id)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<SessionInfo, EngineError> {
        let session = self.load_session(session_id).await?;
        Ok(SessionInfo {
            session_id: session.session_id,
            created_at: session.created_at,
            updated_at: session.updated_at,
            message_count: session.messages.len(),
            active_skill: session.active_skill,
        })
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>, EngineError> {
        let ids = self
            .session_store
            .list()
            .await
            .map_err(|e| EngineError::StoreError(e.to_string()))?;

        let mut infos = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_session(&id).await {
                Ok(info) => infos.push(info),
                // Unreadable records are skipped, not fatal.
                Err(e) => debug!(session = %id, error = %e, "skipping unreadable session"),
            }
        }
        Ok(infos)
    }

    // ── Turn execution ──────────────────────────────────────────────────

    /// Start a turn with a user message. Refuses while another turn is
    /// active or an approval is pending.
    pub async fn send(
        &self,
        session_id: &str,
        message: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<EventStream, EngineError> {
        {
            let mut active = self.active_turns.lock().expect("active turns lock");
            if active.contains_key(session_id) {
                return Err(EngineError::TurnInProgress(session_id.to_string()));
            }
            // Claim the slot before any await; released by the stream's
            // cleanup hook.
            active.insert(session_id.to_string(), cancel.clone());
        }

        let session = match self.load_session(session_id).await {
            Ok(session) => session,
            Err(e) => {
                self.release_slot(session_id);
                return Err(e);
            }
        };

        if session.pending.is_some() {
            self.release_slot(session_id);
            return Err(EngineError::TurnInProgress(format!(
                "{session_id}: pending approval exists"
            )));
        }

        let (bus, stream) = EventBus::channel(DEFAULT_EVENT_BUFFER);
        let runner = TurnRunner::for_run(self.runner_config(&session), session, bus, cancel);
        tokio::spawn(runner.run(message.into()));

        Ok(self.wrap_stream(session_id, stream))
    }

    /// Feed a decision into the suspended turn recorded by the session's
    /// pending approval.
    pub async fn resume(
        &self,
        session_id: &str,
        decision: Decision,
        cancel: CancellationToken,
    ) -> Result<EventStream, EngineError> {
        {
            let mut active = self.active_turns.lock().expect("active turns lock");
            if active.contains_key(session_id) {
                return Err(EngineError::TurnInProgress(session_id.to_string()));
            }
            active.insert(session_id.to_string(), cancel.clone());
        }

        let loaded = self.load_session_with_pending_retry(session_id).await;
        let session = match loaded {
            Ok(session) => session,
            Err(e) => {
                self.release_slot(session_id);
                return Err(e);
            }
        };

        if let Err(e) = TurnRunner::validate_decision(&session, &decision) {
            self.release_slot(session_id);
            return Err(e);
        }

        let (bus, stream) = EventBus::channel(DEFAULT_EVENT_BUFFER);
        let runner = TurnRunner::for_resume(self.runner_config(&session), session, bus, cancel);
        tokio::spawn(runner.resume(decision));

        Ok(self.wrap_stream(session_id, stream))
    }

    /// Explicit history compression (operator command). Refuses while a
    /// turn is active.
    pub async fn compress_session(
        &self,
        session_id: &str,
        keep_turns: usize,
    ) -> Result<CompressResult, EngineError> {
        {
            let active = self.active_turns.lock().expect("active turns lock");
            if active.contains_key(session_id) {
                return Err(EngineError::TurnInProgress(session_id.to_string()));
            }
        }

        let mut session = self.load_session(session_id).await?;
        let old_count = session.messages.len();

        compress_history(
            self.llm.as_ref(),
            &self.prompts,
            &mut session,
            CompressConfig {
                keep_turns: keep_turns.max(1),
                max_messages: 20,
                force: true,
            },
        )
        .await
        .map_err(|e| EngineError::ToolExecuteFailed(format!("summary generation failed: {e}")))?;

        session.updated_at = Utc::now();
        self.session_store
            .put(session_id, &session)
            .await
            .map_err(|e| EngineError::StoreError(e.to_string()))?;

        Ok(CompressResult {
            messages_removed: old_count - session.messages.len(),
            messages_kept: session.messages.len(),
            summary_length: session.summary.len(),
            summary: session.summary,
        })
    }

    // ── Internals ───────────────────────────────────────────────────────

    async fn load_session(&self, session_id: &str) -> Result<Session, EngineError> {
        self.session_store.get(session_id).await.map_err(|e| {
            if e.is_not_found() {
                EngineError::InvalidSession(session_id.to_string())
            } else {
                EngineError::StoreError(e.to_string())
            }
        })
    }

    /// Reload until the pending record is visible, shielding callers from
    /// the small window between the approval event and the session write.
    async fn load_session_with_pending_retry(
        &self,
        session_id: &str,
    ) -> Result<Session, EngineError> {
        let mut session = self.load_session(session_id).await?;
        for _ in 1..RESUME_RELOAD_ATTEMPTS {
            if session.pending.is_some() {
                break;
            }
            tokio::time::sleep(RESUME_RELOAD_PAUSE).await;
            session = self.load_session(session_id).await?;
        }
        Ok(session)
    }

    fn runner_config(&self, session: &Session) -> TurnRunnerConfig {
        TurnRunnerConfig {
            llm: Arc::clone(&self.llm),
            tools: Arc::clone(&self.tools),
            policy: Arc::clone(&self.policy),
            session_store: Arc::clone(&self.session_store),
            plan_store: Arc::clone(&self.plan_store),
            event_log: Some(Arc::clone(&self.event_log)),
            middlewares: Arc::clone(&self.middlewares),
            skill_index: self.skill_index.clone(),
            prompts: Arc::clone(&self.prompts),
            workspace_root: self.workspace_root.clone(),
            approval_mode: session.approval_mode(),
            emit_thinking: session.emit_thinking(),
            auto_compress_threshold: self.auto_compress_threshold,
            compress_keep_turns: self.compress_keep_turns,
            filter_history_tools: self.filter_history_tools,
        }
    }

    fn wrap_stream(&self, session_id: &str, stream: EventStream) -> EventStream {
        let active = Arc::clone(&self.active_turns);
        let session_id = session_id.to_string();
        stream.with_cleanup(move || {
            active
                .lock()
                .expect("active turns lock")
                .remove(&session_id);
        })
    }

    fn release_slot(&self, session_id: &str) {
        self.active_turns
            .lock()
            .expect("active turns lock")
            .remove(session_id);
    }
}
