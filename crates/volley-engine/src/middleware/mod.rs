//! Turn middleware: ordered pre-turn state mutation, best-effort event
//! observation, and post-turn summaries.
//!
//! `before_turn` runs in registration order once per agent-loop iteration and
//! must be deterministic over the session; `on_event` observes every emitted
//! event but can never fail the turn; `after_turn` runs in reverse order on
//! terminal turns only.

mod builtin;

pub use builtin::{BasePromptMiddleware, MemoryMiddleware, PlanningMiddleware, SkillsMiddleware};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;
use volley_contract::{Event, TurnState, TurnSummary};

#[derive(Debug, Error)]
#[error("middleware {name}: {message}")]
pub struct MiddlewareError {
    pub name: String,
    pub message: String,
}

impl MiddlewareError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Mutate the per-turn state (typically: layer onto `system_prompt`,
    /// publish `allowed_tools` metadata).
    async fn before_turn(&self, _state: &mut TurnState) -> Result<(), MiddlewareError> {
        Ok(())
    }

    /// Observe an emitted event. Errors are logged by the chain, never
    /// propagated.
    async fn on_event(&self, _state: &TurnState, _event: &Event) -> Result<(), MiddlewareError> {
        Ok(())
    }

    /// Observe the finished turn.
    async fn after_turn(
        &self,
        _state: &TurnState,
        _summary: &TurnSummary,
    ) -> Result<(), MiddlewareError> {
        Ok(())
    }
}

/// Registration-ordered middleware chain.
#[derive(Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    #[must_use]
    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run every `before_turn` in order; the first error aborts.
    pub async fn before_turn(&self, state: &mut TurnState) -> Result<(), MiddlewareError> {
        for mw in &self.middlewares {
            mw.before_turn(state).await?;
        }
        Ok(())
    }

    /// Deliver an event to every middleware, best-effort.
    pub async fn on_event(&self, state: &TurnState, event: &Event) {
        for mw in &self.middlewares {
            if let Err(e) = mw.on_event(state, event).await {
                warn!(middleware = mw.name(), error = %e, "event hook failed");
            }
        }
    }

    /// Run every `after_turn` in reverse registration order, best-effort.
    pub async fn after_turn(&self, state: &TurnState, summary: &TurnSummary) {
        for mw in self.middlewares.iter().rev() {
            if let Err(e) = mw.after_turn(state, summary).await {
                warn!(middleware = mw.name(), error = %e, "after-turn hook failed");
            }
        }
    }
}
