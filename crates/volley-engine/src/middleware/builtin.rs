//! Built-in middlewares: base prompt seeding, skill content injection,
//! memory injection, and plan-progress injection.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use volley_contract::{plan_id_for, MemorySource, PlanStatus, TurnState};

use super::{Middleware, MiddlewareError};
use crate::memory::MemoryStore;
use crate::skills::SkillIndex;
use crate::store::PlanStore;

/// Seeds the system prompt before anything else layers on.
pub struct BasePromptMiddleware {
    prompt: String,
}

impl BasePromptMiddleware {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl Middleware for BasePromptMiddleware {
    fn name(&self) -> &str {
        "base_prompt"
    }

    async fn before_turn(&self, state: &mut TurnState) -> Result<(), MiddlewareError> {
        if self.prompt.is_empty() {
            return Ok(());
        }
        if state.system_prompt.is_empty() {
            state.system_prompt = self.prompt.clone();
        } else {
            state.system_prompt = format!("{}\n\n{}", self.prompt, state.system_prompt);
        }
        Ok(())
    }
}

/// Injects the active skill's content and publishes its allowed-tools list.
pub struct SkillsMiddleware {
    index: Arc<dyn SkillIndex>,
}

impl SkillsMiddleware {
    pub fn new(index: Arc<dyn SkillIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Middleware for SkillsMiddleware {
    fn name(&self) -> &str {
        "skills"
    }

    async fn before_turn(&self, state: &mut TurnState) -> Result<(), MiddlewareError> {
        if state.active_skill.is_empty() {
            return Ok(());
        }
        let Some(skill) = self.index.load(&state.active_skill) else {
            // Unknown skill: skip injection rather than failing the turn.
            return Ok(());
        };

        state.system_prompt.push_str(&format!(
            "\n--- BEGIN SKILL: {} ---\n{}\n--- END SKILL ---\n",
            skill.meta.name, skill.content
        ));
        state.system_prompt.push_str(
            "\n--- SKILL EXECUTION RULES ---\n\
             - Follow the active skill's workflow exactly.\n\
             - If the workflow says to create/update/save files, you MUST use tools \
             (e.g. write_file/edit_file/run_skill_script). Do not just describe what you would do.\n\
             --- END SKILL EXECUTION RULES ---\n",
        );

        if !skill.meta.allowed_tools.is_empty() {
            state
                .metadata
                .insert("allowed_tools".into(), json!(skill.meta.allowed_tools));
        }
        Ok(())
    }
}

/// Injects stored memory entries, read-only.
pub struct MemoryMiddleware {
    store: Arc<dyn MemoryStore>,
    max_entries: usize,
}

impl MemoryMiddleware {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            max_entries: 20,
        }
    }
}

#[async_trait]
impl Middleware for MemoryMiddleware {
    fn name(&self) -> &str {
        "memory"
    }

    async fn before_turn(&self, state: &mut TurnState) -> Result<(), MiddlewareError> {
        let mut lines = Vec::new();
        for source in [MemorySource::Project, MemorySource::User] {
            let entries = self.store.list(source).await.unwrap_or_default();
            for entry in entries {
                if entry.content.is_empty() {
                    continue;
                }
                let tag = match source {
                    MemorySource::Project => "project",
                    MemorySource::User => "user",
                };
                lines.push(format!(
                    "- [{}/{}] {}",
                    tag,
                    entry.id,
                    truncate(&entry.content, 200)
                ));
            }
        }
        if lines.is_empty() {
            return Ok(());
        }
        lines.truncate(self.max_entries);

        state.system_prompt.push_str(&format!(
            "\n--- MEMORY ---\n{}\n--- END MEMORY ---\n",
            lines.join("\n")
        ));
        Ok(())
    }
}

/// Injects a one-line plan progress summary.
pub struct PlanningMiddleware {
    plans: Arc<dyn PlanStore>,
}

impl PlanningMiddleware {
    pub fn new(plans: Arc<dyn PlanStore>) -> Self {
        Self { plans }
    }
}

#[async_trait]
impl Middleware for PlanningMiddleware {
    fn name(&self) -> &str {
        "planning"
    }

    async fn before_turn(&self, state: &mut TurnState) -> Result<(), MiddlewareError> {
        let plan_id = plan_id_for(&state.session_id);
        let Ok(plan) = self.plans.get(&plan_id).await else {
            return Ok(());
        };
        if plan.items.is_empty() {
            return Ok(());
        }

        let total = plan.items.len();
        let done = plan
            .items
            .iter()
            .filter(|i| i.status == PlanStatus::Done)
            .count();
        let running = plan
            .items
            .iter()
            .filter(|i| i.status == PlanStatus::Running)
            .count();

        state.system_prompt.push_str(&format!(
            "\n--- PLAN PROGRESS ---\nTotal: {total} | Done: {done} | Running: {running}\n--- END PLAN ---\n",
        ));
        Ok(())
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::InMemorySkillIndex;
    use crate::store::FilePlanStore;
    use tempfile::TempDir;
    use volley_contract::{PlanItem, PlanSnapshot, Skill, SkillMeta};

    fn state_for(session: &str) -> TurnState {
        TurnState {
            session_id: session.into(),
            turn_id: "t1".into(),
            ..TurnState::default()
        }
    }

    #[tokio::test]
    async fn base_prompt_prepends() {
        let mw = BasePromptMiddleware::new("You are the runtime.");
        let mut state = state_for("s1");
        state.system_prompt = "skill stuff".into();
        mw.before_turn(&mut state).await.unwrap();
        assert!(state.system_prompt.starts_with("You are the runtime."));
        assert!(state.system_prompt.ends_with("skill stuff"));
    }

    #[tokio::test]
    async fn skills_middleware_injects_content_and_allowed_tools() {
        let index = Arc::new(InMemorySkillIndex::with_skills([Skill::new(
            SkillMeta::new("chapter-write", "write chapters")
                .with_allowed_tools(["write_file".to_string()]),
            "Always outline first.",
        )]));
        let mw = SkillsMiddleware::new(index);

        let mut state = state_for("s1");
        state.active_skill = "chapter-write".into();
        mw.before_turn(&mut state).await.unwrap();

        assert!(state.system_prompt.contains("BEGIN SKILL: chapter-write"));
        assert!(state.system_prompt.contains("Always outline first."));
        assert_eq!(state.allowed_tools(), vec!["write_file"]);

        // No active skill: untouched.
        let mut blank = state_for("s1");
        SkillsMiddleware::new(Arc::new(InMemorySkillIndex::new()))
            .before_turn(&mut blank)
            .await
            .unwrap();
        assert!(blank.system_prompt.is_empty());
    }

    #[tokio::test]
    async fn planning_middleware_summarizes_progress() {
        let ws = TempDir::new().unwrap();
        let plans = Arc::new(FilePlanStore::plans(ws.path()));
        plans
            .put(
                "plan_s1",
                &PlanSnapshot {
                    plan_id: "plan_s1".into(),
                    items: vec![
                        PlanItem {
                            id: 1,
                            text: "a".into(),
                            status: PlanStatus::Done,
                        },
                        PlanItem {
                            id: 2,
                            text: "b".into(),
                            status: PlanStatus::Running,
                        },
                        PlanItem {
                            id: 3,
                            text: "c".into(),
                            status: PlanStatus::Pending,
                        },
                    ],
                    tool_call_id: String::new(),
                },
            )
            .await
            .unwrap();

        let mw = PlanningMiddleware::new(plans);
        let mut state = state_for("s1");
        mw.before_turn(&mut state).await.unwrap();
        assert!(state.system_prompt.contains("Total: 3 | Done: 1 | Running: 1"));
    }
}
