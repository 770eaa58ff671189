//! System tools: skill discovery/activation, plan reads and writes, and
//! memory access. These bypass skill allowed-tools restrictions but are
//! still governed by approval classification and validation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use volley_contract::{
    plan_id_for, Args, MemoryEntry, MemoryKind, MemorySource, PlanItem, PlanSnapshot, PlanStatus,
    RiskLevel, ToolResult, ToolSchema,
};

use crate::memory::MemoryStore;
use crate::registry::{int_arg, object_schema, str_arg, Tool, ToolError, ToolRegistry};
use crate::skills::SkillIndex;
use crate::store::PlanStore;

/// Register the full system tool set against one registry.
pub fn register_system_tools(
    registry: &ToolRegistry,
    skills: Arc<dyn SkillIndex>,
    plans: Arc<dyn PlanStore>,
    memory: Arc<dyn MemoryStore>,
) -> Result<(), crate::registry::RegistryError> {
    registry.register(Arc::new(ListSkillsTool {
        index: Arc::clone(&skills),
    }))?;
    registry.register(Arc::new(ReadSkillTool {
        index: Arc::clone(&skills),
    }))?;
    registry.register(Arc::new(ActivateSkillTool { index: skills }))?;
    registry.register(Arc::new(ReadTodosTool {
        plans: Arc::clone(&plans),
    }))?;
    registry.register(Arc::new(WriteTodosTool { plans }))?;
    registry.register(Arc::new(ReadMemoryTool {
        memory: Arc::clone(&memory),
    }))?;
    registry.register(Arc::new(UpdateMemoryTool { memory }))?;
    Ok(())
}

fn json_result(data: Value) -> ToolResult {
    let content = serde_json::to_string_pretty(&data).unwrap_or_default();
    ToolResult::success_with_data(content, data)
}

// ── Skills ──────────────────────────────────────────────────────────────

pub struct ListSkillsTool {
    index: Arc<dyn SkillIndex>,
}

#[async_trait]
impl Tool for ListSkillsTool {
    fn name(&self) -> &str {
        "list_skills"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "list_skills".into(),
            description: "List all available skills".into(),
            parameters: object_schema(&[]),
        }
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::None
    }

    async fn execute(&self, _args: &Args) -> Result<ToolResult, ToolError> {
        Ok(json_result(json!({ "skills": self.index.list() })))
    }
}

pub struct ReadSkillTool {
    index: Arc<dyn SkillIndex>,
}

#[async_trait]
impl Tool for ReadSkillTool {
    fn name(&self) -> &str {
        "read_skill"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "read_skill".into(),
            description: "Read skill content by name".into(),
            parameters: object_schema(&[
                ("name", "string", "Skill name", true),
                (
                    "section",
                    "string",
                    "Which part to return: all/frontmatter/content/scripts/references/assets",
                    false,
                ),
            ]),
        }
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::None
    }

    async fn execute(&self, args: &Args) -> Result<ToolResult, ToolError> {
        let Some(name) = str_arg(args, "name").filter(|n| !n.is_empty()) else {
            return Ok(ToolResult::error("name argument required"));
        };
        let Some(skill) = self.index.load(name) else {
            return Ok(ToolResult::error(format!("skill not found: {name}")));
        };

        let data = match str_arg(args, "section").unwrap_or("all") {
            "frontmatter" => json!({ "skill": skill.meta }),
            "content" => json!({ "content": skill.content }),
            "scripts" => json!({ "scripts": skill.scripts }),
            "references" => json!({ "references": skill.references }),
            "assets" => json!({ "assets": skill.assets }),
            _ => json!({ "skill": skill }),
        };
        Ok(json_result(data))
    }
}

/// Activation itself happens engine-side (the runner updates the session's
/// active skill on success); the tool verifies and reports.
pub struct ActivateSkillTool {
    index: Arc<dyn SkillIndex>,
}

#[async_trait]
impl Tool for ActivateSkillTool {
    fn name(&self) -> &str {
        "activate_skill"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "activate_skill".into(),
            description: "Activate a skill for the current session".into(),
            parameters: object_schema(&[("name", "string", "Skill name", true)]),
        }
    }

    async fn execute(&self, args: &Args) -> Result<ToolResult, ToolError> {
        let Some(name) = str_arg(args, "name").filter(|n| !n.is_empty()) else {
            return Ok(ToolResult::error("name argument required"));
        };
        let Some(meta) = self.index.get(name) else {
            return Ok(ToolResult::error(format!("skill not found: {name}")));
        };
        Ok(json_result(json!({ "active": meta })))
    }
}

// ── Plans ───────────────────────────────────────────────────────────────

fn resolve_plan_id(args: &Args) -> Result<String, ToolResult> {
    if let Some(id) = str_arg(args, "plan_id").filter(|s| !s.is_empty()) {
        return Ok(id.to_string());
    }
    match str_arg(args, "session_id").filter(|s| !s.is_empty()) {
        Some(session_id) => Ok(plan_id_for(session_id)),
        None => Err(ToolResult::error(
            "session_id missing (engine should inject)",
        )),
    }
}

pub struct ReadTodosTool {
    plans: Arc<dyn PlanStore>,
}

#[async_trait]
impl Tool for ReadTodosTool {
    fn name(&self) -> &str {
        "read_todos"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "read_todos".into(),
            description: "Read the current plan/todos".into(),
            parameters: object_schema(&[(
                "plan_id",
                "string",
                "Optional explicit plan id (default: plan_<session_id>)",
                false,
            )]),
        }
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::None
    }

    async fn execute(&self, args: &Args) -> Result<ToolResult, ToolError> {
        let plan_id = match resolve_plan_id(args) {
            Ok(id) => id,
            Err(result) => return Ok(result),
        };

        match self.plans.get(&plan_id).await {
            Ok(plan) => Ok(json_result(
                serde_json::to_value(&plan).unwrap_or(Value::Null),
            )),
            Err(e) if e.is_not_found() => {
                Ok(json_result(json!({ "plan_id": plan_id, "items": [] })))
            }
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}

pub struct WriteTodosTool {
    plans: Arc<dyn PlanStore>,
}

impl WriteTodosTool {
    fn parse_items(raw: Option<&Value>) -> Vec<PlanItem> {
        let Some(Value::Array(items)) = raw else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let obj = item.as_object()?;
                Some(PlanItem {
                    id: obj.get("id").and_then(Value::as_u64).unwrap_or(0) as u32,
                    text: obj
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    status: obj
                        .get("status")
                        .and_then(Value::as_str)
                        .and_then(parse_status)
                        .unwrap_or(PlanStatus::Pending),
                })
            })
            .collect()
    }
}

fn parse_status(s: &str) -> Option<PlanStatus> {
    match s {
        "pending" => Some(PlanStatus::Pending),
        "running" => Some(PlanStatus::Running),
        "done" => Some(PlanStatus::Done),
        "blocked" => Some(PlanStatus::Blocked),
        "errored" => Some(PlanStatus::Errored),
        _ => None,
    }
}

#[async_trait]
impl Tool for WriteTodosTool {
    fn name(&self) -> &str {
        "write_todos"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "write_todos".into(),
            description: "Create or update the plan/todos".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "plan_id": {
                        "type": "string",
                        "description": "Optional explicit plan id (default: plan_<session_id>)"
                    },
                    "mode": { "type": "string", "description": "set | append | patch" },
                    "items": {
                        "type": "array",
                        "description": "Items for set/append",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": { "type": "integer" },
                                "text": { "type": "string" },
                                "status": { "type": "string" }
                            }
                        }
                    },
                    "patches": {
                        "type": "array",
                        "description": "Patches for patch mode",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": { "type": "integer" },
                                "text": { "type": "string" },
                                "status": { "type": "string" },
                                "delete": { "type": "boolean" }
                            }
                        }
                    }
                }
            }),
        }
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::High
    }

    async fn execute(&self, args: &Args) -> Result<ToolResult, ToolError> {
        let plan_id = match resolve_plan_id(args) {
            Ok(id) => id,
            Err(result) => return Ok(result),
        };
        let mode = str_arg(args, "mode").filter(|m| !m.is_empty()).unwrap_or("set");
        let mut new_items = Self::parse_items(args.get("items"));

        let plan = match mode {
            "set" => PlanSnapshot {
                plan_id: plan_id.clone(),
                items: new_items,
                tool_call_id: String::new(),
            },
            "append" => {
                let mut existing = match self.plans.get(&plan_id).await {
                    Ok(plan) => plan,
                    Err(e) if e.is_not_found() => PlanSnapshot::empty(&plan_id),
                    Err(e) => return Ok(ToolResult::error(e.to_string())),
                };
                let mut max_id = existing.items.iter().map(|i| i.id).max().unwrap_or(0);
                for item in &mut new_items {
                    if item.id == 0 {
                        max_id += 1;
                        item.id = max_id;
                    }
                }
                existing.items.extend(new_items);
                existing
            }
            "patch" => {
                let mut existing = match self.plans.get(&plan_id).await {
                    Ok(plan) => plan,
                    Err(e) => return Ok(ToolResult::error(e.to_string())),
                };
                if let Some(Value::Array(patches)) = args.get("patches") {
                    for patch in patches {
                        let Some(obj) = patch.as_object() else { continue };
                        let id = obj.get("id").and_then(Value::as_u64).unwrap_or(0) as u32;
                        if id == 0 {
                            continue;
                        }
                        let Some(pos) = existing.items.iter().position(|i| i.id == id) else {
                            continue;
                        };
                        if let Some(text) = obj.get("text").and_then(Value::as_str) {
                            existing.items[pos].text = text.to_string();
                        }
                        if let Some(status) =
                            obj.get("status").and_then(Value::as_str).and_then(parse_status)
                        {
                            existing.items[pos].status = status;
                        }
                        if obj.get("delete").and_then(Value::as_bool) == Some(true) {
                            existing.items.remove(pos);
                        }
                    }
                }
                existing
            }
            other => return Ok(ToolResult::error(format!("invalid mode: {other}"))),
        };

        let mut seen = std::collections::HashSet::new();
        for item in &plan.items {
            if !seen.insert(item.id) {
                return Ok(ToolResult::error(format!("duplicate item ID: {}", item.id)));
            }
        }

        if let Err(e) = self.plans.put(&plan_id, &plan).await {
            return Ok(ToolResult::error(e.to_string()));
        }
        Ok(json_result(
            serde_json::to_value(&plan).unwrap_or(Value::Null),
        ))
    }
}

// ── Memory ──────────────────────────────────────────────────────────────

pub struct ReadMemoryTool {
    memory: Arc<dyn MemoryStore>,
}

#[async_trait]
impl Tool for ReadMemoryTool {
    fn name(&self) -> &str {
        "read_memory"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "read_memory".into(),
            description: "Read memory entries".into(),
            parameters: object_schema(&[
                ("source", "string", "user | project | all", false),
                ("query", "string", "Search query (optional)", false),
                ("limit", "integer", "Max results (default 20)", false),
            ]),
        }
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::None
    }

    async fn execute(&self, args: &Args) -> Result<ToolResult, ToolError> {
        let query = str_arg(args, "query").unwrap_or("");
        let source = str_arg(args, "source").unwrap_or("");
        let limit = int_arg(args, "limit").unwrap_or(20).max(0) as usize;

        let result = if !query.is_empty() {
            self.memory.search(query).await
        } else {
            match source {
                "user" => self.memory.list(MemorySource::User).await,
                "project" => self.memory.list(MemorySource::Project).await,
                _ => {
                    let mut all = self.memory.list(MemorySource::User).await.unwrap_or_default();
                    all.extend(
                        self.memory
                            .list(MemorySource::Project)
                            .await
                            .unwrap_or_default(),
                    );
                    Ok(all)
                }
            }
        };

        match result {
            Ok(mut entries) => {
                entries.truncate(limit);
                Ok(json_result(json!({ "entries": entries })))
            }
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}

pub struct UpdateMemoryTool {
    memory: Arc<dyn MemoryStore>,
}

impl UpdateMemoryTool {
    fn entry_from_args(args: &Args) -> Option<MemoryEntry> {
        let obj = args.get("entry")?.as_object()?;
        let kind = match obj.get("type").and_then(Value::as_str)? {
            "fact" => MemoryKind::Fact,
            "preference" => MemoryKind::Preference,
            "decision" => MemoryKind::Decision,
            "lesson" => MemoryKind::Lesson,
            _ => return None,
        };
        let source = match obj.get("source").and_then(Value::as_str).unwrap_or("project") {
            "user" => MemorySource::User,
            _ => MemorySource::Project,
        };
        let mut entry = MemoryEntry::new(
            obj.get("id").and_then(Value::as_str).unwrap_or_default(),
            kind,
            obj.get("content").and_then(Value::as_str).unwrap_or_default(),
            source,
        );
        if entry.id.is_empty() {
            entry.id = format!("mem_{}", Utc::now().timestamp_millis());
        }
        if let Some(Value::Array(tags)) = obj.get("tags") {
            entry.tags = tags
                .iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect();
        }
        Some(entry)
    }
}

#[async_trait]
impl Tool for UpdateMemoryTool {
    fn name(&self) -> &str {
        "update_memory"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "update_memory".into(),
            description: "Add, update, or delete memory entries".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "op": { "type": "string", "description": "add | update | delete" },
                    "entry": {
                        "type": "object",
                        "description": "Entry for add/update",
                        "properties": {
                            "id": { "type": "string" },
                            "type": { "type": "string" },
                            "content": { "type": "string" },
                            "source": { "type": "string" },
                            "tags": { "type": "array", "items": { "type": "string" } }
                        }
                    },
                    "id": { "type": "string", "description": "Entry ID for delete" }
                },
                "required": ["op"]
            }),
        }
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::High
    }

    async fn execute(&self, args: &Args) -> Result<ToolResult, ToolError> {
        match str_arg(args, "op").unwrap_or("") {
            "add" | "update" => {
                let op = str_arg(args, "op").unwrap_or("");
                let Some(entry) = Self::entry_from_args(args) else {
                    return Ok(ToolResult::error("entry argument required"));
                };
                let result = if op == "add" {
                    self.memory.add(entry).await
                } else {
                    self.memory.update(entry).await
                };
                if let Err(e) = result {
                    return Ok(ToolResult::error(e.to_string()));
                }
            }
            "delete" => {
                let Some(id) = str_arg(args, "id").filter(|s| !s.is_empty()) else {
                    return Ok(ToolResult::error("id argument required for delete"));
                };
                if let Err(e) = self.memory.delete(id).await {
                    return Ok(ToolResult::error(e.to_string()));
                }
            }
            "" => return Ok(ToolResult::error("op argument required (add/update/delete)")),
            other => return Ok(ToolResult::error(format!("invalid op: {other}"))),
        }
        Ok(json_result(json!({ "ok": true })))
    }
}
