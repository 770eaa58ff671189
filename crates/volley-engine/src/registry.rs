//! The executable tool interface and the name-keyed registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use volley_contract::{Args, Preview, RiskLevel, ToolResult, ToolSchema};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The unified tool interface the runtime dispatches to.
///
/// Schemas are safe to send to the model; execution is governed by policy.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Model-visible schema.
    fn schema(&self) -> ToolSchema;

    /// Declared risk, consumed by approval classification.
    fn risk(&self) -> RiskLevel {
        RiskLevel::Low
    }

    async fn execute(&self, args: &Args) -> Result<ToolResult, ToolError>;

    /// Best-effort structured description for the approval UI. Failures
    /// degrade to "no preview".
    async fn preview(&self, _args: &Args) -> Option<Preview> {
        None
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    AlreadyRegistered(String),
}

/// Concurrency-safe name → tool mapping. Registration is exclusive per name;
/// enumeration is sorted for deterministic schemas.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().expect("registry lock poisoned");
        if tools.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// All tools, sorted by name.
    pub fn all(&self) -> Vec<Arc<dyn Tool>> {
        let tools = self.tools.read().expect("registry lock poisoned");
        let mut out: Vec<Arc<dyn Tool>> = tools.values().cloned().collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out
    }

    pub fn names(&self) -> Vec<String> {
        let tools = self.tools.read().expect("registry lock poisoned");
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// String argument accessor; `None` when absent or not a string.
pub fn str_arg<'a>(args: &'a Args, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

/// Integer argument accessor, tolerant of JSON number widths.
pub fn int_arg(args: &Args, key: &str) -> Option<i64> {
    args.get(key).and_then(|v| v.as_i64())
}

pub fn bool_arg(args: &Args, key: &str) -> Option<bool> {
    args.get(key).and_then(|v| v.as_bool())
}

/// Build a JSON-Schema parameters object from (name, type, description,
/// required) tuples, the shape every built-in tool advertises.
pub fn object_schema(params: &[(&str, &str, &str, bool)]) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for (name, ty, desc, req) in params {
        properties.insert(
            (*name).to_string(),
            serde_json::json!({"type": ty, "description": desc}),
        );
        if *req {
            required.push(serde_json::Value::String((*name).to_string()));
        }
    }
    let mut schema = serde_json::Map::new();
    schema.insert("type".into(), "object".into());
    schema.insert("properties".into(), serde_json::Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".into(), serde_json::Value::Array(required));
    }
    serde_json::Value::Object(schema)
}
