//! Named prompt templates with embedded defaults, per-workspace overrides,
//! and an explicit-invalidation cache.
//!
//! A template named `compress_summary` resolves to
//! `<project_root>/prompts/compress_summary.md` when present, else the
//! embedded default.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

/// Template driving history summarization.
pub const COMPRESS_SUMMARY: &str = "compress_summary";

fn embedded(name: &str) -> &'static str {
    match name {
        COMPRESS_SUMMARY => include_str!("../prompts/compress_summary.md"),
        _ => "",
    }
}

pub struct PromptLoader {
    project_root: Option<PathBuf>,
    cache: RwLock<HashMap<String, String>>,
}

impl PromptLoader {
    /// Loader that only serves embedded defaults.
    pub fn embedded_only() -> Self {
        Self {
            project_root: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Loader that prefers `<project_root>/prompts/<name>.md`.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: Some(project_root.into()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Template content by name; empty string when unknown.
    pub fn get(&self, name: &str) -> String {
        if let Some(cached) = self.cache.read().expect("prompt cache poisoned").get(name) {
            return cached.clone();
        }

        let content = self.load(name);
        self.cache
            .write()
            .expect("prompt cache poisoned")
            .insert(name.to_string(), content.clone());
        content
    }

    fn load(&self, name: &str) -> String {
        if let Some(root) = &self.project_root {
            let custom = root.join("prompts").join(format!("{name}.md"));
            if let Ok(content) = std::fs::read_to_string(&custom) {
                return content.trim().to_string();
            }
        }
        embedded(name).trim().to_string()
    }

    /// Drop cached templates so edited files are picked up.
    pub fn clear_cache(&self) {
        self.cache.write().expect("prompt cache poisoned").clear();
    }
}

impl Default for PromptLoader {
    fn default() -> Self {
        Self::embedded_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn embedded_default_is_served_and_cached() {
        let loader = PromptLoader::embedded_only();
        let first = loader.get(COMPRESS_SUMMARY);
        assert!(first.contains("summary"));
        assert_eq!(loader.get(COMPRESS_SUMMARY), first);
        assert_eq!(loader.get("no_such_prompt"), "");
    }

    #[test]
    fn workspace_override_wins_until_cache_cleared() {
        let root = TempDir::new().unwrap();
        let prompts = root.path().join("prompts");
        std::fs::create_dir_all(&prompts).unwrap();

        let loader = PromptLoader::new(root.path());
        // Nothing custom yet: embedded default, now cached.
        assert!(loader.get(COMPRESS_SUMMARY).contains("summary"));

        std::fs::write(
            prompts.join("compress_summary.md"),
            "Custom condensation rules.\n",
        )
        .unwrap();
        // Still the cached default until the cache is invalidated.
        assert!(loader.get(COMPRESS_SUMMARY).contains("summary"));

        loader.clear_cache();
        assert_eq!(loader.get(COMPRESS_SUMMARY), "Custom condensation rules.");
    }
}
