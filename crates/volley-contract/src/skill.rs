//! Skill records: named bundles of prompt content and metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Indexed skill metadata, as listed to the model and the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillMeta {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub license: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compatibility: String,
    /// Tool allowlist applied while this skill is active; empty means
    /// unrestricted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl SkillMeta {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            license: String::new(),
            compatibility: String::new(),
            allowed_tools: Vec::new(),
            path: String::new(),
        }
    }

    #[must_use]
    pub fn with_allowed_tools(mut self, tools: impl IntoIterator<Item = String>) -> Self {
        self.allowed_tools = tools.into_iter().collect();
        self
    }
}

/// A fully loaded skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    #[serde(flatten)]
    pub meta: SkillMeta,
    /// Markdown body injected into the system prompt when active.
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<String>,
    /// Free-form key/value metadata (e.g. `autosave: novel_chapter`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Skill {
    pub fn new(meta: SkillMeta, content: impl Into<String>) -> Self {
        Self {
            meta,
            content: content.into(),
            scripts: Vec::new(),
            references: Vec::new(),
            assets: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skill_flattens_meta_on_wire() {
        let skill = Skill::new(
            SkillMeta::new("chapter-write", "Write novel chapters"),
            "# workflow",
        )
        .with_metadata("autosave", "novel_chapter");

        let wire = serde_json::to_value(&skill).unwrap();
        assert_eq!(wire["name"], "chapter-write");
        assert_eq!(wire["content"], "# workflow");
        assert_eq!(wire["metadata"]["autosave"], "novel_chapter");

        let back: Skill = serde_json::from_value(wire).unwrap();
        assert_eq!(back, skill);
    }
}
