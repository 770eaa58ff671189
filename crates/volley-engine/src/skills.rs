//! Skill lookup. Discovery from the filesystem is a collaborator concern;
//! the engine consumes this index trait.

use std::collections::BTreeMap;
use std::sync::RwLock;

use volley_contract::{Skill, SkillMeta};

pub trait SkillIndex: Send + Sync {
    /// Indexed metadata, sorted by name.
    fn list(&self) -> Vec<SkillMeta>;

    fn get(&self, name: &str) -> Option<SkillMeta>;

    /// Full skill content (prompt body, scripts, metadata).
    fn load(&self, name: &str) -> Option<Skill>;
}

/// Index over a fixed set of skills, used by embedders and tests.
#[derive(Default)]
pub struct InMemorySkillIndex {
    skills: RwLock<BTreeMap<String, Skill>>,
}

impl InMemorySkillIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, skill: Skill) {
        self.skills
            .write()
            .expect("skill index lock poisoned")
            .insert(skill.meta.name.clone(), skill);
    }

    pub fn with_skills(skills: impl IntoIterator<Item = Skill>) -> Self {
        let index = Self::new();
        for skill in skills {
            index.insert(skill);
        }
        index
    }
}

impl SkillIndex for InMemorySkillIndex {
    fn list(&self) -> Vec<SkillMeta> {
        self.skills
            .read()
            .expect("skill index lock poisoned")
            .values()
            .map(|s| s.meta.clone())
            .collect()
    }

    fn get(&self, name: &str) -> Option<SkillMeta> {
        self.skills
            .read()
            .expect("skill index lock poisoned")
            .get(name)
            .map(|s| s.meta.clone())
    }

    fn load(&self, name: &str) -> Option<Skill> {
        self.skills
            .read()
            .expect("skill index lock poisoned")
            .get(name)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_is_sorted_and_load_returns_full_skill() {
        let index = InMemorySkillIndex::with_skills([
            Skill::new(SkillMeta::new("zeta", "last"), "z"),
            Skill::new(SkillMeta::new("alpha", "first"), "a"),
        ]);

        let names: Vec<String> = index.list().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        assert_eq!(index.load("alpha").unwrap().content, "a");
        assert!(index.get("missing").is_none());
    }
}
