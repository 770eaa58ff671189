//! Skill routing: decide which skill a turn should activate, from explicit
//! user overrides, plan-item tags, or keyword scoring.

use std::sync::LazyLock;

use regex::Regex;
use volley_contract::{PlanSnapshot, PlanStatus, SkillMeta};

static USER_OVERRIDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bskill\s*[:=]\s*([a-z0-9]+(?:-[a-z0-9]+)*)\b").expect("override pattern")
});
static USER_OVERRIDE_ZH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:使用技能|用技能|使用 skill|用 skill)\s*[:：]?\s*([a-z0-9]+(?:-[a-z0-9]+)*)")
        .expect("override pattern (zh)")
});
static PLAN_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\[\s*skill\s*:\s*([a-z0-9]+(?:-[a-z0-9]+)*)\s*\]\s*(.*)$")
        .expect("plan tag pattern")
});
static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\"([^\"]+)\"").expect("quoted pattern"));

/// Minimum winning score and required gap to the runner-up.
const MIN_SCORE: i32 = 8;
const MIN_GAP: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    User,
    Auto,
}

#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub skill: String,
    pub source: RouteSource,
    pub locked: bool,
    pub reason: String,
    pub score: i32,
}

#[derive(Debug, Clone, Default)]
pub struct RouteInput {
    pub user_message: String,
    pub plan_hint: String,
}

/// Decide a skill for the given context, or `None` when no candidate is
/// convincing enough.
pub fn route_skill(skills: &[SkillMeta], input: &RouteInput) -> Option<RouteDecision> {
    let user_msg = input.user_message.trim();
    let plan_hint = input.plan_hint.trim();

    if let Some(name) = parse_user_skill_override(skills, user_msg) {
        return Some(RouteDecision {
            skill: name,
            source: RouteSource::User,
            locked: true,
            reason: "explicit_user_override".into(),
            score: 100,
        });
    }

    if let Some((name, text)) = parse_plan_skill_tag(plan_hint) {
        if skill_exists(skills, &name) {
            return Some(RouteDecision {
                skill: name,
                source: RouteSource::Auto,
                locked: false,
                reason: format!("plan_skill_tag:{text}"),
                score: 90,
            });
        }
    }

    let context = normalize_for_match(&format!("{user_msg} {plan_hint}"));
    if context.is_empty() {
        return None;
    }

    let mut scored: Vec<(i32, &str)> = skills
        .iter()
        .map(|sk| (score_skill(sk, &context), sk.name.as_str()))
        .collect();
    // Highest score first; alphabetical tie-break.
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

    let (best_score, best_name) = *scored.first()?;
    if best_score < MIN_SCORE {
        return None;
    }
    if let Some((runner_up, _)) = scored.get(1) {
        if best_score - runner_up < MIN_GAP {
            return None;
        }
    }

    Some(RouteDecision {
        skill: best_name.to_string(),
        source: RouteSource::Auto,
        locked: false,
        reason: "scored_match".into(),
        score: best_score,
    })
}

fn skill_exists(skills: &[SkillMeta], name: &str) -> bool {
    skills.iter().any(|sk| sk.name == name)
}

/// Match `skill: <name>` (or the localized phrasings) against known skills.
pub fn parse_user_skill_override(skills: &[SkillMeta], msg: &str) -> Option<String> {
    if msg.trim().is_empty() {
        return None;
    }

    for re in [&*USER_OVERRIDE_RE, &*USER_OVERRIDE_ZH_RE] {
        if let Some(caps) = re.captures(msg) {
            let name = caps[1].to_lowercase();
            if skill_exists(skills, &name) {
                return Some(name);
            }
        }
    }
    None
}

/// Parse a plan-item prefix of the form `[skill:<name>] <text>`.
pub fn parse_plan_skill_tag(text: &str) -> Option<(String, String)> {
    let s = text.trim();
    if !s.starts_with('[') {
        return None;
    }
    let caps = PLAN_TAG_RE.captures(s)?;
    Some((caps[1].to_lowercase(), caps[2].trim().to_string()))
}

/// The plan hint: the first running item's text, else the first pending one.
pub fn plan_hint_from_plan(plan: &PlanSnapshot) -> String {
    for wanted in [PlanStatus::Running, PlanStatus::Pending] {
        if let Some(item) = plan.items.iter().find(|i| i.status == wanted) {
            return item.text.trim().to_string();
        }
    }
    String::new()
}

/// Score one skill against the normalized context.
pub fn score_skill(skill: &SkillMeta, normalized_context: &str) -> i32 {
    let name = skill.name.trim().to_lowercase();
    if name.is_empty() {
        return 0;
    }

    let mut score = 0;

    if normalized_context.contains(&name) {
        score += 12;
    }

    for token in name.split('-') {
        let token = token.trim();
        if token.len() < 3 {
            continue;
        }
        if normalized_context.contains(token) {
            score += 2;
        }
    }

    for trigger in extract_quoted_strings(&skill.description) {
        if trigger.is_empty() {
            continue;
        }
        if trigger_matches(&trigger, normalized_context) {
            score += 15;
            continue;
        }
        let normalized = normalize_for_match(&trigger);
        if !normalized.is_empty() && normalized_context.contains(&normalized) {
            score += 15;
        }
    }

    for word in ascii_words(&skill.description) {
        if word.len() < 4 {
            continue;
        }
        if normalized_context.contains(&word) {
            score += 1;
        }
    }

    score
}

/// Trigger phrases support a `第X章` chapter-number placeholder.
fn trigger_matches(trigger: &str, normalized_context: &str) -> bool {
    let t = trigger.trim();
    if t.is_empty() {
        return false;
    }
    if !(t.contains("第X章") || t.contains("第x章")) {
        return false;
    }

    let mut pattern = regex::escape(t);
    for placeholder in ["第X章", "第x章"] {
        pattern = pattern.replace(placeholder, "第[0-9]+章");
    }
    pattern = pattern.replace('X', "[0-9]+").replace('x', "[0-9]+");

    match Regex::new(&pattern) {
        Ok(re) => re.is_match(normalized_context),
        Err(_) => false,
    }
}

fn extract_quoted_strings(s: &str) -> Vec<String> {
    QUOTED_RE
        .captures_iter(s)
        .map(|caps| caps[1].trim().to_string())
        .collect()
}

fn ascii_words(s: &str) -> Vec<String> {
    let mut cleaned = String::with_capacity(s.len());
    for c in s.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            cleaned.push(c);
        } else {
            cleaned.push(' ');
        }
    }
    cleaned.split_whitespace().map(str::to_string).collect()
}

pub fn normalize_for_match(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Phrases that clear a user's skill lock.
pub fn is_unlock_skill_message(msg: &str) -> bool {
    let m = msg.trim().to_lowercase();
    if m.is_empty() {
        return false;
    }
    const PHRASES: &[&str] = &[
        "unlock skill",
        "auto skill",
        "automatic skill",
        "自动选择技能",
        "取消锁定技能",
        "解锁技能",
        "恢复自动技能",
    ];
    PHRASES.iter().any(|p| m.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use volley_contract::PlanItem;

    fn skills() -> Vec<SkillMeta> {
        vec![
            SkillMeta::new(
                "chapter-write",
                "Write a novel chapter when asked \"写第X章\" or to continue the story",
            ),
            SkillMeta::new("chapter-plan", "Plan chapters: outline, pacing, arcs"),
        ]
    }

    #[test]
    fn plan_tag_parses_name_and_text() {
        let (name, text) = parse_plan_skill_tag("[skill:chapter-plan]   规划10章  ").unwrap();
        assert_eq!(name, "chapter-plan");
        assert_eq!(text, "规划10章");

        assert!(parse_plan_skill_tag("no tag here").is_none());
        assert!(parse_plan_skill_tag("[skill:]").is_none());
    }

    #[test]
    fn explicit_user_override_wins_and_locks() {
        let decision = route_skill(
            &skills(),
            &RouteInput {
                user_message: "skill: chapter-write 先写第3章".into(),
                plan_hint: "[skill:chapter-plan] 规划10章".into(),
            },
        )
        .unwrap();
        assert_eq!(decision.skill, "chapter-write");
        assert_eq!(decision.source, RouteSource::User);
        assert!(decision.locked);
    }

    #[test]
    fn override_requires_a_known_skill() {
        assert!(parse_user_skill_override(&skills(), "skill: no-such-skill").is_none());
        assert_eq!(
            parse_user_skill_override(&skills(), "use it: 使用技能 chapter-plan"),
            Some("chapter-plan".to_string())
        );
    }

    #[test]
    fn plan_tag_routes_without_locking() {
        let decision = route_skill(
            &skills(),
            &RouteInput {
                user_message: "continue".into(),
                plan_hint: "[skill:chapter-plan] 规划10章".into(),
            },
        )
        .unwrap();
        assert_eq!(decision.skill, "chapter-plan");
        assert_eq!(decision.source, RouteSource::Auto);
        assert!(!decision.locked);
        assert!(decision.reason.starts_with("plan_skill_tag:"));
    }

    #[test]
    fn empty_context_yields_no_decision() {
        assert!(route_skill(&skills(), &RouteInput::default()).is_none());
        assert!(route_skill(
            &skills(),
            &RouteInput {
                user_message: "   ".into(),
                plan_hint: "".into(),
            }
        )
        .is_none());
    }

    #[test]
    fn trigger_phrase_with_chapter_placeholder_scores() {
        let sk = &skills()[0];
        let context = normalize_for_match("帮我写第12章的内容");
        let score = score_skill(sk, &context);
        assert!(score >= 15, "trigger should fire, got {score}");
    }

    #[test]
    fn whole_name_mention_beats_token_matches() {
        let decision = route_skill(
            &skills(),
            &RouteInput {
                user_message: "please use chapter-write for this".into(),
                plan_hint: String::new(),
            },
        )
        .unwrap();
        assert_eq!(decision.skill, "chapter-write");
        assert_eq!(decision.reason, "scored_match");
    }

    #[test]
    fn close_scores_produce_no_decision() {
        let pair = vec![
            SkillMeta::new("alpha-beam", "about \"第X章\" things"),
            SkillMeta::new("alpha-bean", "about \"第X章\" things"),
        ];
        // Both score identically from the shared trigger; gap < 2 → no pick.
        assert!(route_skill(
            &pair,
            &RouteInput {
                user_message: "写第3章".into(),
                plan_hint: String::new(),
            }
        )
        .is_none());
    }

    #[test]
    fn plan_hint_prefers_running_items() {
        let plan = PlanSnapshot {
            plan_id: "plan_s1".into(),
            items: vec![
                PlanItem {
                    id: 1,
                    text: " pending item ".into(),
                    status: PlanStatus::Pending,
                },
                PlanItem {
                    id: 2,
                    text: " running item ".into(),
                    status: PlanStatus::Running,
                },
            ],
            tool_call_id: String::new(),
        };
        assert_eq!(plan_hint_from_plan(&plan), "running item");
    }

    #[test]
    fn unlock_phrases_detected() {
        assert!(is_unlock_skill_message("please unlock skill now"));
        assert!(is_unlock_skill_message("解锁技能，然后写第4章"));
        assert!(!is_unlock_skill_message("write chapter 4"));
    }
}
