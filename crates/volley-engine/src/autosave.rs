//! Novel-chapter autosave: when the active skill declares
//! `autosave: novel_chapter`, a terminal assistant message that looks like a
//! chapter is proposed for writing to the project's volume tree, and one
//! that looks like a work summary is appended to the session log.
//!
//! The proposal goes through the same policy/approval pipeline as any other
//! tool call.

use std::path::Path;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde_json::json;
use volley_contract::{Args, Skill};

static CHAPTER_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(#+\s*)?第\s*\d{1,4}\s*章").expect("chapter header pattern")
});
static VOLUME_CHAPTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bv(\d+)_c(\d+)\b").expect("v_c pattern"));
static ZH_VOLUME_CHAPTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"第\s*(\d{1,3})\s*卷.*?第\s*(\d{1,4})\s*章").expect("volume chapter pattern")
});
static ZH_CHAPTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"第\s*(\d{1,4})\s*章").expect("chapter pattern"));

const MIN_CHAPTER_BYTES: usize = 200;
const SUMMARY_SCAN_CHARS: usize = 300;
const SUMMARY_MARKERS: &[&str] = &[
    "任务完成",
    "已完成",
    "总结",
    "Summary",
    "已创作",
    "已保存",
    "✅",
    "已完成的工作",
];

/// A tool call the engine proposes on its own behalf.
#[derive(Debug, Clone)]
pub struct AutosaveProposal {
    pub tool_name: &'static str,
    pub args: Args,
    /// Terminate the turn after this call instead of re-entering the loop.
    pub stop_after: bool,
}

/// Decide what, if anything, to save for a terminal assistant message.
pub fn plan_autosave(
    skill: &Skill,
    workspace_root: &Path,
    user_message: &str,
    assistant_content: &str,
) -> Option<AutosaveProposal> {
    let content = assistant_content.trim();
    if content.is_empty() {
        return None;
    }

    let mode = skill
        .metadata
        .get("autosave")
        .map(|m| m.trim().to_lowercase())
        .unwrap_or_default();

    match mode.as_str() {
        "novel_chapter" => {
            if looks_like_summary(content) {
                // A work report, not a chapter: keep it out of the volume
                // tree and append it to the session log instead.
                let project = resolve_novel_project(workspace_root)?;
                let path = format!("novel/{project}/logs/session_summaries.md");
                let stamped = format!(
                    "\n---\n## {}\n\n{}\n",
                    Utc::now().format("%Y-%m-%d %H:%M:%S"),
                    content
                );
                let mut args = Args::new();
                args.insert("path".into(), json!(path));
                args.insert("content".into(), json!(stamped));
                return Some(AutosaveProposal {
                    tool_name: "append_file",
                    args,
                    stop_after: true,
                });
            }

            let path = resolve_chapter_path(workspace_root, user_message, content)?;
            if !looks_like_chapter_markdown(content) {
                return None;
            }
            let mut args = Args::new();
            args.insert("path".into(), json!(path));
            args.insert("content".into(), json!(content));
            Some(AutosaveProposal {
                tool_name: "write_file",
                args,
                stop_after: true,
            })
        }
        _ => None,
    }
}

/// A chapter must start with a chapter-title header and carry real body
/// text; this filters out summaries that merely mention chapters.
pub fn looks_like_chapter_markdown(s: &str) -> bool {
    let head = s.trim();
    if head.len() < MIN_CHAPTER_BYTES {
        return false;
    }
    CHAPTER_HEADER_RE.is_match(head)
}

/// Detect a work summary/report by markers in the leading text.
pub fn looks_like_summary(s: &str) -> bool {
    let head = s.trim();
    if head.is_empty() {
        return false;
    }
    let sample: String = head.chars().take(SUMMARY_SCAN_CHARS).collect();
    SUMMARY_MARKERS.iter().any(|m| sample.contains(m))
}

fn resolve_chapter_path(
    workspace_root: &Path,
    user_message: &str,
    assistant_content: &str,
) -> Option<String> {
    let project = resolve_novel_project(workspace_root)?;

    // The output names its own chapter; the user message often references
    // OTHER chapters ("根据第4章...") and is only a fallback.
    let (volume, chapter) = parse_volume_chapter(assistant_content)
        .or_else(|| parse_volume_chapter(user_message))?;

    let volume = if volume == 0 { 1 } else { volume };
    if chapter == 0 {
        return None;
    }
    Some(format!(
        "novel/{project}/volumes/v{volume}/c{chapter:03}.md"
    ))
}

/// The current novel project: `novel/.current` if present, else the
/// alphabetically first project directory.
pub fn resolve_novel_project(workspace_root: &Path) -> Option<String> {
    if workspace_root.as_os_str().is_empty() {
        return None;
    }

    let current = workspace_root.join("novel").join(".current");
    if let Ok(content) = std::fs::read_to_string(&current) {
        let name = content.trim();
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }

    let novel_dir = workspace_root.join("novel");
    let entries = std::fs::read_dir(&novel_dir).ok()?;
    let mut projects: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| !name.is_empty() && !name.starts_with('.'))
        .collect();
    if projects.is_empty() {
        return None;
    }
    projects.sort();
    projects.into_iter().next()
}

/// Parse `(volume, chapter)` from `v1_c4`, `第1卷…第4章`, or `第4章`
/// (volume defaults to 1).
pub fn parse_volume_chapter(text: &str) -> Option<(u32, u32)> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(caps) = VOLUME_CHAPTER_RE.captures(s) {
        let v: u32 = caps[1].parse().ok()?;
        let c: u32 = caps[2].parse().ok()?;
        if v > 0 && c > 0 {
            return Some((v, c));
        }
    }

    if let Some(caps) = ZH_VOLUME_CHAPTER_RE.captures(s) {
        let v: u32 = caps[1].parse().ok()?;
        let c: u32 = caps[2].parse().ok()?;
        if v > 0 && c > 0 {
            return Some((v, c));
        }
    }

    if let Some(caps) = ZH_CHAPTER_RE.captures(s) {
        let c: u32 = caps[1].parse().ok()?;
        if c > 0 {
            return Some((1, c));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use volley_contract::SkillMeta;

    fn novel_skill() -> Skill {
        Skill::new(SkillMeta::new("chapter-write", "writes chapters"), "body")
            .with_metadata("autosave", "novel_chapter")
    }

    fn chapter_text() -> String {
        format!("# 第004章 逃亡者的直觉\n\n{}", "正文内容。\n".repeat(80))
    }

    fn workspace_with_project(project: &str) -> TempDir {
        let ws = TempDir::new().unwrap();
        std::fs::create_dir_all(ws.path().join("novel").join(project).join("volumes/v1")).unwrap();
        std::fs::write(ws.path().join("novel").join(".current"), project).unwrap();
        ws
    }

    #[test]
    fn parse_volume_chapter_patterns() {
        assert_eq!(parse_volume_chapter("save as v2_c14 please"), Some((2, 14)));
        assert_eq!(parse_volume_chapter("第2卷，第7章：标题"), Some((2, 7)));
        assert_eq!(parse_volume_chapter("写第15章"), Some((1, 15)));
        assert_eq!(parse_volume_chapter("nothing here"), None);
        assert_eq!(parse_volume_chapter(""), None);
    }

    #[test]
    fn chapter_detection_requires_header_and_length() {
        assert!(looks_like_chapter_markdown(&chapter_text()));
        assert!(!looks_like_chapter_markdown("# 第4章 太短"));
        let no_header = "正文".repeat(200);
        assert!(!looks_like_chapter_markdown(&no_header));
    }

    #[test]
    fn summary_detection_scans_leading_text_only() {
        assert!(looks_like_summary("任务完成：已写完三章。"));
        assert!(looks_like_summary("Summary: wrote three chapters ✅"));
        let marker_buried = format!("{}总结", "字".repeat(400));
        assert!(!looks_like_summary(&marker_buried));
        assert!(!looks_like_summary(""));
    }

    #[test]
    fn proposes_chapter_write_with_resolved_path() {
        let ws = workspace_with_project("demo");
        let proposal = plan_autosave(&novel_skill(), ws.path(), "续写", &chapter_text()).unwrap();

        assert_eq!(proposal.tool_name, "write_file");
        assert!(proposal.stop_after);
        assert_eq!(
            proposal.args["path"],
            serde_json::json!("novel/demo/volumes/v1/c004.md")
        );
        let written = proposal.args["content"].as_str().unwrap();
        assert_eq!(written, chapter_text().trim());
    }

    #[test]
    fn proposes_summary_append_for_reports() {
        let ws = workspace_with_project("demo");
        let proposal = plan_autosave(
            &novel_skill(),
            ws.path(),
            "",
            "任务完成：本次共写了两章。",
        )
        .unwrap();

        assert_eq!(proposal.tool_name, "append_file");
        assert_eq!(
            proposal.args["path"],
            serde_json::json!("novel/demo/logs/session_summaries.md")
        );
        assert!(proposal.args["content"]
            .as_str()
            .unwrap()
            .contains("任务完成"));
    }

    #[test]
    fn falls_back_to_alphabetical_project_without_current_marker() {
        let ws = TempDir::new().unwrap();
        for p in ["zeta", "apple"] {
            std::fs::create_dir_all(ws.path().join("novel").join(p)).unwrap();
        }
        assert_eq!(resolve_novel_project(ws.path()).as_deref(), Some("apple"));
    }

    #[test]
    fn declines_without_autosave_metadata_or_chapter_number() {
        let plain = Skill::new(SkillMeta::new("helper", "generic"), "body");
        let ws = workspace_with_project("demo");
        assert!(plan_autosave(&plain, ws.path(), "", &chapter_text()).is_none());

        // No parsable chapter number anywhere.
        let text = format!("# 序幕\n\n{}", "正文。\n".repeat(80));
        assert!(plan_autosave(&novel_skill(), ws.path(), "continue", &text).is_none());
    }
}
