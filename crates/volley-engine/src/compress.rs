//! History compression: summarize older turns, keep a recent suffix.
//!
//! The split point is always a user-message boundary with no tool call from
//! the prefix still awaiting its result — a tool-call/tool-result pair is
//! never straddled. When no such boundary improves anything, compression is
//! skipped entirely.

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info};
use volley_contract::{Message, Role, Session};

use crate::llm::{Llm, LlmError, LlmRequest};
use crate::prompts::{PromptLoader, COMPRESS_SUMMARY};

const SUMMARY_MAX_TOKENS: u32 = 800;
const MESSAGE_EXCERPT_CHARS: usize = 300;

#[derive(Debug, Clone, Copy)]
pub struct CompressConfig {
    /// Number of recent user turns to keep.
    pub keep_turns: usize,
    /// Cap on messages kept after compression.
    pub max_messages: usize,
    /// Compress even when below the thresholds (operator command).
    pub force: bool,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            keep_turns: 1,
            max_messages: 20,
            force: false,
        }
    }
}

/// Result structure returned by the engine's explicit compress operation.
#[derive(Debug, Clone, Serialize)]
pub struct CompressResult {
    pub messages_removed: usize,
    pub messages_kept: usize,
    pub summary_length: usize,
    pub summary: String,
}

/// Summarize the session's older messages and drop them, keeping the suffix.
/// A no-op (not an error) when no valid split point exists or the thresholds
/// are not met.
pub async fn compress_history(
    llm: &dyn Llm,
    prompts: &PromptLoader,
    session: &mut Session,
    cfg: CompressConfig,
) -> Result<(), LlmError> {
    let keep_turns = cfg.keep_turns.max(1);
    let max_messages = if cfg.max_messages == 0 {
        20
    } else {
        cfg.max_messages
    };

    let total = session.messages.len();
    let turns = count_turns(&session.messages);

    let needed = cfg.force || total > max_messages || turns > keep_turns;
    if !needed {
        debug!(total, turns, keep_turns, max_messages, "no compression needed");
        return Ok(());
    }

    // Prefer the turn-based split; fall back to the message-count split when
    // it yields nothing or still leaves too long a suffix.
    let mut split = find_turn_split_index(&session.messages, keep_turns);
    if split == 0 || total - split > max_messages {
        split = find_safe_message_split(&session.messages, max_messages);
    }
    if split == 0 {
        info!("no valid split point found, skipping compression");
        return Ok(());
    }

    let old: Vec<Message> = session.messages[..split].to_vec();
    let kept: Vec<Message> = session.messages[split..].to_vec();
    info!(
        removed = old.len(),
        kept = kept.len(),
        turns,
        "compressing history"
    );

    let summary = generate_summary(llm, prompts, &session.summary, &old).await?;
    if summary.is_empty() {
        // Generation produced nothing usable; keep everything as-is.
        return Ok(());
    }

    session.summary = summary;
    session.messages = kept;
    Ok(())
}

/// Number of user turns in the history.
pub fn count_turns(messages: &[Message]) -> usize {
    messages.iter().filter(|m| m.role == Role::User).count()
}

/// Indices of user messages at which no tool call from earlier messages is
/// still outstanding.
fn valid_split_points(messages: &[Message]) -> Vec<usize> {
    let mut pending: std::collections::HashSet<&str> = std::collections::HashSet::new();
    let mut splits = Vec::new();

    for (i, m) in messages.iter().enumerate() {
        match m.role {
            Role::Assistant => {
                for call in &m.tool_calls {
                    pending.insert(call.id.as_str());
                }
            }
            Role::Tool => {
                if let Some(id) = m.tool_call_id.as_deref() {
                    pending.remove(id);
                }
            }
            Role::User if pending.is_empty() => splits.push(i),
            _ => {}
        }
    }
    splits
}

/// Earliest boundary that keeps exactly the last `keep_turns` user turns;
/// 0 when everything fits.
pub fn find_turn_split_index(messages: &[Message], keep_turns: usize) -> usize {
    let splits = valid_split_points(messages);
    if splits.len() <= keep_turns {
        return 0;
    }
    splits[splits.len() - keep_turns]
}

/// Boundary that keeps at most `max_messages`: the first valid split at or
/// past the target, else the last valid split above zero, else 0.
pub fn find_safe_message_split(messages: &[Message], max_messages: usize) -> usize {
    if messages.len() <= max_messages {
        return 0;
    }
    let target = messages.len() - max_messages;
    let splits = valid_split_points(messages);

    if let Some(&split) = splits.iter().find(|&&s| s >= target) {
        return split;
    }
    splits.iter().rev().find(|&&s| s > 0).copied().unwrap_or(0)
}

/// Render the summarization prompt and stream the model's answer with a
/// bounded token cap. Empty output falls back to the existing summary.
async fn generate_summary(
    llm: &dyn Llm,
    prompts: &PromptLoader,
    existing_summary: &str,
    messages: &[Message],
) -> Result<String, LlmError> {
    let mut prompt = String::new();

    let template = prompts.get(COMPRESS_SUMMARY);
    if template.is_empty() {
        prompt.push_str("Create a concise summary of this conversation for context continuation.");
    } else {
        prompt.push_str(&template);
    }
    prompt.push_str("\n\n");

    if existing_summary.is_empty() {
        prompt.push_str("## Conversation to Summarize\n");
    } else {
        prompt.push_str("## Previous Context\n");
        prompt.push_str(existing_summary);
        prompt.push_str("\n\n## New Activity to Summarize\n");
    }

    for m in messages {
        match m.role {
            Role::User => {
                prompt.push_str(&format!(
                    "**User**: {}\n\n",
                    excerpt(&m.content, MESSAGE_EXCERPT_CHARS)
                ));
            }
            Role::Assistant => {
                if !m.content.is_empty() {
                    prompt.push_str(&format!(
                        "**Assistant**: {}\n\n",
                        excerpt(&m.content, MESSAGE_EXCERPT_CHARS)
                    ));
                }
                if !m.tool_calls.is_empty() {
                    let names: Vec<&str> =
                        m.tool_calls.iter().map(|c| c.name.as_str()).collect();
                    prompt.push_str(&format!("_[Used tools: {}]_\n", names.join(", ")));
                }
            }
            Role::Tool => {
                // Only short tool outputs are worth carrying into the prompt.
                if !m.content.is_empty() && m.content.len() < 100 {
                    prompt.push_str(&format!("_Tool result: {}_\n", m.content));
                }
            }
            Role::System => {}
        }
    }

    prompt.push_str("\n---\nProvide the summary now. Be concise but complete.");

    let req = LlmRequest {
        messages: vec![Message::user(prompt)],
        tools: Vec::new(),
        max_tokens: Some(SUMMARY_MAX_TOKENS),
    };

    let mut stream = llm.stream(req).await?;
    let mut out = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => out.push_str(&chunk.delta),
            Err(_) => break,
        }
    }

    let summary = out.trim().to_string();
    if summary.is_empty() {
        return Ok(existing_summary.to_string());
    }
    Ok(summary)
}

fn excerpt(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use volley_contract::ToolCallRequest;

    fn user(s: &str) -> Message {
        Message::user(s)
    }

    fn assistant(s: &str) -> Message {
        Message::assistant(s)
    }

    fn assistant_call(id: &str) -> Message {
        Message::assistant_with_tool_calls(
            "",
            vec![ToolCallRequest::new(id, "read_file", r#"{"path":"x"}"#)],
        )
    }

    fn tool(id: &str) -> Message {
        Message::tool(id, "result")
    }

    /// Roles U A T U A T U A with tool calls resolved inside each turn.
    fn eight_message_history() -> Vec<Message> {
        vec![
            user("turn one"),
            assistant_call("c1"),
            tool("c1"),
            user("turn two"),
            assistant_call("c2"),
            tool("c2"),
            user("turn three"),
            assistant("all done"),
        ]
    }

    #[test]
    fn count_turns_counts_user_messages() {
        assert_eq!(count_turns(&eight_message_history()), 3);
        assert_eq!(count_turns(&[]), 0);
    }

    #[test]
    fn turn_split_keeps_last_n_turns() {
        let messages = eight_message_history();
        // Valid boundaries are the user indices 0, 3, 6.
        assert_eq!(find_turn_split_index(&messages, 1), 6);
        assert_eq!(find_turn_split_index(&messages, 2), 3);
        assert_eq!(find_turn_split_index(&messages, 3), 0);
        assert_eq!(find_turn_split_index(&messages, 5), 0);
    }

    #[test]
    fn split_never_straddles_an_open_tool_call() {
        // The second user message arrives while c1 is still unanswered.
        let messages = vec![
            user("one"),
            assistant_call("c1"),
            user("interrupt"),
            tool("c1"),
            user("three"),
            assistant("done"),
        ];
        assert_eq!(find_turn_split_index(&messages, 1), 4);
        // Only indices 0 and 4 are valid; keeping two turns means keeping
        // everything because index 2 is unusable.
        assert_eq!(find_turn_split_index(&messages, 2), 0);
    }

    #[test]
    fn message_split_prefers_first_boundary_past_target() {
        let mut messages = Vec::new();
        for i in 0..12 {
            messages.push(user(&format!("u{i}")));
            messages.push(assistant(&format!("a{i}")));
        }
        // 24 messages, cap 6 → target 18, a user boundary.
        assert_eq!(find_safe_message_split(&messages, 6), 18);
        // Cap 5 → target 19 (assistant); next valid boundary is 20.
        assert_eq!(find_safe_message_split(&messages, 5), 20);
        // Everything fits.
        assert_eq!(find_safe_message_split(&messages, 30), 0);
    }

    #[test]
    fn message_split_falls_back_to_last_valid_boundary() {
        // One giant unanswered-free turn then a long tool chain: the only
        // boundaries are 0 and 1.
        let mut messages = vec![user("a"), user("b")];
        messages.push(assistant_call("c1"));
        for _ in 0..10 {
            messages.push(tool("c1"));
        }
        assert_eq!(find_safe_message_split(&messages, 2), 1);
    }

    #[tokio::test]
    async fn compress_replaces_prefix_with_summary() {
        let prompts = PromptLoader::embedded_only();
        let mut session = Session::new("s1");
        session.messages = eight_message_history();

        compress_history(
            &MockLlm,
            &prompts,
            &mut session,
            CompressConfig {
                keep_turns: 1,
                max_messages: 20,
                force: true,
            },
        )
        .await
        .unwrap();

        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, Role::User);
        assert_eq!(session.messages[0].content, "turn three");
        assert!(!session.summary.is_empty());
    }

    #[tokio::test]
    async fn compress_skips_when_thresholds_not_met() {
        let prompts = PromptLoader::embedded_only();
        let mut session = Session::new("s1");
        session.messages = vec![user("only"), assistant("turn")];

        compress_history(
            &MockLlm,
            &prompts,
            &mut session,
            CompressConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(session.messages.len(), 2);
        assert!(session.summary.is_empty());
    }

    #[tokio::test]
    async fn compress_is_conservative_when_no_boundary_exists() {
        let prompts = PromptLoader::embedded_only();
        let mut session = Session::new("s1");
        // A single turn with a long unanswered tool chain: both strategies
        // return 0, so nothing is cut.
        let mut messages = vec![user("only"), assistant_call("c1")];
        for _ in 0..30 {
            messages.push(tool("c9"));
        }
        session.messages = messages.clone();

        compress_history(
            &MockLlm,
            &prompts,
            &mut session,
            CompressConfig {
                keep_turns: 1,
                max_messages: 5,
                force: true,
            },
        )
        .await
        .unwrap();

        assert_eq!(session.messages, messages);
        assert!(session.summary.is_empty());
    }
}
