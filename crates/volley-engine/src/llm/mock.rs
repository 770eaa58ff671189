//! Deterministic local model for development and tests. Never calls tools.

use async_trait::async_trait;
use futures::stream;
use volley_contract::Role;

use super::{Llm, LlmChunk, LlmError, LlmRequest, LlmStream};

/// Echoes the request shape back as streamed text, chunked so UIs exercise
/// their streaming path.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockLlm;

const CHUNK_BYTES: usize = 32;

impl MockLlm {
    fn render(req: &LlmRequest) -> String {
        let last_user = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let mut out = String::from("[Mock LLM]\n");
        out.push_str(&format!(
            "messages={} tools={}\n",
            req.messages.len(),
            req.tools.len()
        ));
        if !last_user.is_empty() {
            out.push_str("last_user=");
            out.push_str(truncate(last_user, 200));
            out.push('\n');
        }
        out.push_str("Configure a provider-backed model for real output.\n");
        out
    }
}

#[async_trait]
impl Llm for MockLlm {
    async fn stream(&self, req: LlmRequest) -> Result<LlmStream, LlmError> {
        let content = Self::render(&req);
        let mut chunks: Vec<Result<LlmChunk, LlmError>> = chunk_utf8(&content, CHUNK_BYTES)
            .into_iter()
            .map(|c| Ok(LlmChunk::text(c)))
            .collect();
        chunks.push(Ok(LlmChunk::finish("stop")));
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// Split on char boundaries into pieces of roughly `max_bytes` each.
fn chunk_utf8(s: &str, max_bytes: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in s.chars() {
        if current.len() + ch.len_utf8() > max_bytes && !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use volley_contract::Message;

    #[tokio::test]
    async fn mock_streams_text_then_stop() {
        let req = LlmRequest {
            messages: vec![Message::user("hello there")],
            tools: Vec::new(),
            max_tokens: None,
        };
        let mut stream = MockLlm.stream(req).await.unwrap();

        let mut text = String::new();
        let mut finish = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            text.push_str(&chunk.delta);
            assert!(chunk.tool_call.is_none());
            if let Some(reason) = chunk.finish_reason {
                finish = Some(reason);
            }
        }

        assert!(text.contains("messages=1 tools=0"));
        assert!(text.contains("last_user=hello there"));
        assert_eq!(finish.as_deref(), Some("stop"));
    }

    #[test]
    fn chunking_respects_multibyte_boundaries() {
        let s = "第1章".repeat(20);
        let chunks = chunk_utf8(&s, 32);
        assert!(chunks.iter().all(|c| c.len() <= 32));
        assert_eq!(chunks.concat(), s);
    }
}
