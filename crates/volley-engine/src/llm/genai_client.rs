//! Provider adapter over the `genai` client.
//!
//! Maps the runtime's [`LlmRequest`] onto a `ChatRequest` and folds the
//! provider's `ChatStreamEvent`s into [`LlmChunk`]s. The rest of the engine
//! never sees `genai` types.

use async_trait::async_trait;
use futures::StreamExt;
use genai::chat::{
    ChatMessage, ChatOptions, ChatRequest, ChatStreamEvent, ContentPart, MessageContent,
    ToolResponse,
};
use genai::Client;
use serde_json::Value;
use volley_contract::{Message, Role, ToolCallRequest, ToolSchema};

use super::{Llm, LlmChunk, LlmError, LlmRequest, LlmStream};

/// A provider-backed model addressed by `genai` model id
/// (e.g. `gpt-4o-mini`, `deepseek-chat`). Credentials come from the
/// provider's usual environment variables.
pub struct GenaiLlm {
    client: Client,
    model: String,
    options: Option<ChatOptions>,
}

impl GenaiLlm {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::default(),
            model: model.into(),
            options: None,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Llm for GenaiLlm {
    async fn stream(&self, req: LlmRequest) -> Result<LlmStream, LlmError> {
        let chat_req = build_chat_request(&req);

        let mut options = self.options.clone();
        if let Some(max) = req.max_tokens {
            options = Some(options.unwrap_or_default().with_max_tokens(max));
        }

        let resp = self
            .client
            .exec_chat_stream(&self.model, chat_req, options.as_ref())
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))?;

        let mut inner = resp.stream;
        let out = async_stream::stream! {
            while let Some(ev) = inner.next().await {
                let ev = match ev {
                    Ok(ev) => ev,
                    Err(e) => {
                        yield Err(LlmError::Stream(e.to_string()));
                        return;
                    }
                };
                match ev {
                    ChatStreamEvent::Chunk(chunk) => {
                        if !chunk.content.is_empty() {
                            yield Ok(LlmChunk::text(chunk.content));
                        }
                    }
                    ChatStreamEvent::ToolCallChunk(tool_chunk) => {
                        // Argument fragments arrive incrementally; surface
                        // them for display only. The authoritative calls come
                        // from the end event.
                        let fragment = tool_chunk.tool_call.fn_arguments.to_string();
                        if !fragment.is_empty() && fragment != "null" {
                            yield Ok(LlmChunk::tool_arg(fragment));
                        }
                    }
                    ChatStreamEvent::End(end) => {
                        let mut had_calls = false;
                        if let Some(calls) = end.captured_tool_calls() {
                            for call in calls {
                                had_calls = true;
                                yield Ok(LlmChunk::tool_call(ToolCallRequest::new(
                                    call.call_id.clone(),
                                    call.fn_name.clone(),
                                    call.fn_arguments.to_string(),
                                )));
                            }
                        }
                        let reason = if had_calls { "tool_calls" } else { "stop" };
                        yield Ok(LlmChunk::finish(reason));
                    }
                    _ => {}
                }
            }
        };
        Ok(Box::pin(out))
    }
}

fn build_chat_request(req: &LlmRequest) -> ChatRequest {
    let messages: Vec<ChatMessage> = req.messages.iter().map(to_chat_message).collect();
    let mut request = ChatRequest::new(messages);

    if !req.tools.is_empty() {
        let tools: Vec<genai::chat::Tool> = req.tools.iter().map(to_genai_tool).collect();
        request = request.with_tools(tools);
    }
    request
}

fn to_chat_message(msg: &Message) -> ChatMessage {
    match msg.role {
        Role::System => ChatMessage::system(&msg.content),
        Role::User => ChatMessage::user(&msg.content),
        Role::Assistant => {
            if msg.tool_calls.is_empty() {
                ChatMessage::assistant(&msg.content)
            } else {
                let mut content = MessageContent::from(msg.content.as_str());
                for call in &msg.tool_calls {
                    let arguments: Value =
                        serde_json::from_str(&call.args).unwrap_or(Value::Null);
                    content.push(ContentPart::ToolCall(genai::chat::ToolCall {
                        call_id: call.id.clone(),
                        fn_name: call.name.clone(),
                        fn_arguments: arguments,
                    }));
                }
                ChatMessage::assistant(content)
            }
        }
        Role::Tool => {
            let response = ToolResponse {
                call_id: msg.tool_call_id.clone().unwrap_or_default(),
                content: msg.content.clone(),
            };
            ChatMessage::from(response)
        }
    }
}

fn to_genai_tool(schema: &ToolSchema) -> genai::chat::Tool {
    genai::chat::Tool::new(&schema.name)
        .with_description(&schema.description)
        .with_schema(schema.parameters.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_without_tools_omits_tool_table() {
        let req = LlmRequest {
            messages: vec![Message::user("hi")],
            tools: Vec::new(),
            max_tokens: None,
        };
        let chat_req = build_chat_request(&req);
        assert_eq!(chat_req.messages.len(), 1);
        assert!(chat_req.tools.is_none());
    }

    #[test]
    fn request_converts_schemas_and_history() {
        let req = LlmRequest {
            messages: vec![
                Message::system("be terse"),
                Message::user("write it"),
                Message::assistant_with_tool_calls(
                    "",
                    vec![ToolCallRequest::new("c1", "write_file", r#"{"path":"a"}"#)],
                ),
                Message::tool("c1", "ok"),
            ],
            tools: vec![ToolSchema {
                name: "write_file".into(),
                description: "Write a file".into(),
                parameters: json!({"type": "object", "properties": {}}),
            }],
            max_tokens: Some(800),
        };
        let chat_req = build_chat_request(&req);
        assert_eq!(chat_req.messages.len(), 4);
        let tools = chat_req.tools.as_ref().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "write_file");
    }
}
