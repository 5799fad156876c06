//! OpenAI chat-completions adapter: `POST /v1/chat/completions`.
//!
//! Messages are `messages[*].content`, either a plain string or an array of
//! typed parts; responses are `choices[*].message.content`; streaming deltas
//! are `choices[*].delta.content`.

use serde_json::Value;

use super::adapter::{rewrite_string_or_parts, ProviderAdapter, TextRewrite};

pub struct OpenAiAdapter;

impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn rewrite_request_texts(&self, body: &mut Value, rewrite: &mut TextRewrite) {
        let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
            return;
        };
        for message in messages {
            if let Some(content) = message.get_mut("content") {
                rewrite_string_or_parts(content, rewrite);
            }
        }
    }

    fn rewrite_response_texts(&self, body: &mut Value, rewrite: &mut TextRewrite) {
        let Some(choices) = body.get_mut("choices").and_then(Value::as_array_mut) else {
            return;
        };
        for choice in choices {
            if let Some(content) = choice.pointer_mut("/message/content") {
                rewrite_string_or_parts(content, rewrite);
            }
        }
    }

    fn rewrite_delta_text(&self, frame: &mut Value, rewrite: &mut TextRewrite) {
        let Some(choices) = frame.get_mut("choices").and_then(Value::as_array_mut) else {
            return;
        };
        for choice in choices {
            if let Some(Value::String(text)) = choice.pointer_mut("/delta/content") {
                if let Some(replacement) = rewrite(text) {
                    *text = replacement;
                }
            }
        }
    }

    fn delta_frame(&self, model: &str, text: &str) -> Value {
        serde_json::json!({
            "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            "object": "chat.completion.chunk",
            "created": chrono::Utc::now().timestamp(),
            "model": model,
            "choices": [{
                "index": 0,
                "delta": { "content": text },
                "finish_reason": null
            }]
        })
    }

    fn error_body(&self, _status: u16, message: &str, kind: &str) -> Value {
        serde_json::json!({
            "error": {
                "message": message,
                "type": kind,
                "code": null
            }
        })
    }
}
