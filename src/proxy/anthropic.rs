//! Anthropic messages adapter: `POST /v1/messages`.
//!
//! Messages are `messages[*].content` (string or text blocks) plus the
//! top-level `system` prompt; responses are `content[*].text`; streaming
//! deltas are `content_block_delta` events with `delta.text`.

use serde_json::Value;

use super::adapter::{rewrite_string_or_parts, rewrite_text_field, ProviderAdapter, TextRewrite};

pub struct AnthropicAdapter;

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn rewrite_request_texts(&self, body: &mut Value, rewrite: &mut TextRewrite) {
        if let Some(system) = body.get_mut("system") {
            rewrite_string_or_parts(system, rewrite);
        }
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
        let Some(blocks) = body.get_mut("content").and_then(Value::as_array_mut) else {
            return;
        };
        for block in blocks {
            if block.get("type").and_then(Value::as_str) == Some("text") {
                rewrite_text_field(block, rewrite);
            }
        }
    }

    fn rewrite_delta_text(&self, frame: &mut Value, rewrite: &mut TextRewrite) {
        if frame.get("type").and_then(Value::as_str) != Some("content_block_delta") {
            return;
        }
        if let Some(delta) = frame.get_mut("delta") {
            if delta.get("type").and_then(Value::as_str) == Some("text_delta") {
                rewrite_text_field(delta, rewrite);
            }
        }
    }

    fn delta_frame(&self, _model: &str, text: &str) -> Value {
        serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "text_delta", "text": text }
        })
    }

    fn error_body(&self, _status: u16, message: &str, kind: &str) -> Value {
        serde_json::json!({
            "type": "error",
            "error": { "type": kind, "message": message }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(texts: &mut Vec<String>) -> impl FnMut(&str) -> Option<String> + '_ {
        move |text: &str| {
            texts.push(text.to_string());
            Some(format!("[{}]", texts.len()))
        }
    }

    #[test]
    fn test_request_includes_system_prompt() {
        let mut body = serde_json::json!({
            "model": "claude-sonnet",
            "system": "stay on task",
            "messages": [
                { "role": "user", "content": [
                    { "type": "text", "text": "first" }
                ]},
                { "role": "assistant", "content": "second" }
            ]
        });
        let mut seen = Vec::new();
        AnthropicAdapter.rewrite_request_texts(&mut body, &mut capture(&mut seen));
        assert_eq!(seen, vec!["stay on task", "first", "second"]);
        assert_eq!(body["system"], "[1]");
    }

    #[test]
    fn test_response_skips_tool_use_blocks() {
        let mut body = serde_json::json!({
            "content": [
                { "type": "text", "text": "hello" },
                { "type": "tool_use", "input": { "x": 1 } }
            ]
        });
        let mut seen = Vec::new();
        AnthropicAdapter.rewrite_response_texts(&mut body, &mut capture(&mut seen));
        assert_eq!(seen, vec!["hello"]);
        assert_eq!(body["content"][1]["input"]["x"], 1);
    }

    #[test]
    fn test_delta_rewrite_text_only() {
        let mut frame = serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "text_delta", "text": "delta" }
        });
        let mut seen = Vec::new();
        AnthropicAdapter.rewrite_delta_text(&mut frame, &mut capture(&mut seen));
        assert_eq!(frame["delta"]["text"], "[1]");

        // Tool-call argument deltas pass through unchanged
        let mut frame = serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "input_json_delta", "partial_json": "{\"a\":" }
        });
        let mut seen = Vec::new();
        AnthropicAdapter.rewrite_delta_text(&mut frame, &mut capture(&mut seen));
        assert!(seen.is_empty());

        // Non-delta events are ignored
        let mut frame = serde_json::json!({ "type": "message_start" });
        let mut seen = Vec::new();
        AnthropicAdapter.rewrite_delta_text(&mut frame, &mut capture(&mut seen));
        assert!(seen.is_empty());
    }

    #[test]
    fn test_error_body_shape() {
        let err = AnthropicAdapter.error_body(451, "blocked", "policy_blocked");
        assert_eq!(err["type"], "error");
        assert_eq!(err["error"]["message"], "blocked");
    }
}
