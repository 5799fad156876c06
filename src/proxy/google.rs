//! Google generateContent adapter:
//! `POST /v1{beta,}/models/{model}:generateContent`.
//!
//! Messages are `contents[*].parts[*].text` plus
//! `systemInstruction.parts[*].text`; responses and streaming frames are
//! `candidates[*].content.parts[*].text`. The model is named in the URL
//! path, not the body.

use serde_json::Value;

use super::adapter::{rewrite_text_field, ProviderAdapter, TextRewrite};

pub struct GoogleAdapter;

impl GoogleAdapter {
    fn rewrite_candidates(body: &mut Value, rewrite: &mut TextRewrite) {
        let Some(candidates) = body.get_mut("candidates").and_then(Value::as_array_mut) else {
            return;
        };
        for candidate in candidates {
            let Some(parts) = candidate
                .pointer_mut("/content/parts")
                .and_then(Value::as_array_mut)
            else {
                continue;
            };
            for part in parts {
                rewrite_text_field(part, rewrite);
            }
        }
    }
}

impl ProviderAdapter for GoogleAdapter {
    fn name(&self) -> &'static str {
        "google"
    }

    fn model(&self, _body: &Value) -> Option<String> {
        None
    }

    fn set_model(&self, _body: &mut Value, _model: &str) {}

    /// Streaming is signalled by the `:streamGenerateContent` action in the
    /// path, not a body flag.
    fn is_stream(&self, _body: &Value) -> bool {
        false
    }

    fn rewrite_path(&self, path: &str, model: &str) -> String {
        let Some(models_at) = path.find("/models/") else {
            return path.to_string();
        };
        let after = models_at + "/models/".len();
        let rest = &path[after..];
        let Some(action_at) = rest.find(':') else {
            return path.to_string();
        };
        format!("{}{model}{}", &path[..after], &rest[action_at..])
    }

    fn rewrite_request_texts(&self, body: &mut Value, rewrite: &mut TextRewrite) {
        for key in ["systemInstruction", "system_instruction"] {
            if let Some(parts) = body
                .get_mut(key)
                .and_then(|instruction| instruction.get_mut("parts"))
                .and_then(Value::as_array_mut)
            {
                for part in parts {
                    rewrite_text_field(part, rewrite);
                }
            }
        }
        let Some(contents) = body.get_mut("contents").and_then(Value::as_array_mut) else {
            return;
        };
        for content in contents {
            if let Some(parts) = content.get_mut("parts").and_then(Value::as_array_mut) {
                for part in parts {
                    rewrite_text_field(part, rewrite);
                }
            }
        }
    }

    fn rewrite_response_texts(&self, body: &mut Value, rewrite: &mut TextRewrite) {
        Self::rewrite_candidates(body, rewrite);
    }

    fn rewrite_delta_text(&self, frame: &mut Value, rewrite: &mut TextRewrite) {
        Self::rewrite_candidates(frame, rewrite);
    }

    fn delta_frame(&self, _model: &str, text: &str) -> Value {
        serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }], "role": "model" },
                "index": 0
            }]
        })
    }

    fn error_body(&self, status: u16, message: &str, kind: &str) -> Value {
        serde_json::json!({
            "error": {
                "code": status,
                "message": message,
                "status": kind
            }
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
    fn test_request_rewrite_covers_system_instruction() {
        let mut body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": "sys" }] },
            "contents": [
                { "role": "user", "parts": [{ "text": "one" }, { "text": "two" }] }
            ]
        });
        let mut seen = Vec::new();
        GoogleAdapter.rewrite_request_texts(&mut body, &mut capture(&mut seen));
        assert_eq!(seen, vec!["sys", "one", "two"]);
        assert_eq!(body["contents"][0]["parts"][1]["text"], "[3]");
    }

    #[test]
    fn test_response_rewrite() {
        let mut response = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "reply" }], "role": "model" }
            }]
        });
        let mut seen = Vec::new();
        GoogleAdapter.rewrite_response_texts(&mut response, &mut capture(&mut seen));
        assert_eq!(
            response["candidates"][0]["content"]["parts"][0]["text"],
            "[1]"
        );
    }

    #[test]
    fn test_rewrite_path_swaps_model() {
        let path = "/v1beta/models/gemini-pro:generateContent?alt=sse";
        let rewritten = GoogleAdapter.rewrite_path(path, "internal:gemini-flash");
        assert_eq!(
            rewritten,
            "/v1beta/models/internal:gemini-flash:generateContent?alt=sse"
        );

        // Paths without a model segment pass through
        assert_eq!(GoogleAdapter.rewrite_path("/v1/other", "m"), "/v1/other");
    }

    #[test]
    fn test_error_body_shape() {
        let err = GoogleAdapter.error_body(451, "blocked", "FAILED_PRECONDITION");
        assert_eq!(err["error"]["code"], 451);
        assert_eq!(err["error"]["status"], "FAILED_PRECONDITION");
    }
}
