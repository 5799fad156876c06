//! Provider wire-format adapter trait
//!
//! Each upstream speaks its own JSON shape; the adapters translate message
//! extraction, response splicing, streaming delta access and error bodies so
//! the proxy pipeline stays provider-agnostic. Rewriting visits text slots in
//! a stable order, so a collect pass and a replace pass line up.

use serde_json::Value;

/// Rewrite callback: return `Some(new)` to replace the slot, `None` to keep.
pub type TextRewrite<'a> = dyn FnMut(&str) -> Option<String> + 'a;

pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// The model named in the body, if the wire format carries one.
    fn model(&self, body: &Value) -> Option<String> {
        body.get("model").and_then(Value::as_str).map(String::from)
    }

    fn set_model(&self, body: &mut Value, model: &str) {
        if let Some(map) = body.as_object_mut() {
            map.insert("model".to_string(), Value::String(model.to_string()));
        }
    }

    fn is_stream(&self, body: &Value) -> bool {
        body.get("stream").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Rewrite the ingress path for a model override. Only Google carries
    /// the model in the path.
    fn rewrite_path(&self, path: &str, _model: &str) -> String {
        path.to_string()
    }

    /// Visit every request text slot (user/assistant/system messages).
    fn rewrite_request_texts(&self, body: &mut Value, rewrite: &mut TextRewrite);

    /// Visit every response text slot.
    fn rewrite_response_texts(&self, body: &mut Value, rewrite: &mut TextRewrite);

    /// Visit the textual delta of one streaming frame, if present.
    fn rewrite_delta_text(&self, frame: &mut Value, rewrite: &mut TextRewrite);

    /// Synthesize a delta-only frame carrying flushed buffer remainder.
    fn delta_frame(&self, model: &str, text: &str) -> Value;

    /// Provider-shaped error body so client SDKs degrade gracefully.
    fn error_body(&self, status: u16, message: &str, kind: &str) -> Value;
}

/// Rewrite a slot that is either a plain string or an array of
/// `{.., "text": ...}` parts.
pub(crate) fn rewrite_string_or_parts(slot: &mut Value, rewrite: &mut TextRewrite) {
    match slot {
        Value::String(text) => {
            if let Some(replacement) = rewrite(text) {
                *text = replacement;
            }
        }
        Value::Array(parts) => {
            for part in parts {
                rewrite_text_field(part, rewrite);
            }
        }
        _ => {}
    }
}

/// Rewrite the `"text"` field of a part object, when present and textual.
pub(crate) fn rewrite_text_field(part: &mut Value, rewrite: &mut TextRewrite) {
    let Some(Value::String(text)) = part.get_mut("text") else {
        return;
    };
    if let Some(replacement) = rewrite(text) {
        *text = replacement;
    }
}

/// Collect every text slot an adapter would visit, in visit order.
pub fn collect_texts(
    adapter: &dyn ProviderAdapter,
    body: &Value,
    from_response: bool,
) -> Vec<String> {
    let mut texts = Vec::new();
    let mut body = body.clone();
    let mut collect = |text: &str| {
        texts.push(text.to_string());
        None
    };
    if from_response {
        adapter.rewrite_response_texts(&mut body, &mut collect);
    } else {
        adapter.rewrite_request_texts(&mut body, &mut collect);
    }
    texts
}
