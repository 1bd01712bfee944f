//! AI SDK data stream protocol (v1) encoding of answer events.
//!
//! Each part is one line, `<type>:<json>\n`:
//! `0` text, `2` data array, `3` error, `e` finish step, `d` finish message.

use medichat_core::{AnswerEvent, Usage};
use serde_json::{Value, json};

pub const STREAM_HEADER: &str = "x-vercel-ai-data-stream";
pub const STREAM_VERSION: &str = "v1";

pub fn encode_event(event: &AnswerEvent) -> String {
    match event {
        AnswerEvent::Data(data) => part('2', &json!([data])),
        AnswerEvent::Text(text) => part('0', &json!(text)),
        AnswerEvent::Finish { reason, usage } => {
            let usage = usage_json(usage.as_ref());
            let mut out = part(
                'e',
                &json!({ "finishReason": reason, "usage": usage, "isContinued": false }),
            );
            out.push_str(&part('d', &json!({ "finishReason": reason, "usage": usage })));
            out
        }
        AnswerEvent::Error(e) => part('3', &json!(e.to_string())),
    }
}

fn part(code: char, value: &Value) -> String {
    format!("{code}:{value}\n")
}

fn usage_json(usage: Option<&Usage>) -> Value {
    match usage {
        Some(usage) => json!({
            "promptTokens": usage.prompt_tokens,
            "completionTokens": usage.completion_tokens,
        }),
        None => json!({ "promptTokens": Value::Null, "completionTokens": Value::Null }),
    }
}
