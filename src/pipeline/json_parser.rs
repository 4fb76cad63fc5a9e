//! Parse-with-repair for the model's structured output. Strictness
//! degrades gracefully: strict parse, fenced extraction, sign
//! normalization, quote repair, then a raw-text fallback that keeps the
//! pipeline moving.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::types::Intent;

pub const EMOTION_DELTA_RANGE: std::ops::RangeInclusive<i32> = -30..=30;

#[derive(Debug, Clone, Serialize)]
pub struct ParsedResponse {
    pub reply: String,
    pub emotion_delta: i32,
    pub intent: Intent,
    pub thought: String,
    pub is_nsfw: bool,
    pub parse_success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

lazy_static! {
    /// `"emotion_delta": +20` — JSON forbids the plus sign
    static ref PLUS_PREFIX: Regex = Regex::new(r":\s*\+(\d+)").unwrap();
    static ref CODE_FENCE: Regex = Regex::new(r"```(?:json)?|```").unwrap();
}

/// Best-effort extraction of a JSON object from raw model output.
/// Shared with the emotion refinement parser.
pub fn extract_json_object(raw: &str) -> Option<serde_json::Value> {
    // 1. Strict parse
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        if value.is_object() {
            return Some(value);
        }
    }

    // 2. Largest `{...}` substring (handles fences and prose wrappers)
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    let candidate = &raw[start..=end];
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
        return Some(value);
    }

    // 3. Numeric-sign normalization
    let repaired = PLUS_PREFIX.replace_all(candidate, ": $1").to_string();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&repaired) {
        return Some(value);
    }

    // 4. Quote-style repair (single-quoted pseudo-JSON)
    let requoted = repaired.replace('\'', "\"");
    serde_json::from_str::<serde_json::Value>(&requoted).ok()
}

fn strip_raw(raw: &str) -> String {
    CODE_FENCE.replace_all(raw, "").trim().to_string()
}

pub fn parse_llm_response(raw: &str) -> ParsedResponse {
    match extract_json_object(raw) {
        Some(value) => {
            let reply = value
                .get("reply")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();

            // A JSON object without a reply is not usable output
            if reply.is_empty() {
                return fallback(raw, "parsed object missing 'reply'");
            }

            let emotion_delta = value
                .get("emotion_delta")
                .and_then(|v| v.as_i64())
                .unwrap_or(0) as i32;
            let intent = value
                .get("intent")
                .and_then(|v| v.as_str())
                .and_then(Intent::parse)
                .unwrap_or(Intent::SmallTalk);
            let thought = value
                .get("thought")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let is_nsfw = value.get("is_nsfw").and_then(|v| v.as_bool()).unwrap_or(false);

            ParsedResponse {
                reply,
                emotion_delta: emotion_delta
                    .clamp(*EMOTION_DELTA_RANGE.start(), *EMOTION_DELTA_RANGE.end()),
                intent,
                thought,
                is_nsfw,
                parse_success: true,
                parse_error: None,
            }
        }
        None => fallback(raw, "no JSON object found"),
    }
}

fn fallback(raw: &str, detail: &str) -> ParsedResponse {
    ParsedResponse {
        reply: strip_raw(raw),
        emotion_delta: 0,
        intent: Intent::SmallTalk,
        thought: String::new(),
        is_nsfw: false,
        parse_success: false,
        parse_error: Some(detail.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_json() {
        let parsed = parse_llm_response(
            r#"{"reply": "hi!", "emotion_delta": 3, "intent": "SMALL_TALK", "thought": "warm", "is_nsfw": false}"#,
        );
        assert!(parsed.parse_success);
        assert_eq!(parsed.reply, "hi!");
        assert_eq!(parsed.emotion_delta, 3);
        assert_eq!(parsed.intent, Intent::SmallTalk);
    }

    #[test]
    fn test_fenced_json() {
        let raw = "Sure, here you go:\n```json\n{\"reply\": \"hey\", \"emotion_delta\": 5}\n```";
        let parsed = parse_llm_response(raw);
        assert!(parsed.parse_success);
        assert_eq!(parsed.reply, "hey");
        assert_eq!(parsed.emotion_delta, 5);
    }

    #[test]
    fn test_plus_sign_repair() {
        let parsed = parse_llm_response(r#"{"reply": "aww", "emotion_delta": +20}"#);
        assert!(parsed.parse_success);
        assert_eq!(parsed.emotion_delta, 20);
    }

    #[test]
    fn test_single_quote_repair() {
        let parsed = parse_llm_response(r#"{'reply': 'hello', 'emotion_delta': 2}"#);
        assert!(parsed.parse_success);
        assert_eq!(parsed.reply, "hello");
    }

    #[test]
    fn test_missing_fields_defaulted() {
        let parsed = parse_llm_response(r#"{"reply": "just this"}"#);
        assert!(parsed.parse_success);
        assert_eq!(parsed.emotion_delta, 0);
        assert_eq!(parsed.intent, Intent::SmallTalk);
        assert_eq!(parsed.thought, "");
        assert!(!parsed.is_nsfw);
    }

    #[test]
    fn test_delta_clamped() {
        let parsed = parse_llm_response(r#"{"reply": "!", "emotion_delta": 90}"#);
        assert_eq!(parsed.emotion_delta, 30);
        let parsed = parse_llm_response(r#"{"reply": "!", "emotion_delta": -90}"#);
        assert_eq!(parsed.emotion_delta, -30);
    }

    #[test]
    fn test_unknown_intent_defaulted() {
        let parsed = parse_llm_response(r#"{"reply": "hm", "intent": "MOON_DANCE"}"#);
        assert_eq!(parsed.intent, Intent::SmallTalk);
    }

    #[test]
    fn test_plain_text_fallback() {
        let parsed = parse_llm_response("I just feel like talking normally today.");
        assert!(!parsed.parse_success);
        assert_eq!(parsed.reply, "I just feel like talking normally today.");
        assert!(parsed.parse_error.is_some());
    }

    #[test]
    fn test_garbage_braces_fallback() {
        let parsed = parse_llm_response("{{{{ not json");
        assert!(!parsed.parse_success);
    }
}
