use crate::domain::contract::ModelSentimentPayload;
use anyhow::Context;

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```).
        let mut inner = trimmed;
        if let Some(after_first) = inner.splitn(2, '\n').nth(1) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    // Best-effort extraction: first '{' to last '}'.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

pub fn parse_payload(text: &str) -> anyhow::Result<ModelSentimentPayload> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    serde_json::from_str::<ModelSentimentPayload>(&json_str)
        .with_context(|| format!("model output is not valid JSON for sentiment schema: {json_str}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_json_handles_fenced_blocks() {
        let body = "{\"score\":1}";
        let fenced = format!("```json\n{body}\n```\n");
        assert_eq!(extract_json(&fenced), Some(body.to_string()));
    }

    #[test]
    fn extract_json_falls_back_to_braces() {
        let s = "prefix {\"score\":1} suffix";
        assert_eq!(extract_json(s), Some("{\"score\":1}".to_string()));
    }

    #[test]
    fn parse_payload_accepts_valid_json() {
        let text = json!({
            "score": -3,
            "positive_factors": ["new contract win"],
            "risk_factors": ["margin pressure", "weak guidance"],
            "reasoning": "mostly negative coverage"
        })
        .to_string();

        let payload = parse_payload(&text).unwrap();
        assert_eq!(payload.score, -3);
        assert_eq!(payload.risk_factors.len(), 2);
    }

    #[test]
    fn parse_payload_accepts_missing_optional_keys() {
        let payload = parse_payload("{\"score\": 0}").unwrap();
        assert_eq!(payload.score, 0);
        assert!(payload.positive_factors.is_empty());
        assert!(payload.reasoning.is_none());
    }

    #[test]
    fn parse_payload_rejects_non_integer_score() {
        assert!(parse_payload("{\"score\": \"very positive\"}").is_err());
        assert!(parse_payload("{\"score\": 1.5}").is_err());
        assert!(parse_payload("no json here").is_err());
    }
}
