use serde::de::DeserializeOwned;

use crate::error::ModelError;

/// Locates the JSON object inside a free-text completion.
///
/// Models wrap structured answers in markdown fences or surround them with
/// prose; this strips both and returns the outermost `{ ... }` span.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let clean = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let start = clean.find('{')?;
    let end = clean.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&clean[start..=end])
}

/// Deserializes the JSON object embedded in `text`.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, ModelError> {
    let block = extract_json_block(text)
        .ok_or_else(|| ModelError::Unparseable("no JSON object in completion".to_string()))?;

    serde_json::from_str(block).map_err(|e| ModelError::Unparseable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        score: f64,
        summary: String,
    }

    #[test]
    fn strips_markdown_fences() {
        let text = "```json\n{\"score\": 0.4, \"summary\": \"ok\"}\n```";
        let reply: Reply = parse_structured(text).unwrap();
        assert_eq!(reply, Reply { score: 0.4, summary: "ok".into() });
    }

    #[test]
    fn finds_object_inside_prose() {
        let text = "Sure! Here is the result: {\"score\": -0.5, \"summary\": \"weak\"} Hope it helps.";
        let reply: Reply = parse_structured(text).unwrap();
        assert_eq!(reply.score, -0.5);
    }

    #[test]
    fn rejects_text_without_json() {
        let err = parse_structured::<Reply>("The market looks bullish overall.").unwrap_err();
        assert!(matches!(err, ModelError::Unparseable(_)));
    }

    #[test]
    fn rejects_json_missing_fields() {
        let err = parse_structured::<Reply>("{\"score\": 1.0}").unwrap_err();
        assert!(matches!(err, ModelError::Unparseable(_)));
    }
}
