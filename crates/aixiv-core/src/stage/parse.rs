//! Extraction of structured output from model text.

use serde::de::DeserializeOwned;

use crate::domain::error::StageError;

/// Locate the JSON document in `text`.
///
/// Prefers a fenced ```json block, then the outermost `{...}` span, then
/// the whole text.
pub(crate) fn json_slice(text: &str) -> &str {
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(a), Some(b)) if a < b => &text[a..=b],
        _ => text.trim(),
    }
}

/// Parse the JSON document in `text` as `T`, or fail with `InvalidOutput`.
pub(crate) fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T, StageError> {
    serde_json::from_str(json_slice(text))
        .map_err(|e| StageError::InvalidOutput(format!("expected JSON output: {e}")))
}

/// Truncate to `max` chars for summaries.
pub(crate) fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut s: String = text.chars().take(max).collect();
        s.push('…');
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Score {
        score: f64,
    }

    #[test]
    fn fenced_block_wins() {
        let text = "Here you go:\n```json\n{\"score\": 7}\n```\nthanks {not json}";
        assert_eq!(extract_json::<Score>(text).unwrap(), Score { score: 7.0 });
    }

    #[test]
    fn bare_object_inside_prose() {
        let text = "Result: {\"score\": 3.5} end";
        assert_eq!(extract_json::<Score>(text).unwrap().score, 3.5);
    }

    #[test]
    fn prose_only_is_invalid_output() {
        let err = extract_json::<Score>("I think it is good").unwrap_err();
        assert!(matches!(err, StageError::InvalidOutput(_)));
    }

    #[test]
    fn clip_marks_truncation() {
        assert_eq!(clip("abc", 5), "abc");
        assert_eq!(clip("abcdef", 3), "abc…");
    }
}
