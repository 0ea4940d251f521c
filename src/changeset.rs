//! Strict parsing of provider output into a structured change-set.
//!
//! Model output is untrusted text. The parser has one well-defined failure
//! mode: anything that does not decode into the expected JSON shape is a
//! [`ParseError`], never a panic and never a partial change-set.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One proposed file edit: the full new content for a path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEdit {
    pub path: String,
    pub content: String,
}

/// One iteration's proposed mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeSet {
    /// Why the model proposes these edits.
    #[serde(default)]
    pub explanation: String,
    /// Commit-style summary of the change.
    #[serde(default)]
    pub commit_message: String,
    /// Ordered file edits.
    #[serde(rename = "files")]
    pub edits: Vec<FileEdit>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("provider output is not valid changeset JSON: {0}")]
    Malformed(String),

    #[error("changeset proposes no file edits")]
    NoEdits,

    #[error("changeset contains an edit with an empty path")]
    EmptyPath,
}

/// Parse raw model text into a [`ChangeSet`].
///
/// Models routinely wrap JSON in Markdown code fences or surround it with
/// prose; we strip fences and trim to the outermost JSON object before strict
/// decoding. Anything beyond that tolerance is rejected.
pub fn parse(text: &str) -> Result<ChangeSet, ParseError> {
    let candidate = extract_json(text);

    let changeset: ChangeSet = serde_json::from_str(candidate)
        .map_err(|e| ParseError::Malformed(e.to_string()))?;

    if changeset.edits.is_empty() {
        return Err(ParseError::NoEdits);
    }
    if changeset.edits.iter().any(|e| e.path.trim().is_empty()) {
        return Err(ParseError::EmptyPath);
    }

    Ok(changeset)
}

/// Trim the text down to the outermost `{ ... }` span, stripping any code
/// fences around it. Returns the original text when no braces are found so
/// the JSON decoder produces the real error message.
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();

    let without_fence = if let Some(rest) = trimmed.strip_prefix("```") {
        // Drop the fence language line ("json", "") and the closing fence.
        let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
        body.rsplit_once("```").map(|(b, _)| b).unwrap_or(body)
    } else {
        trimmed
    };

    match (without_fence.find('{'), without_fence.rfind('}')) {
        (Some(start), Some(end)) if start < end => &without_fence[start..=end],
        _ => without_fence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "explanation": "add greeting",
        "commit_message": "Add hello module",
        "files": [{"path": "app/hello.py", "content": "print('hi')\n"}]
    }"#;

    #[test]
    fn parses_plain_json() {
        let cs = parse(VALID).unwrap();
        assert_eq!(cs.commit_message, "Add hello module");
        assert_eq!(cs.edits.len(), 1);
        assert_eq!(cs.edits[0].path, "app/hello.py");
    }

    #[test]
    fn parses_fenced_json() {
        let fenced = format!("```json\n{}\n```", VALID);
        let cs = parse(&fenced).unwrap();
        assert_eq!(cs.edits.len(), 1);
    }

    #[test]
    fn parses_json_with_surrounding_prose() {
        let noisy = format!("Here is my proposal:\n{}\nLet me know!", VALID);
        let cs = parse(&noisy).unwrap();
        assert_eq!(cs.edits[0].path, "app/hello.py");
    }

    #[test]
    fn rejects_non_json() {
        let err = parse("I could not come up with a change.").unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn rejects_empty_edit_list() {
        let err = parse(r#"{"explanation": "", "commit_message": "", "files": []}"#).unwrap_err();
        assert!(matches!(err, ParseError::NoEdits));
    }

    #[test]
    fn rejects_empty_path() {
        let err = parse(r#"{"files": [{"path": " ", "content": "x"}]}"#).unwrap_err();
        assert!(matches!(err, ParseError::EmptyPath));
    }

    #[test]
    fn missing_optional_fields_default() {
        let cs = parse(r#"{"files": [{"path": "a.txt", "content": "x"}]}"#).unwrap();
        assert_eq!(cs.explanation, "");
        assert_eq!(cs.commit_message, "");
    }

    #[test]
    fn edit_order_is_preserved() {
        let cs = parse(
            r#"{"files": [
                {"path": "b.txt", "content": "2"},
                {"path": "a.txt", "content": "1"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(cs.edits[0].path, "b.txt");
        assert_eq!(cs.edits[1].path, "a.txt");
    }
}
