//! Post-apply verification: cheap, fast checks that gate loop progress.
//!
//! Verification failure is an expected outcome that drives the retry loop,
//! not an error. The standard verifier combines per-edit syntax checks with
//! an optional process health probe; both produce diagnostic text.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::changeset::ChangeSet;
use crate::policy::PolicyDocument;

/// Outcome of one verification pass.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub passed: bool,
    pub detail: String,
}

impl Verdict {
    pub fn pass(detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Trait for verifiers, so the run controller can be exercised with scripted
/// verdicts in tests.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        changeset: &ChangeSet,
        tree: &Path,
        policy: &PolicyDocument,
    ) -> Verdict;
}

/// Standard verifier: syntax validity of edited sources plus an optional
/// health-endpoint probe.
pub struct StandardVerifier {
    health_url: Option<String>,
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl StandardVerifier {
    pub fn new(health_url: Option<String>) -> Self {
        Self {
            health_url,
            client: reqwest::Client::new(),
            probe_timeout: Duration::from_secs(5),
        }
    }

    async fn probe_health(&self, url: &str, policy: &PolicyDocument) -> Result<(), String> {
        let host = reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .ok_or_else(|| format!("invalid health URL '{}'", url))?;

        if !policy.authorize_host(&host) {
            return Err(format!("policy denies contacting host '{}'", host));
        }

        let response = self
            .client
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| format!("health probe failed: {}", e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("health probe returned HTTP {}", response.status()))
        }
    }
}

#[async_trait]
impl Verifier for StandardVerifier {
    async fn verify(
        &self,
        changeset: &ChangeSet,
        tree: &Path,
        policy: &PolicyDocument,
    ) -> Verdict {
        // Syntax checks run against the tree as written, not the proposed
        // content, so they also catch apply-phase corruption.
        for edit in &changeset.edits {
            let on_disk = match std::fs::read_to_string(tree.join(&edit.path)) {
                Ok(contents) => contents,
                Err(e) => {
                    return Verdict::fail(format!("cannot read applied file '{}': {}", edit.path, e))
                }
            };
            if let Err(reason) = check_syntax(&edit.path, &on_disk) {
                return Verdict::fail(format!("syntax check failed for '{}': {}", edit.path, reason));
            }
        }

        if let Some(url) = &self.health_url {
            if let Err(reason) = self.probe_health(url, policy).await {
                return Verdict::fail(reason);
            }
        }

        Verdict::pass(format!("{} file(s) verified", changeset.edits.len()))
    }
}

/// Cheap syntax validity check keyed on file extension.
///
/// JSON gets a strict parse; code-like files get a balanced-delimiter scan
/// (string literals and line comments excluded). Everything else passes.
pub fn check_syntax(path: &str, content: &str) -> Result<(), String> {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension {
        "json" => serde_json::from_str::<serde_json::Value>(content)
            .map(|_| ())
            .map_err(|e| format!("invalid JSON: {}", e)),
        "rs" => check_balanced(content, true),
        "py" | "js" | "ts" | "go" | "c" | "h" | "cpp" | "java" | "toml" | "yaml" | "yml" => {
            check_balanced(content, false)
        }
        _ => Ok(()),
    }
}

/// Scan for balanced `()[]{}` pairs, skipping string literals and line
/// comments. This is deliberately conservative: it catches truncated model
/// output, not every syntax error.
///
/// With `rust_tokens` set, `'` marks a lifetime or a short char literal
/// rather than opening a string, and `#` starts an attribute, not a comment.
fn check_balanced(content: &str, rust_tokens: bool) -> Result<(), String> {
    let chars: Vec<char> = content.chars().collect();
    let mut stack: Vec<char> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];

        if (ch == '/' && chars.get(i + 1) == Some(&'/')) || (ch == '#' && !rust_tokens) {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if ch == '"' || (ch == '\'' && !rust_tokens) {
            i += 1;
            while i < chars.len() {
                if chars[i] == '\\' {
                    i += 2;
                } else if chars[i] == ch {
                    break;
                } else {
                    i += 1;
                }
            }
            i += 1;
            continue;
        }

        if ch == '\'' {
            // Lifetime mark unless it closes as a char literal nearby.
            if chars.get(i + 1) == Some(&'\\') {
                i += 2;
                while i < chars.len() && chars[i] != '\'' {
                    i += 1;
                }
                i += 1;
            } else if chars.get(i + 2) == Some(&'\'') {
                i += 3;
            } else {
                i += 1;
            }
            continue;
        }

        match ch {
            '(' | '[' | '{' => stack.push(ch),
            ')' | ']' | '}' => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some(open) if open == expected => {}
                    Some(open) => {
                        return Err(format!("mismatched delimiter: '{}' closed by '{}'", open, ch))
                    }
                    None => return Err(format!("unmatched closing '{}'", ch)),
                }
            }
            _ => {}
        }
        i += 1;
    }

    if let Some(open) = stack.pop() {
        return Err(format!("unclosed '{}'", open));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::FileEdit;

    #[test]
    fn json_syntax_check() {
        assert!(check_syntax("config.json", r#"{"a": 1}"#).is_ok());
        assert!(check_syntax("config.json", r#"{"a": }"#).is_err());
    }

    #[test]
    fn balanced_delimiters_pass() {
        assert!(check_syntax("main.py", "def f(x):\n    return [x, {1: 2}]\n").is_ok());
        assert!(check_syntax("lib.rs", "fn main() { let v = vec![1, 2]; }\n").is_ok());
    }

    #[test]
    fn truncated_output_fails() {
        assert!(check_syntax("main.py", "def f(x):\n    return [x, {1: 2}\n").is_err());
        assert!(check_syntax("lib.rs", "fn main() { let v = (1;\n").is_err());
    }

    #[test]
    fn strings_and_comments_are_skipped() {
        assert!(check_syntax("main.py", "s = \"unbalanced ( in string\"\n# comment with ]\n").is_ok());
        assert!(check_syntax("lib.rs", "// unbalanced { in comment\nfn f() {}\n").is_ok());
    }

    #[test]
    fn rust_lifetimes_are_not_string_openers() {
        assert!(check_syntax("lib.rs", "fn first<'a>(v: &'a [u8]) -> u8 { v[0] }\n").is_ok());
        assert!(check_syntax("lib.rs", "struct Held<'a> { inner: &'a str }\n").is_ok());
        assert!(check_syntax("lib.rs", "fn pair<'a, 'b>(x: &'a str, y: &'b str) {}\n").is_ok());
    }

    #[test]
    fn rust_char_literals_are_skipped() {
        assert!(check_syntax("lib.rs", "fn f() -> char { '(' }\n").is_ok());
        assert!(check_syntax("lib.rs", "fn f() -> char { '\\n' }\n").is_ok());
    }

    #[test]
    fn rust_multiline_attributes_are_scanned() {
        assert!(check_syntax("lib.rs", "#[derive(\n    Debug,\n    Clone,\n)]\nstruct S;\n").is_ok());
    }

    #[test]
    fn python_single_quoted_strings_are_skipped() {
        assert!(check_syntax("main.py", "s = 'unbalanced ( here'\n").is_ok());
    }

    #[test]
    fn unknown_extensions_pass() {
        assert!(check_syntax("notes.md", "anything ( goes").is_ok());
    }

    #[tokio::test]
    async fn verifier_reads_applied_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("app")).unwrap();
        std::fs::write(dir.path().join("app/ok.json"), r#"{"fine": true}"#).unwrap();

        let changeset = ChangeSet {
            explanation: String::new(),
            commit_message: String::new(),
            edits: vec![FileEdit {
                path: "app/ok.json".to_string(),
                content: String::new(),
            }],
        };

        let verifier = StandardVerifier::new(None);
        let verdict = verifier
            .verify(&changeset, dir.path(), &PolicyDocument::unrestricted())
            .await;
        assert!(verdict.passed, "{}", verdict.detail);
    }

    #[tokio::test]
    async fn missing_applied_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let changeset = ChangeSet {
            explanation: String::new(),
            commit_message: String::new(),
            edits: vec![FileEdit {
                path: "app/gone.py".to_string(),
                content: String::new(),
            }],
        };

        let verifier = StandardVerifier::new(None);
        let verdict = verifier
            .verify(&changeset, dir.path(), &PolicyDocument::unrestricted())
            .await;
        assert!(!verdict.passed);
        assert!(verdict.detail.contains("gone.py"));
    }
}
