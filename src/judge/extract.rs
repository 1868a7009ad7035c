//! Snippet Extractor: pull the first fenced code block out of free-form text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// First fenced region. Either a bare `python` tag, or any tag that sits
/// alone on the fence line, or no tag at all.
static FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)```(?:(python)\b|([a-z][\w+#.-]*)[ \t]*\r?\n)?\s*(.*?)```")
        .expect("fence pattern is a valid regex")
});

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedSnippet {
    /// Language tag on the fence, as written
    pub language: Option<String>,
    pub code: String,
    /// Whether a fence was found at all
    pub fenced: bool,
}

/// Locate the first fenced block in `text`.
///
/// Without a fence the whole input, trimmed, is the snippet.
pub fn extract_snippet(text: &str) -> ExtractedSnippet {
    match FENCE_RE.captures(text) {
        Some(caps) => ExtractedSnippet {
            language: caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_string()),
            code: caps
                .get(3)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
            fenced: true,
        },
        None => ExtractedSnippet {
            language: None,
            code: text.trim().to_string(),
            fenced: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfenced_text_is_the_snippet() {
        let got = extract_snippet("  print(\"hello\")\n\n");
        assert_eq!(got.code, "print(\"hello\")");
        assert_eq!(got.language, None);
        assert!(!got.fenced);
    }

    #[test]
    fn python_fence_in_prose() {
        let text = "Here you go:\n```python\nfor i in range(3):\n    print(i)\n```\nDone.";
        let got = extract_snippet(text);
        assert_eq!(got.language.as_deref(), Some("python"));
        assert_eq!(got.code, "for i in range(3):\n    print(i)");
    }

    #[test]
    fn tag_match_ignores_case() {
        let got = extract_snippet("```PYTHON\nprint(1)\n```");
        assert_eq!(got.language.as_deref(), Some("PYTHON"));
        assert_eq!(got.code, "print(1)");
    }

    #[test]
    fn untagged_fence() {
        let got = extract_snippet("```\nprint(1)\n```");
        assert_eq!(got.language, None);
        assert_eq!(got.code, "print(1)");
        assert!(got.fenced);
    }

    #[test]
    fn other_language_tag_is_reported() {
        let got = extract_snippet("```javascript\nconsole.log(1)\n```");
        assert_eq!(got.language.as_deref(), Some("javascript"));
        assert_eq!(got.code, "console.log(1)");

        let got = extract_snippet("```c++\nint main() {}\n```");
        assert_eq!(got.language.as_deref(), Some("c++"));
    }

    #[test]
    fn inline_fence_without_newline() {
        let got = extract_snippet("```print(42)```");
        assert_eq!(got.language, None);
        assert_eq!(got.code, "print(42)");

        let got = extract_snippet("```python print(42)```");
        assert_eq!(got.language.as_deref(), Some("python"));
        assert_eq!(got.code, "print(42)");
    }

    #[test]
    fn first_block_wins() {
        let got = extract_snippet("```python\nprint(1)\n```\n```js\nx\n```");
        assert_eq!(got.code, "print(1)");
    }

    #[test]
    fn extraction_is_pure() {
        let text = "```py\nprint(2)\n```";
        assert_eq!(extract_snippet(text), extract_snippet(text));
        assert_eq!(extract_snippet(text).language.as_deref(), Some("py"));
    }
}
