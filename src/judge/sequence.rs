//! Sequence Comparator: integers in captured output versus an expected list.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static INTEGER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+").expect("integer pattern is a valid regex"));

/// Reason reported for any difference between the two sequences.
pub const MISMATCH_REASON: &str = "Mismatch";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub matched: bool,
    pub observed: Vec<i64>,
    pub expected: Vec<i64>,
    /// Empty when matched, otherwise "Mismatch"
    pub reason: String,
}

/// Parse one token matched by the integer pattern.
///
/// Values beyond the `i64` range saturate; they can never equal an expected
/// in-range value, so the comparison still reports a mismatch.
fn parse_token(token: &str) -> i64 {
    token.parse().unwrap_or(if token.starts_with('-') {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Integers in `text`, left to right. Everything else is ignored.
pub fn parse_integers(text: &str) -> Vec<i64> {
    INTEGER_RE
        .find_iter(text)
        .map(|m| parse_token(m.as_str()))
        .collect()
}

/// Compare the integers found in `captured` with `expected`, in order.
pub fn compare_sequence(captured: &str, expected: &[i64]) -> ComparisonResult {
    let observed = parse_integers(captured);
    let matched = observed == expected;
    ComparisonResult {
        matched,
        observed,
        expected: expected.to_vec(),
        reason: if matched {
            String::new()
        } else {
            MISMATCH_REASON.to_string()
        },
    }
}

/// Parse a comma/space separated list such as `0,1,1,2` or `[0, 1, 1]`.
pub fn parse_expected(list: &str) -> Result<Vec<i64>, String> {
    list.split(|c: char| c == ',' || c.is_whitespace() || c == '[' || c == ']')
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .map_err(|_| format!("not an integer: {part}"))
        })
        .collect()
}
