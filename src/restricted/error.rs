use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the pseudo-file every snippet executes as.
pub const SANDBOX_FILENAME: &str = "<sandbox>";

/// Fault categories raised inside the restricted environment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    SyntaxError,
    IndentationError,
    NameError,
    UnboundLocalError,
    TypeError,
    ValueError,
    ZeroDivisionError,
    IndexError,
    KeyError,
    AttributeError,
    OverflowError,
    RecursionError,
    AssertionError,
    MemoryError,
    OutputLimitError,
}

const KINDS: [ErrorKind; 15] = [
    ErrorKind::SyntaxError,
    ErrorKind::IndentationError,
    ErrorKind::NameError,
    ErrorKind::UnboundLocalError,
    ErrorKind::TypeError,
    ErrorKind::ValueError,
    ErrorKind::ZeroDivisionError,
    ErrorKind::IndexError,
    ErrorKind::KeyError,
    ErrorKind::AttributeError,
    ErrorKind::OverflowError,
    ErrorKind::RecursionError,
    ErrorKind::AssertionError,
    ErrorKind::MemoryError,
    ErrorKind::OutputLimitError,
];

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::IndentationError => "IndentationError",
            ErrorKind::NameError => "NameError",
            ErrorKind::UnboundLocalError => "UnboundLocalError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::OverflowError => "OverflowError",
            ErrorKind::RecursionError => "RecursionError",
            ErrorKind::AssertionError => "AssertionError",
            ErrorKind::MemoryError => "MemoryError",
            ErrorKind::OutputLimitError => "OutputLimitError",
        }
    }

    pub fn is_compile_time(self) -> bool {
        matches!(self, ErrorKind::SyntaxError | ErrorKind::IndentationError)
    }

    /// Whether `try`/`except` may intercept the fault. Output-limit
    /// violations always end the run.
    pub fn is_catchable(self) -> bool {
        !self.is_compile_time() && self != ErrorKind::OutputLimitError
    }

    /// Whether `except <class>` matches this kind, or `None` when `class`
    /// names no exception class.
    pub fn caught_by(self, class: &str) -> Option<bool> {
        let hit = match class {
            "BaseException" | "Exception" => true,
            "LookupError" => matches!(self, ErrorKind::IndexError | ErrorKind::KeyError),
            "ArithmeticError" => matches!(
                self,
                ErrorKind::ZeroDivisionError | ErrorKind::OverflowError
            ),
            "NameError" => matches!(self, ErrorKind::NameError | ErrorKind::UnboundLocalError),
            "SyntaxError" => self.is_compile_time(),
            _ => KINDS.iter().find(|kind| kind.name() == class)? == &self,
        };
        Some(hit)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of a fault trace
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFrame {
    pub function: String,
    pub line: usize,
}

/// A fault raised by snippet code. Frames are stored innermost first.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
    /// Source line of a compile-time fault
    pub line: Option<usize>,
    pub traceback: Vec<TraceFrame>,
}

pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
            traceback: Vec::new(),
        }
    }

    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self {
            line: Some(line),
            ..Self::new(ErrorKind::SyntaxError, message)
        }
    }

    pub fn indentation(message: impl Into<String>, line: usize) -> Self {
        Self {
            line: Some(line),
            ..Self::new(ErrorKind::IndentationError, message)
        }
    }

    pub fn name_error(name: &str) -> Self {
        Self::new(
            ErrorKind::NameError,
            format!("name '{name}' is not defined"),
        )
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IndexError, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ZeroDivisionError, message)
    }

    pub fn overflow() -> Self {
        Self::new(ErrorKind::OverflowError, "integer overflow")
    }

    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        Self::new(
            ErrorKind::AttributeError,
            format!("'{type_name}' object has no attribute '{attr}'"),
        )
    }

    /// Record the frame the fault passed through on its way out.
    pub fn with_frame(mut self, function: &str, line: usize) -> Self {
        self.traceback.push(TraceFrame {
            function: function.to_string(),
            line,
        });
        self
    }

    /// Final line of the report, e.g. `NameError: name 'x' is not defined`.
    pub fn summary(&self) -> String {
        if self.message.is_empty() {
            self.kind.name().to_string()
        } else {
            format!("{}: {}", self.kind, self.message)
        }
    }

    /// Full fault trace text.
    pub fn render(&self, source: &str) -> String {
        let mut out = String::new();
        if self.kind.is_compile_time() {
            let line = self.line.unwrap_or(1);
            out.push_str(&format!("  File \"{SANDBOX_FILENAME}\", line {line}\n"));
            if let Some(text) = source.lines().nth(line.saturating_sub(1)) {
                let text = text.trim();
                if !text.is_empty() {
                    out.push_str(&format!("    {text}\n"));
                }
            }
        } else {
            out.push_str("Traceback (most recent call last):\n");
            let mut previous: Option<&TraceFrame> = None;
            let mut repeats = 0usize;
            for frame in self.traceback.iter().rev() {
                if previous == Some(frame) {
                    repeats += 1;
                    if repeats >= REPEAT_CUTOFF {
                        continue;
                    }
                } else {
                    push_repeat_note(&mut out, repeats);
                    repeats = 0;
                }
                previous = Some(frame);
                out.push_str(&format!(
                    "  File \"{SANDBOX_FILENAME}\", line {}, in {}\n",
                    frame.line, frame.function
                ));
                if let Some(text) = source.lines().nth(frame.line.saturating_sub(1)) {
                    let text = text.trim();
                    if !text.is_empty() {
                        out.push_str(&format!("    {text}\n"));
                    }
                }
            }
            push_repeat_note(&mut out, repeats);
        }
        out.push_str(&self.summary());
        out.push('\n');
        out
    }
}

/// Identical consecutive frames printed before the rest are summarised.
const REPEAT_CUTOFF: usize = 3;

fn push_repeat_note(out: &mut String, repeats: usize) {
    if repeats >= REPEAT_CUTOFF {
        let hidden = repeats - REPEAT_CUTOFF + 1;
        let noun = if hidden == 1 { "time" } else { "times" };
        out.push_str(&format!("  [Previous line repeated {hidden} more {noun}]\n"));
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

impl std::error::Error for ScriptError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn except_classes_follow_the_exception_hierarchy() {
        assert_eq!(ErrorKind::KeyError.caught_by("LookupError"), Some(true));
        assert_eq!(ErrorKind::ZeroDivisionError.caught_by("ArithmeticError"), Some(true));
        assert_eq!(ErrorKind::UnboundLocalError.caught_by("NameError"), Some(true));
        assert_eq!(ErrorKind::MemoryError.caught_by("Exception"), Some(true));
        assert_eq!(ErrorKind::TypeError.caught_by("TypeError"), Some(true));
        assert_eq!(ErrorKind::TypeError.caught_by("ValueError"), Some(false));
        assert_eq!(ErrorKind::NameError.caught_by("LookupError"), Some(false));
        assert_eq!(ErrorKind::TypeError.caught_by("Bogus"), None);
        assert!(!ErrorKind::OutputLimitError.is_catchable());
        assert!(!ErrorKind::SyntaxError.is_catchable());
        assert!(ErrorKind::RecursionError.is_catchable());
    }

    #[test]
    fn runtime_trace_lists_outermost_first() {
        let source = "def f():\n    return x\nf()\n";
        let err = ScriptError::name_error("x")
            .with_frame("f", 2)
            .with_frame("<module>", 3);
        let text = err.render(source);
        let expected = "Traceback (most recent call last):\n  \
            File \"<sandbox>\", line 3, in <module>\n    f()\n  \
            File \"<sandbox>\", line 2, in f\n    return x\n\
            NameError: name 'x' is not defined\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn syntax_error_shows_offending_line() {
        let err = ScriptError::syntax("invalid syntax", 2);
        let text = err.render("x = 1\nx = = 2\n");
        assert_eq!(
            text,
            "  File \"<sandbox>\", line 2\n    x = = 2\nSyntaxError: invalid syntax\n"
        );
    }

    #[test]
    fn repeated_frames_are_collapsed() {
        let source = "def f(n):\n    return f(n + 1)\nf(0)\n";
        let mut err = ScriptError::new(ErrorKind::RecursionError, "maximum recursion depth exceeded");
        for _ in 0..10 {
            err = err.with_frame("f", 2);
        }
        err = err.with_frame("<module>", 3);
        let text = err.render(source);
        assert_eq!(text.matches("in f\n").count(), 3);
        assert!(text.contains("  [Previous line repeated 7 more times]\n"));
        assert!(text.ends_with("RecursionError: maximum recursion depth exceeded\n"));
    }

    #[test]
    fn empty_message_renders_kind_only() {
        let err = ScriptError::new(ErrorKind::AssertionError, "");
        assert_eq!(err.summary(), "AssertionError");
    }
}
