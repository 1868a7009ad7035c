//! Restricted Evaluation Environment.
//!
//! Snippets run through a self-contained interpreter for a statement and
//! expression subset of the snippet language. The namespace starts empty apart
//! from the closed primitive whitelist in [`builtins::WHITELIST`]; there is no
//! import machinery, no file or process access and no reflection, so the only
//! observable effect of a run is the text it prints.
//!
//! Faults surface as [`error::ScriptError`] and are rendered as a
//! conventional fault trace against the snippet source.

pub mod ast;
pub mod builtins;
pub mod error;
pub mod eval;
pub mod format;
pub mod lexer;
pub mod methods;
pub mod ops;
pub mod parser;
pub mod value;

use error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::thread;

/// Native stack reserved for the interpreter thread. Deep snippet recursion
/// is bounded by [`Limits::recursion_limit`] long before this runs out.
pub const INTERPRETER_STACK_BYTES: usize = 128 * 1024 * 1024;

/// Per-run bounds enforced inside the interpreter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub max_output_bytes: usize,
    pub recursion_limit: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_output_bytes: 8 * 1024 * 1024,
            recursion_limit: 1000,
        }
    }
}

/// Result of interpreting one snippet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub ok: bool,
    pub stdout: String,
    /// Rendered fault trace when `ok` is false
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

/// Parse and run `source` on the current thread.
pub fn run_snippet(source: &str, limits: &Limits) -> RunReport {
    let module = match parser::parse(source) {
        Ok(module) => module,
        Err(err) => {
            return RunReport {
                ok: false,
                stdout: String::new(),
                error: Some(err.render(source)),
                error_kind: Some(err.kind),
            }
        }
    };
    let mut interpreter = eval::Interpreter::new(limits.max_output_bytes, limits.recursion_limit);
    let result = interpreter.run(&module);
    let stdout = interpreter.into_output();
    match result {
        Ok(()) => RunReport {
            ok: true,
            stdout,
            error: None,
            error_kind: None,
        },
        Err(err) => {
            log::debug!("snippet raised {}", err.kind);
            RunReport {
                ok: false,
                stdout,
                error: Some(err.render(source)),
                error_kind: Some(err.kind),
            }
        }
    }
}

/// Run `source` on a dedicated thread with a large native stack.
///
/// A panic inside the interpreter is returned as `Err` rather than unwinding
/// into the caller.
pub fn run_isolated(source: &str, limits: &Limits) -> thread::Result<RunReport> {
    let source = source.to_owned();
    let limits = *limits;
    let handle = thread::Builder::new()
        .name("snippet".into())
        .stack_size(INTERPRETER_STACK_BYTES)
        .spawn(move || run_snippet(&source, &limits));
    match handle {
        Ok(handle) => handle.join(),
        Err(err) => Err(Box::new(format!("failed to start interpreter thread: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> RunReport {
        run_isolated(source, &Limits::default()).unwrap()
    }

    #[test]
    fn hello_world() {
        let report = run("print('hello')");
        assert!(report.ok);
        assert_eq!(report.stdout, "hello\n");
        assert_eq!(report.error, None);
    }

    #[test]
    fn fibonacci_sequence() {
        let source = "a, b = 0, 1\nfor _ in range(10):\n    print(a, end=' ')\n    a, b = b, a + b\n";
        let report = run(source);
        assert!(report.ok);
        assert_eq!(report.stdout, "0 1 1 2 3 5 8 13 21 34 ");
    }

    #[test]
    fn partial_output_survives_a_fault() {
        let report = run("print('partial')\n1 / 0\n");
        assert!(!report.ok);
        assert_eq!(report.stdout, "partial\n");
        assert_eq!(report.error_kind, Some(ErrorKind::ZeroDivisionError));
        let trace = report.error.unwrap();
        assert!(trace.starts_with("Traceback (most recent call last):\n"));
        assert!(trace.contains("line 2, in <module>"));
        assert!(trace.ends_with("ZeroDivisionError: division by zero\n"));
    }

    #[test]
    fn host_primitives_are_absent() {
        let report = run("open('/etc/passwd')");
        assert!(!report.ok);
        assert_eq!(report.error_kind, Some(ErrorKind::NameError));
        assert!(report
            .error
            .unwrap()
            .ends_with("NameError: name 'open' is not defined\n"));
    }

    #[test]
    fn syntax_error_report() {
        let report = run("def f(:\n    pass\n");
        assert!(!report.ok);
        assert_eq!(report.error_kind, Some(ErrorKind::SyntaxError));
        assert!(report.error.unwrap().starts_with("  File \"<sandbox>\", line 1\n"));
    }

    #[test]
    fn default_recursion_limit_is_reached_without_native_overflow() {
        let report = run("def f(n):\n    return f(n + 1)\nf(0)\n");
        assert_eq!(report.error_kind, Some(ErrorKind::RecursionError));
        let trace = report.error.unwrap();
        assert!(trace.contains("more times]"));
        assert!(trace.ends_with("RecursionError: maximum recursion depth exceeded\n"));
    }

    #[test]
    fn reflection_attributes_do_not_resolve() {
        let report = run("print(''.__class__)");
        assert_eq!(report.error_kind, Some(ErrorKind::AttributeError));
    }
}
