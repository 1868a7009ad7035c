//! Caller-facing snippet evaluator.
//!
//! Extracts the snippet from free-form text, refuses foreign-language blocks,
//! executes through a [`SnippetRunner`] and scores the printed integers against
//! an expected sequence. A timed-out run is retried once with a longer
//! deadline; no other failure is retried.

use crate::config::types::{ExecutionOutcome, OutcomeKind, SandboxConfig};
use crate::core::supervisor::Supervisor;
use crate::judge::extract::extract_snippet;
use crate::judge::sequence::compare_sequence;
use crate::observability::audit::CorrelationIds;
use serde::{Deserialize, Serialize};

/// Anything that can run a snippet to an outcome.
pub trait SnippetRunner {
    fn run_snippet(
        &self,
        snippet: &str,
        deadline_secs: f64,
        correlation: CorrelationIds,
    ) -> ExecutionOutcome;
}

impl SnippetRunner for Supervisor {
    fn run_snippet(
        &self,
        snippet: &str,
        deadline_secs: f64,
        correlation: CorrelationIds,
    ) -> ExecutionOutcome {
        self.execute_as(snippet, deadline_secs, correlation)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Canonical language the evaluator accepts
    pub language: String,
    /// Other tags accepted as the same language
    pub aliases: Vec<String>,
    /// Deadline for the first attempt (seconds)
    pub deadline_secs: f64,
    /// Deadline for the single retry after a timeout (seconds)
    pub retry_deadline_secs: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            language: "python".to_string(),
            aliases: vec!["py".to_string(), "python3".to_string()],
            deadline_secs: SandboxConfig::DEFAULT_DEADLINE_SECS,
            retry_deadline_secs: 20.0,
        }
    }
}

impl EvaluatorConfig {
    pub fn accepts_language(&self, tag: &str) -> bool {
        let tag = tag.trim();
        tag.eq_ignore_ascii_case(&self.language)
            || self.aliases.iter().any(|alias| tag.eq_ignore_ascii_case(alias))
    }
}

/// Verdict for one piece of free-form text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub ok: bool,
    pub reason: String,
    pub stdout: String,
    pub got: Vec<i64>,
    pub expected: Vec<i64>,
}

impl EvaluationReport {
    fn rejected(reason: String, stdout: String, expected: &[i64]) -> Self {
        Self {
            ok: false,
            reason,
            stdout,
            got: Vec::new(),
            expected: expected.to_vec(),
        }
    }
}

pub struct SnippetEvaluator<R> {
    runner: R,
    config: EvaluatorConfig,
}

impl SnippetEvaluator<Supervisor> {
    /// Evaluator over a supervisor configured from the environment.
    pub fn from_env() -> Self {
        let supervisor = Supervisor::from_env();
        let config = EvaluatorConfig {
            deadline_secs: supervisor.config().deadline.as_secs_f64(),
            ..EvaluatorConfig::default()
        };
        Self::new(supervisor, config)
    }
}

impl<R: SnippetRunner> SnippetEvaluator<R> {
    pub fn new(runner: R, config: EvaluatorConfig) -> Self {
        Self { runner, config }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Extract, execute and score `text` against `expected`.
    pub fn evaluate(&self, text: &str, expected: &[i64]) -> EvaluationReport {
        let snippet = extract_snippet(text);
        if let Some(lang) = snippet.language.as_deref() {
            if !self.config.accepts_language(lang) {
                log::info!("rejecting {} code block without executing it", lang);
                return EvaluationReport::rejected(
                    format!("Non-Python code block detected: {lang}"),
                    String::new(),
                    expected,
                );
            }
        }

        let correlation = CorrelationIds::new();
        let outcome =
            self.runner
                .run_snippet(&snippet.code, self.config.deadline_secs, correlation.clone());

        let outcome = if outcome.kind() == OutcomeKind::Timeout {
            log::info!(
                "request {} timed out after {} ms; retrying with {}s",
                correlation.request_id,
                outcome.wall_time_ms(),
                self.config.retry_deadline_secs
            );
            let retry = self.runner.run_snippet(
                &snippet.code,
                self.config.retry_deadline_secs,
                CorrelationIds::for_request(&correlation.request_id),
            );
            if !retry.succeeded() {
                return EvaluationReport::rejected(
                    format!(
                        "Execution error after retry: {}",
                        retry.diagnostic().unwrap_or_default()
                    ),
                    retry.into_captured_output(),
                    expected,
                );
            }
            retry
        } else {
            outcome
        };

        if !outcome.succeeded() {
            return EvaluationReport::rejected(
                format!(
                    "Execution error: {}",
                    outcome.diagnostic().unwrap_or_default()
                ),
                outcome.into_captured_output(),
                expected,
            );
        }

        let stdout = outcome.into_captured_output();
        let comparison = compare_sequence(&stdout, expected);
        EvaluationReport {
            ok: comparison.matched,
            reason: comparison.reason,
            stdout,
            got: comparison.observed,
            expected: comparison.expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Replays canned outcomes and records the deadlines it was given.
    struct Scripted {
        outcomes: RefCell<Vec<ExecutionOutcome>>,
        calls: RefCell<Vec<(String, f64)>>,
    }

    impl Scripted {
        fn new(mut outcomes: Vec<ExecutionOutcome>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: RefCell::new(outcomes),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl SnippetRunner for Scripted {
        fn run_snippet(&self, snippet: &str, secs: f64, _: CorrelationIds) -> ExecutionOutcome {
            self.calls.borrow_mut().push((snippet.to_string(), secs));
            self.outcomes
                .borrow_mut()
                .pop()
                .unwrap_or_else(|| ExecutionOutcome::no_result(0))
        }
    }

    fn evaluator(outcomes: Vec<ExecutionOutcome>) -> SnippetEvaluator<Scripted> {
        SnippetEvaluator::new(Scripted::new(outcomes), EvaluatorConfig::default())
    }

    #[test]
    fn matching_output_passes() {
        let eval = evaluator(vec![ExecutionOutcome::completed("0 1 1 2\n".to_string(), 4)]);
        let report = eval.evaluate("```python\nprint('0 1 1 2')\n```", &[0, 1, 1, 2]);
        assert!(report.ok);
        assert_eq!(report.reason, "");
        assert_eq!(report.got, vec![0, 1, 1, 2]);
        assert_eq!(eval.runner().calls.borrow()[0], ("print('0 1 1 2')".to_string(), 8.0));
    }

    #[test]
    fn wrong_numbers_are_a_mismatch() {
        let eval = evaluator(vec![ExecutionOutcome::completed("0 1 1 2 3\n".to_string(), 4)]);
        let report = eval.evaluate("print(...)", &[0, 1, 1, 2, 3, 5]);
        assert!(!report.ok);
        assert_eq!(report.reason, "Mismatch");
        assert_eq!(report.stdout, "0 1 1 2 3\n");
    }

    #[test]
    fn foreign_language_is_never_executed() {
        let eval = evaluator(Vec::new());
        let report = eval.evaluate("```javascript\nconsole.log(1)\n```", &[1]);
        assert!(!report.ok);
        assert_eq!(report.reason, "Non-Python code block detected: javascript");
        assert!(report.got.is_empty());
        assert!(eval.runner().calls.borrow().is_empty());
    }

    #[test]
    fn language_aliases_are_accepted() {
        let config = EvaluatorConfig::default();
        assert!(config.accepts_language("Python"));
        assert!(config.accepts_language("py"));
        assert!(config.accepts_language("PYTHON3"));
        assert!(!config.accepts_language("python2"));
    }

    #[test]
    fn runtime_fault_is_not_retried() {
        let eval = evaluator(vec![ExecutionOutcome::failed(
            OutcomeKind::RuntimeFault,
            "Traceback ...\nZeroDivisionError: division by zero\n",
            "1\n".to_string(),
            3,
        )]);
        let report = eval.evaluate("print(1)\n1/0", &[1]);
        assert!(!report.ok);
        assert!(report.reason.starts_with("Execution error: Traceback"));
        assert_eq!(report.stdout, "1\n");
        assert_eq!(eval.runner().calls.borrow().len(), 1);
    }

    #[test]
    fn timeout_is_retried_once_with_longer_deadline() {
        let eval = evaluator(vec![
            ExecutionOutcome::timeout(8000),
            ExecutionOutcome::completed("5\n".to_string(), 9000),
        ]);
        let report = eval.evaluate("print(5)", &[5]);
        assert!(report.ok);
        let calls = eval.runner().calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1, 20.0);
    }

    #[test]
    fn second_timeout_gives_up() {
        let eval = evaluator(vec![
            ExecutionOutcome::timeout(8000),
            ExecutionOutcome::timeout(20000),
        ]);
        let report = eval.evaluate("while True: pass", &[]);
        assert!(!report.ok);
        assert_eq!(report.reason, "Execution error after retry: Timeout");
        assert_eq!(eval.runner().calls.borrow().len(), 2);
    }

    #[test]
    fn blocked_snippet_reports_the_pattern() {
        let eval = evaluator(vec![ExecutionOutcome::blocked(r"\bimport\b")]);
        let report = eval.evaluate("import os", &[]);
        assert_eq!(report.reason, r"Execution error: Forbidden pattern: \bimport\b");
    }
}
