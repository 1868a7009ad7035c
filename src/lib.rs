//! snipbox: sandboxed execution of short untrusted snippets
//!
//! A snippet is screened by a static deny filter, then evaluated by a
//! restricted interpreter inside a separate worker process that is killed
//! outright when its wall-clock deadline passes. Every run ends in one
//! structured [`ExecutionOutcome`].
//!
//! # Architecture
//!
//! ## Sandbox core ([`crate::core`])
//! - [`crate::core::supervisor`]: request lifecycle, deadline, outcome normalization
//! - [`crate::core::worker`]: the isolated worker role of the binary
//! - [`crate::core::protocol`]: JSON frames exchanged over the worker's pipes
//!
//! ## Restricted Evaluation Environment ([`restricted`])
//! - [`restricted::lexer`], [`restricted::parser`]: source to syntax tree
//! - [`restricted::eval`]: tree-walking interpreter with a closed whitelist
//! - [`restricted::builtins`]: the whitelist itself
//!
//! ## Screening ([`filter`])
//! - [`filter::StaticFilter`]: ordered deny patterns, checked before any spawn
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::resource`]: worker rlimits
//! - [`kernel::signal`]: parent-death signal and process-group kill
//!
//! ## Judging ([`judge`])
//! - [`judge::extract`]: fenced code block extraction
//! - [`judge::sequence`]: integer sequence comparison
//! - [`judge::evaluator`]: extract, execute, retry on timeout, score
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: structured audit events
//! - [`observability::metrics`]: counters and Prometheus export
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: settings, outcome types and the error taxonomy
//! - [`config::loader`]: environment overrides

// Kernel Primitives
pub mod kernel;

// Sandbox core: supervisor, worker, protocol
pub mod core;

// Restricted interpreter
pub mod restricted;

// Static deny filter
pub mod filter;

// Extraction, comparison, evaluation
pub mod judge;

// Observability
pub mod observability;

// Configuration
pub mod config;

// CLI entrypoint wiring for the snipbox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use crate::core::supervisor::Supervisor;
pub use filter::{FilterVerdict, StaticFilter};
pub use judge::evaluator::{EvaluationReport, EvaluatorConfig, SnippetEvaluator};
pub use judge::extract::ExtractedSnippet;
pub use judge::sequence::ComparisonResult;

/// Run `snippet` in an isolated worker with a deadline in seconds.
///
/// Uses a supervisor configured from the environment. Never fails: every
/// problem is reported through the returned outcome.
pub fn execute(snippet: &str, deadline_secs: f64) -> ExecutionOutcome {
    Supervisor::from_env().execute(snippet, deadline_secs)
}

/// Find the first fenced code block in `text`, or take all of it.
pub fn extract_snippet(text: &str) -> ExtractedSnippet {
    judge::extract::extract_snippet(text)
}

/// Compare the integers printed in `captured` with `expected`.
pub fn compare_sequence(captured: &str, expected: &[i64]) -> ComparisonResult {
    judge::sequence::compare_sequence(captured, expected)
}
