//! Judging layer on top of the sandbox.
//!
//! Snippet extraction from free-form answers, integer-sequence comparison, and
//! the evaluator that ties both to an execution.

pub mod evaluator;
pub mod extract;
pub mod sequence;
