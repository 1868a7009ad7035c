//! Process model of the sandbox.
//!
//! The supervisor owns request lifecycle, deadline enforcement and outcome
//! normalization. The worker is the other end of the pipe: a re-executed copy
//! of the binary that evaluates exactly one snippet.

pub mod protocol;
pub mod supervisor;
pub mod worker;
