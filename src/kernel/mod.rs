//! Thin wrappers around Linux kernel primitives.
//!
//! All `unsafe` code for process control is concentrated here. The worker
//! applies [`resource`] limits and the parent-death signal to itself before it
//! evaluates anything; the supervisor uses [`signal`] to tear down a worker's
//! process group.

pub mod resource;
pub mod signal;
