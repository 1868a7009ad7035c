//! Configuration and policy
//!
//! Sandbox settings, the error taxonomy, and public result types.

pub mod loader;
pub mod types;
