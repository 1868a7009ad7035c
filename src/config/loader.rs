//! Environment-driven configuration.
//!
//! Recognised variables:
//! - `SNIPBOX_EXEC_TIMEOUT`: default deadline in seconds (float)
//! - `SNIPBOX_MEMORY_LIMIT_MB`: worker address-space ceiling, `0` disables it
//! - `SNIPBOX_MAX_OUTPUT_BYTES`: captured output bound
//! - `SNIPBOX_WORKER`: path of the worker executable

use crate::config::types::{deadline_from_secs, Result, SandboxConfig, SandboxError, WorkerCommand};
use std::collections::HashMap;

pub const ENV_EXEC_TIMEOUT: &str = "SNIPBOX_EXEC_TIMEOUT";
pub const ENV_MEMORY_LIMIT_MB: &str = "SNIPBOX_MEMORY_LIMIT_MB";
pub const ENV_MAX_OUTPUT_BYTES: &str = "SNIPBOX_MAX_OUTPUT_BYTES";
pub const ENV_WORKER: &str = "SNIPBOX_WORKER";

impl SandboxConfig {
    /// Build a config from the process environment on top of the defaults.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| key.starts_with("SNIPBOX_"))
            .collect();
        Self::from_vars(&vars)
    }

    /// Same as [`SandboxConfig::from_env`] but over an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let mut config = SandboxConfig::default();

        if let Some(raw) = vars.get(ENV_EXEC_TIMEOUT) {
            let secs: f64 = raw.trim().parse().map_err(|_| {
                SandboxError::Config(format!("{ENV_EXEC_TIMEOUT} is not a number: {raw}"))
            })?;
            config.deadline = deadline_from_secs(secs)?;
        }

        if let Some(raw) = vars.get(ENV_MEMORY_LIMIT_MB) {
            let mb: u64 = raw.trim().parse().map_err(|_| {
                SandboxError::Config(format!("{ENV_MEMORY_LIMIT_MB} is not an integer: {raw}"))
            })?;
            config.memory_limit_bytes = match mb {
                0 => None,
                mb => Some(mb.checked_mul(1024 * 1024).ok_or_else(|| {
                    SandboxError::Config(format!("{ENV_MEMORY_LIMIT_MB} is too large: {raw}"))
                })?),
            };
        }

        if let Some(raw) = vars.get(ENV_MAX_OUTPUT_BYTES) {
            config.max_output_bytes = raw.trim().parse().map_err(|_| {
                SandboxError::Config(format!("{ENV_MAX_OUTPUT_BYTES} is not an integer: {raw}"))
            })?;
        }

        if let Some(raw) = vars.get(ENV_WORKER) {
            if !raw.trim().is_empty() {
                config.worker = WorkerCommand::new(raw.trim());
            }
        }

        config.validate()?;
        log::debug!(
            "sandbox config: deadline={:?} memory_limit={:?} max_output={} worker={}",
            config.deadline,
            config.memory_limit_bytes,
            config.max_output_bytes,
            config.worker.program.display()
        );
        Ok(config)
    }
}
