use crate::config::types::{Result, SandboxError};
use nix::sys::resource::{setrlimit, Resource};
use std::time::Duration;

/// Resource ceilings a worker places on itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerLimits {
    /// RLIMIT_AS in bytes, `None` leaves the inherited limit alone
    pub address_space: Option<u64>,
    /// RLIMIT_CPU in whole seconds
    pub cpu_seconds: u64,
}

impl WorkerLimits {
    /// CPU budget backing up the supervisor's wall-clock deadline.
    ///
    /// The kernel delivers SIGXCPU one second past the rounded-up deadline, so
    /// a spinning worker dies even if the supervisor is gone.
    pub fn for_deadline(deadline: Duration, address_space: Option<u64>) -> Self {
        let whole = deadline.as_secs() + u64::from(deadline.subsec_nanos() > 0);
        Self {
            address_space,
            cpu_seconds: whole.saturating_add(1),
        }
    }
}

fn apply(name: &str, resource: Resource, value: u64) -> Result<()> {
    setrlimit(resource, value as libc::rlim_t, value as libc::rlim_t).map_err(|e| {
        SandboxError::Process(format!("Failed to apply {}={}: {}", name, value, e))
    })
}

/// Apply the worker rlimit set to the calling process.
///
/// Core dumps and file creation are always disabled. The address-space limit
/// is skipped when it is unset.
pub fn apply_worker_limits(limits: &WorkerLimits) -> Result<()> {
    apply("RLIMIT_CORE", Resource::RLIMIT_CORE, 0)?;
    apply("RLIMIT_FSIZE", Resource::RLIMIT_FSIZE, 0)?;
    apply("RLIMIT_CPU", Resource::RLIMIT_CPU, limits.cpu_seconds)?;
    if let Some(bytes) = limits.address_space {
        apply("RLIMIT_AS", Resource::RLIMIT_AS, bytes)?;
    }
    log::debug!(
        "worker rlimits applied: cpu={}s as={:?}",
        limits.cpu_seconds,
        limits.address_space
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_budget_rounds_up_and_adds_slack() {
        let limits = WorkerLimits::for_deadline(Duration::from_millis(1500), None);
        assert_eq!(limits.cpu_seconds, 3);
        let limits = WorkerLimits::for_deadline(Duration::from_secs(8), Some(1 << 29));
        assert_eq!(limits.cpu_seconds, 9);
        assert_eq!(limits.address_space, Some(1 << 29));
    }

    #[test]
    fn tiny_deadline_still_gets_a_cpu_second() {
        let limits = WorkerLimits::for_deadline(Duration::from_millis(1), None);
        assert_eq!(limits.cpu_seconds, 2);
    }
}
