//! Isolated Worker entrypoint.
//!
//! Runs inside a freshly spawned process started with
//! `--internal-role worker`. The worker hardens itself, evaluates one snippet
//! in the restricted environment and posts a single report frame. It never
//! handles a second request.

use crate::config::types::Result;
use crate::core::protocol::{read_request, write_frame, WorkerReport, WorkerRequest};
use crate::kernel::resource::{apply_worker_limits, WorkerLimits};
use crate::kernel::signal::setup_parent_death_signal;
use crate::restricted;
use std::io::{Read, Write};

/// Exit status of a worker whose interpreter thread died without a report.
pub const EXIT_NO_REPORT: i32 = 70;

/// Apply process-level limits for `request`.
pub fn harden(request: &WorkerRequest) -> Result<()> {
    setup_parent_death_signal()?;
    apply_worker_limits(&WorkerLimits::for_deadline(
        request.deadline(),
        request.memory_limit_bytes,
    ))
}

/// Evaluate `request` and produce the report frame, if any.
///
/// `None` means the interpreter thread panicked; the caller exits without
/// writing so the supervisor classifies the run as a crash.
pub fn evaluate(request: &WorkerRequest) -> Option<WorkerReport> {
    match restricted::run_isolated(&request.snippet, &request.limits) {
        Ok(report) => Some(report.into()),
        Err(_) => {
            log::error!("run {}: interpreter thread panicked", request.run_id);
            None
        }
    }
}

/// Full worker lifecycle over arbitrary streams. Returns the exit status.
pub fn serve<R: Read, W: Write>(input: R, output: W) -> Result<i32> {
    let request = read_request(input)?;
    log::debug!(
        "run {}: worker received {} bytes, deadline {}ms",
        request.run_id,
        request.snippet.len(),
        request.deadline_ms
    );
    harden(&request)?;
    match evaluate(&request) {
        Some(report) => {
            write_frame(output, &report)?;
            Ok(0)
        }
        None => Ok(EXIT_NO_REPORT),
    }
}

/// Worker role entrypoint over the process's own stdin/stdout.
pub fn run_worker() -> Result<i32> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(stdin.lock(), stdout.lock())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::SandboxConfig;
    use std::time::Duration;

    fn request(snippet: &str) -> WorkerRequest {
        WorkerRequest::new("test", snippet, Duration::from_secs(5), &SandboxConfig::default())
    }

    #[test]
    fn evaluate_reports_output() {
        let report = evaluate(&request("print(2 + 3)")).unwrap();
        assert!(report.ok);
        assert_eq!(report.stdout, "5\n");
    }

    #[test]
    fn evaluate_reports_fault_with_partial_output() {
        let report = evaluate(&request("print('x')\n[][0]\n")).unwrap();
        assert!(!report.ok);
        assert_eq!(report.stdout, "x\n");
        assert!(report
            .error
            .unwrap()
            .ends_with("IndexError: list index out of range\n"));
    }
}
