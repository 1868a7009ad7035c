/// Core types and structures for the snipbox system
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Diagnostic reported when the worker outlives its deadline.
pub const TIMEOUT_DIAGNOSTIC: &str = "Timeout";

/// Diagnostic reported when the worker exits without posting a report.
pub const NO_RESULT_DIAGNOSTIC: &str = "no result from sandboxed process";

/// Hidden role flag value the supervisor passes when re-executing the binary.
pub const WORKER_ROLE: &str = "worker";

/// How the supervisor launches an isolated worker process.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkerCommand {
    /// Executable that understands `--internal-role worker`
    pub program: PathBuf,
    /// Arguments passed before the role selector
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Full argv tail handed to the worker, ending with the role selector.
    pub fn role_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("--internal-role".to_string());
        args.push(WORKER_ROLE.to_string());
        args
    }
}

/// Sandbox configuration shared by the supervisor and its workers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Default wall-clock deadline for callers that do not pick one
    pub deadline: Duration,
    /// Bounded wait for OS cleanup after a forced kill
    pub kill_grace: Duration,
    /// Interval between liveness polls while the worker runs
    pub poll_interval: Duration,
    /// How long to wait for the result reader once the worker has exited
    pub result_grace: Duration,
    /// Maximum bytes of captured snippet output
    pub max_output_bytes: usize,
    /// Address-space ceiling applied inside the worker (bytes)
    pub memory_limit_bytes: Option<u64>,
    /// Maximum interpreter call depth
    pub recursion_limit: usize,
    /// Worker launch command
    pub worker: WorkerCommand,
}

impl SandboxConfig {
    /// Default deadline, matching the evaluation harness this crate serves.
    pub const DEFAULT_DEADLINE_SECS: f64 = 8.0;

    pub fn with_worker(mut self, worker: WorkerCommand) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Reject settings that would make supervision meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.deadline.is_zero() {
            return Err(SandboxError::Config("deadline must be positive".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(SandboxError::Config(
                "poll interval must be positive".to_string(),
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(SandboxError::Config(
                "max_output_bytes must be positive".to_string(),
            ));
        }
        if self.recursion_limit == 0 {
            return Err(SandboxError::Config(
                "recursion_limit must be positive".to_string(),
            ));
        }
        if self.worker.program.as_os_str().is_empty() {
            return Err(SandboxError::Config("worker program is empty".to_string()));
        }
        Ok(())
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs_f64(Self::DEFAULT_DEADLINE_SECS),
            kill_grace: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
            result_grace: Duration::from_millis(500),
            max_output_bytes: 8 * 1024 * 1024,
            memory_limit_bytes: Some(512 * 1024 * 1024),
            recursion_limit: 1000,
            worker: WorkerCommand::new(
                std::env::current_exe().unwrap_or_else(|_| PathBuf::from("snipbox")),
            ),
        }
    }
}

/// Convert caller-supplied seconds into a deadline.
pub fn deadline_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(SandboxError::Config(format!("invalid deadline: {secs}")));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|_| SandboxError::Config(format!("invalid deadline: {secs}")))
}

/// One snippet execution request. Immutable once built.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRequest {
    snippet: String,
    deadline: Duration,
}

impl ExecutionRequest {
    pub fn new(snippet: impl Into<String>, deadline: Duration) -> Self {
        Self {
            snippet: snippet.into(),
            deadline,
        }
    }

    pub fn from_secs(snippet: impl Into<String>, secs: f64) -> Result<Self> {
        Ok(Self::new(snippet, deadline_from_secs(secs)?))
    }

    pub fn snippet(&self) -> &str {
        &self.snippet
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

/// Outcome taxonomy. Closed set.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// Snippet ran to completion
    #[serde(rename = "OK")]
    Completed,
    /// Static filter matched a deny pattern; nothing was spawned
    #[serde(rename = "BLOCKED")]
    Blocked,
    /// Snippet raised inside the restricted environment
    #[serde(rename = "RE")]
    RuntimeFault,
    /// Wall-clock deadline elapsed and the worker was killed
    #[serde(rename = "TLE")]
    Timeout,
    /// Worker exited without posting a report
    #[serde(rename = "CRASH")]
    CrashNoResult,
    /// Request rejected or worker could not be started
    #[serde(rename = "LAUNCH")]
    LaunchFailure,
}

impl OutcomeKind {
    pub fn terminal_state(self) -> TerminalState {
        match self {
            OutcomeKind::Completed => TerminalState::Completed,
            OutcomeKind::Blocked | OutcomeKind::RuntimeFault | OutcomeKind::LaunchFailure => {
                TerminalState::Failed
            }
            OutcomeKind::Timeout => TerminalState::TimedOut,
            OutcomeKind::CrashNoResult => TerminalState::Crashed,
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeKind::Completed => write!(f, "completed"),
            OutcomeKind::Blocked => write!(f, "blocked"),
            OutcomeKind::RuntimeFault => write!(f, "runtime_fault"),
            OutcomeKind::Timeout => write!(f, "timeout"),
            OutcomeKind::CrashNoResult => write!(f, "crash_no_result"),
            OutcomeKind::LaunchFailure => write!(f, "launch_failure"),
        }
    }
}

/// Supervisor lifecycle states
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunState {
    Ready,
    Filtering,
    Running,
    Terminal(TerminalState),
}

/// Terminal supervisor states. No transitions leave these.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TerminalState {
    Completed,
    Failed,
    TimedOut,
    Crashed,
}

/// Structured result of one execution.
///
/// Exactly one of `succeeded && diagnostic.is_none()` or
/// `!succeeded && diagnostic.is_some()` holds; the constructors are the only
/// way to build one.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ExecutionOutcome {
    succeeded: bool,
    captured_output: String,
    diagnostic: Option<String>,
    kind: OutcomeKind,
    wall_time_ms: u64,
}

impl ExecutionOutcome {
    pub fn completed(captured_output: String, wall_time_ms: u64) -> Self {
        Self {
            succeeded: true,
            captured_output,
            diagnostic: None,
            kind: OutcomeKind::Completed,
            wall_time_ms,
        }
    }

    /// Failure outcome. `kind` must not be `Completed`; a completed kind is
    /// downgraded to a runtime fault so the invariant cannot be broken.
    pub fn failed(
        kind: OutcomeKind,
        diagnostic: impl Into<String>,
        captured_output: String,
        wall_time_ms: u64,
    ) -> Self {
        let kind = if kind == OutcomeKind::Completed {
            OutcomeKind::RuntimeFault
        } else {
            kind
        };
        Self {
            succeeded: false,
            captured_output,
            diagnostic: Some(diagnostic.into()),
            kind,
            wall_time_ms,
        }
    }

    pub fn blocked(pattern: &str) -> Self {
        Self::failed(
            OutcomeKind::Blocked,
            format!("Forbidden pattern: {pattern}"),
            String::new(),
            0,
        )
    }

    pub fn timeout(wall_time_ms: u64) -> Self {
        Self::failed(OutcomeKind::Timeout, TIMEOUT_DIAGNOSTIC, String::new(), wall_time_ms)
    }

    pub fn no_result(wall_time_ms: u64) -> Self {
        Self::failed(
            OutcomeKind::CrashNoResult,
            NO_RESULT_DIAGNOSTIC,
            String::new(),
            wall_time_ms,
        )
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn captured_output(&self) -> &str {
        &self.captured_output
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    pub fn kind(&self) -> OutcomeKind {
        self.kind
    }

    pub fn terminal_state(&self) -> TerminalState {
        self.kind.terminal_state()
    }

    pub fn wall_time_ms(&self) -> u64 {
        self.wall_time_ms
    }

    pub fn into_captured_output(self) -> String {
        self.captured_output
    }
}

/// Custom error types for snipbox
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Filter error: {0}")]
    Filter(String),
}

impl From<nix::errno::Errno> for SandboxError {
    fn from(err: nix::errno::Errno) -> Self {
        SandboxError::Process(err.to_string())
    }
}

impl From<serde_json::Error> for SandboxError {
    fn from(err: serde_json::Error) -> Self {
        SandboxError::Protocol(err.to_string())
    }
}

/// Result type alias for snipbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_outcome_has_no_diagnostic() {
        let outcome = ExecutionOutcome::completed("hello\n".to_string(), 3);
        assert!(outcome.succeeded());
        assert_eq!(outcome.diagnostic(), None);
        assert_eq!(outcome.terminal_state(), TerminalState::Completed);
    }

    #[test]
    fn failed_outcome_cannot_claim_completion() {
        let outcome =
            ExecutionOutcome::failed(OutcomeKind::Completed, "boom", String::new(), 0);
        assert!(!outcome.succeeded());
        assert_eq!(outcome.kind(), OutcomeKind::RuntimeFault);
        assert_eq!(outcome.diagnostic(), Some("boom"));
    }

    #[test]
    fn fixed_markers_for_timeout_and_crash() {
        assert_eq!(ExecutionOutcome::timeout(10).diagnostic(), Some("Timeout"));
        assert_eq!(
            ExecutionOutcome::no_result(10).diagnostic(),
            Some("no result from sandboxed process")
        );
        assert_eq!(
            ExecutionOutcome::no_result(1).terminal_state(),
            TerminalState::Crashed
        );
        assert_eq!(
            ExecutionOutcome::timeout(1).terminal_state(),
            TerminalState::TimedOut
        );
    }

    #[test]
    fn blocked_outcome_names_the_pattern() {
        let outcome = ExecutionOutcome::blocked(r"\bimport\b");
        assert_eq!(outcome.kind(), OutcomeKind::Blocked);
        assert_eq!(outcome.terminal_state(), TerminalState::Failed);
        assert!(outcome.diagnostic().unwrap_or_default().contains("import"));
    }

    #[test]
    fn deadline_rejects_nonsense() {
        assert!(deadline_from_secs(0.0).is_err());
        assert!(deadline_from_secs(-1.0).is_err());
        assert!(deadline_from_secs(f64::NAN).is_err());
        assert!(deadline_from_secs(f64::INFINITY).is_err());
        assert_eq!(
            deadline_from_secs(1.5).ok(),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn worker_role_args_end_with_selector() {
        let mut worker = WorkerCommand::new("/usr/bin/snipbox");
        worker.args.push("--quiet".to_string());
        assert_eq!(
            worker.role_args(),
            vec!["--quiet", "--internal-role", "worker"]
        );
    }

    #[test]
    fn default_config_validates() {
        assert!(SandboxConfig::default().validate().is_ok());
        let bad = SandboxConfig {
            max_output_bytes: 0,
            ..SandboxConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
