//! Supervisor: one isolated worker per request, hard wall-clock deadline.
//!
//! A run moves READY -> FILTERING -> RUNNING -> terminal. Blocked snippets and
//! invalid requests end before anything is spawned. Once RUNNING, the worker
//! process is polled until it exits or the deadline passes, at which point its
//! whole process group is killed. Whatever happened is folded into exactly one
//! [`ExecutionOutcome`]; nothing here returns an error to the caller.

use crate::config::types::{
    ExecutionOutcome, ExecutionRequest, OutcomeKind, Result, RunState, SandboxConfig,
    SandboxError,
};
use crate::core::protocol::{
    read_bounded, read_first_frame, report_frame_limit, write_frame, WorkerReport, WorkerRequest,
};
use crate::filter::StaticFilter;
use crate::kernel::signal::{kill_process_group, reap_within, KillReport};
use crate::observability::audit::{self, snippet_digest, CorrelationIds};
use crate::observability::metrics::{get_metrics, Counter};
use crate::restricted::error::ErrorKind;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Worker stderr kept for debug logging.
const STDERR_CAPTURE_BYTES: usize = 64 * 1024;

fn to_process_error(prefix: &str, err: impl std::fmt::Display) -> SandboxError {
    SandboxError::Process(format!("{prefix}: {err}"))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Caller-facing text for an internal error.
fn diagnostic_of(err: &SandboxError) -> String {
    match err {
        SandboxError::Config(msg)
        | SandboxError::Process(msg)
        | SandboxError::Protocol(msg)
        | SandboxError::Filter(msg) => msg.clone(),
        SandboxError::Io(e) => e.to_string(),
    }
}

/// What the supervisor observed about a finished worker.
#[derive(Debug)]
pub enum WorkerEvidence {
    /// Deadline passed with the worker still alive
    TimedOut { kill: KillReport, reaped: bool },
    /// Worker exited (or could not be waited on) before the deadline
    Exited {
        status: Option<ExitStatus>,
        report: Option<WorkerReport>,
    },
}

/// Map worker evidence to an outcome. Pure.
pub fn classify(evidence: WorkerEvidence, wall_time_ms: u64) -> ExecutionOutcome {
    match evidence {
        WorkerEvidence::TimedOut { .. } => ExecutionOutcome::timeout(wall_time_ms),
        WorkerEvidence::Exited {
            report: Some(report),
            ..
        } if report.ok => ExecutionOutcome::completed(report.stdout, wall_time_ms),
        WorkerEvidence::Exited {
            report: Some(report),
            ..
        } => {
            let diagnostic = report.error.unwrap_or_else(|| match report.error_kind {
                Some(kind) => kind.name().to_string(),
                None => "unknown runtime fault".to_string(),
            });
            ExecutionOutcome::failed(
                OutcomeKind::RuntimeFault,
                diagnostic,
                report.stdout,
                wall_time_ms,
            )
        }
        WorkerEvidence::Exited { report: None, .. } => ExecutionOutcome::no_result(wall_time_ms),
    }
}

/// A spawned worker and the threads feeding and draining its pipes.
pub struct RunningWorker {
    child: Child,
    pid: u32,
    reports: Receiver<Result<Option<WorkerReport>>>,
    stderr: Option<thread::JoinHandle<(Vec<u8>, bool)>>,
}

impl RunningWorker {
    /// Spawn the worker and hand it `request`.
    pub fn spawn(config: &SandboxConfig, request: &WorkerRequest) -> Result<Self> {
        let mut cmd = Command::new(&config.worker.program);
        cmd.args(config.worker.role_args())
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Ok(filter) = std::env::var("RUST_LOG") {
            cmd.env("RUST_LOG", filter);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| to_process_error("failed to spawn sandboxed process", e))?;
        let pid = child.id();

        match Self::attach(&mut child, config, request) {
            Ok((reports, stderr)) => Ok(Self {
                child,
                pid,
                reports,
                stderr: Some(stderr),
            }),
            Err(e) => {
                kill_process_group(pid);
                let _ = child.kill();
                reap_within(&mut child, config.kill_grace);
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn attach(
        child: &mut Child,
        config: &SandboxConfig,
        request: &WorkerRequest,
    ) -> Result<(
        Receiver<Result<Option<WorkerReport>>>,
        thread::JoinHandle<(Vec<u8>, bool)>,
    )> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Process("worker stdin not captured".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Process("worker stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Process("worker stderr not captured".to_string()))?;

        // Written off-thread: a worker that never reads must not stall us.
        let frame = request.clone();
        thread::Builder::new()
            .name("worker-stdin".into())
            .spawn(move || {
                if let Err(e) = write_frame(stdin, &frame) {
                    log::debug!("run {}: request not delivered: {}", frame.run_id, e);
                }
            })
            .map_err(|e| to_process_error("failed to start stdin writer", e))?;

        let (tx, rx) = bounded(1);
        let limit = report_frame_limit(config.max_output_bytes);
        thread::Builder::new()
            .name("worker-stdout".into())
            .spawn(move || {
                let frame = read_first_frame::<_, WorkerReport>(&mut stdout, limit);
                let _ = tx.send(frame);
                let _ = std::io::copy(&mut stdout, &mut std::io::sink());
            })
            .map_err(|e| to_process_error("failed to start result reader", e))?;

        let stderr = thread::Builder::new()
            .name("worker-stderr".into())
            .spawn(move || read_bounded(stderr, STDERR_CAPTURE_BYTES))
            .map_err(|e| to_process_error("failed to start stderr reader", e))?;

        Ok((rx, stderr))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Poll until exit or `deadline` (measured from `started`).
    pub fn supervise(
        mut self,
        started: Instant,
        deadline: Duration,
        config: &SandboxConfig,
    ) -> WorkerEvidence {
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    let report = self.collect_report(config.result_grace);
                    self.log_stderr(status.code());
                    return WorkerEvidence::Exited {
                        status: Some(status),
                        report,
                    };
                }
                Ok(None) => {
                    let elapsed = started.elapsed();
                    if elapsed >= deadline {
                        let (kill, reaped) = self.terminate(config.kill_grace);
                        return WorkerEvidence::TimedOut { kill, reaped };
                    }
                    thread::sleep(config.poll_interval.min(deadline - elapsed));
                }
                Err(e) => {
                    log::warn!("wait on worker {} failed: {}", self.pid, e);
                    let _ = self.terminate(config.kill_grace);
                    return WorkerEvidence::Exited {
                        status: None,
                        report: None,
                    };
                }
            }
        }
    }

    fn terminate(&mut self, grace: Duration) -> (KillReport, bool) {
        let kill = kill_process_group(self.pid);
        for note in &kill.notes {
            log::debug!("worker {}: {}", self.pid, note);
        }
        let _ = self.child.kill();
        let reaped = reap_within(&mut self.child, grace);
        if !reaped {
            log::warn!("worker {} not reaped within {:?}", self.pid, grace);
        }
        (kill, reaped)
    }

    fn collect_report(&self, grace: Duration) -> Option<WorkerReport> {
        match self.reports.recv_timeout(grace) {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                log::debug!("worker {} posted an unreadable report: {}", self.pid, e);
                None
            }
            Err(RecvTimeoutError::Timeout) => {
                log::debug!("worker {} report not readable within {:?}", self.pid, grace);
                None
            }
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn log_stderr(&mut self, code: Option<i32>) {
        let Some(handle) = self.stderr.take() else {
            return;
        };
        if let Ok((bytes, truncated)) = handle.join() {
            if !bytes.is_empty() {
                log::debug!(
                    "worker {} exited with {:?}; stderr{}: {}",
                    self.pid,
                    code,
                    if truncated { " (truncated)" } else { "" },
                    String::from_utf8_lossy(&bytes).trim_end()
                );
            }
        }
    }
}

/// Runs snippets in isolated workers.
pub struct Supervisor {
    config: SandboxConfig,
    filter: StaticFilter,
    spawned: Counter,
}

impl Supervisor {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            filter: StaticFilter::standard(),
            spawned: Counter::new(),
        }
    }

    /// Configuration from the environment, or the defaults if it is malformed.
    pub fn from_env() -> Self {
        let config = SandboxConfig::from_env().unwrap_or_else(|e| {
            log::warn!("ignoring sandbox environment: {}", e);
            SandboxConfig::default()
        });
        Self::new(config)
    }

    /// Replace the deny table.
    pub fn with_filter(mut self, filter: StaticFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn filter(&self) -> &StaticFilter {
        &self.filter
    }

    /// Workers this supervisor has started.
    pub fn spawn_count(&self) -> u64 {
        self.spawned.get()
    }

    /// Run `snippet` with a deadline in seconds.
    pub fn execute(&self, snippet: &str, deadline_secs: f64) -> ExecutionOutcome {
        self.execute_as(snippet, deadline_secs, CorrelationIds::new())
    }

    /// [`Supervisor::execute`] under caller-supplied correlation ids.
    pub fn execute_as(
        &self,
        snippet: &str,
        deadline_secs: f64,
        correlation: CorrelationIds,
    ) -> ExecutionOutcome {
        match ExecutionRequest::from_secs(snippet, deadline_secs) {
            Ok(request) => self.run(&request, correlation),
            Err(e) => {
                let outcome = ExecutionOutcome::failed(
                    OutcomeKind::LaunchFailure,
                    diagnostic_of(&e),
                    String::new(),
                    0,
                );
                self.finish(&correlation, outcome, Instant::now())
            }
        }
    }

    /// Run a prepared request.
    pub fn run(&self, request: &ExecutionRequest, correlation: CorrelationIds) -> ExecutionOutcome {
        let started = Instant::now();
        let digest = snippet_digest(request.snippet());
        let deadline_ms = request.deadline().as_millis().min(u128::from(u64::MAX)) as u64;
        audit::execution_start(&correlation, &digest, deadline_ms);

        let metrics = get_metrics();
        metrics.active_executions.inc();

        let mut state = RunState::Ready;
        advance(&correlation, &mut state, RunState::Filtering);
        let verdict = self.filter.check(request.snippet());
        if let Some(pattern) = verdict.matched_pattern.as_deref().filter(|_| verdict.blocked) {
            audit::snippet_blocked(&correlation, &digest, pattern);
            let outcome = ExecutionOutcome::blocked(pattern);
            advance(&correlation, &mut state, RunState::Terminal(outcome.terminal_state()));
            metrics.active_executions.dec();
            return self.finish(&correlation, outcome, started);
        }

        advance(&correlation, &mut state, RunState::Running);
        let outcome = self.run_worker(request, &correlation, started);
        advance(&correlation, &mut state, RunState::Terminal(outcome.terminal_state()));
        metrics.active_executions.dec();
        self.finish(&correlation, outcome, started)
    }

    fn run_worker(
        &self,
        request: &ExecutionRequest,
        correlation: &CorrelationIds,
        started: Instant,
    ) -> ExecutionOutcome {
        let frame = WorkerRequest::new(
            &correlation.run_id,
            request.snippet(),
            request.deadline(),
            &self.config,
        );
        let worker = match RunningWorker::spawn(&self.config, &frame) {
            Ok(worker) => worker,
            Err(e) => {
                let detail = diagnostic_of(&e);
                audit::spawn_failure(correlation, &detail);
                return ExecutionOutcome::failed(
                    OutcomeKind::LaunchFailure,
                    detail,
                    String::new(),
                    elapsed_ms(started),
                );
            }
        };
        self.spawned.inc();
        get_metrics().workers_spawned.inc();
        let correlation = correlation.clone().with_worker_pid(worker.pid());
        audit::worker_spawned(&correlation);

        let evidence = worker.supervise(started, request.deadline(), &self.config);
        let wall_time_ms = elapsed_ms(started);
        match &evidence {
            WorkerEvidence::TimedOut { kill, reaped } => {
                get_metrics().forced_kills.inc();
                audit::wall_time_limit_violation(&correlation, wall_time_ms, deadline_of(request));
                audit::forced_kill(&correlation, kill.group_kill, *reaped);
            }
            WorkerEvidence::Exited {
                status,
                report: None,
            } => {
                let status = status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown status".to_string());
                audit::worker_crashed(&correlation, &status);
            }
            WorkerEvidence::Exited {
                report: Some(report),
                ..
            } if !report.ok => {
                if let Some(kind) = report.error_kind {
                    if kind == ErrorKind::OutputLimitError {
                        get_metrics().limit_violations_output.inc();
                        audit::output_limit_violation(&correlation, self.config.max_output_bytes);
                    }
                    audit::runtime_fault(&correlation, kind.name());
                }
            }
            WorkerEvidence::Exited { .. } => {}
        }
        classify(evidence, wall_time_ms)
    }

    fn finish(
        &self,
        correlation: &CorrelationIds,
        outcome: ExecutionOutcome,
        started: Instant,
    ) -> ExecutionOutcome {
        get_metrics().record_outcome(outcome.kind(), started.elapsed());
        audit::execution_end(correlation, outcome.kind(), outcome.wall_time_ms());
        outcome
    }
}

fn deadline_of(request: &ExecutionRequest) -> u64 {
    request.deadline().as_millis().min(u128::from(u64::MAX)) as u64
}

fn advance(correlation: &CorrelationIds, state: &mut RunState, next: RunState) {
    debug_assert!(
        !matches!(state, RunState::Terminal(_)),
        "terminal states have no transitions"
    );
    log::trace!("run {}: {:?} -> {:?}", correlation.run_id, state, next);
    *state = next;
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{TerminalState, WorkerCommand};

    fn shell_worker(script: &str) -> Supervisor {
        let mut worker = WorkerCommand::new("/bin/sh");
        worker.args = vec!["-c".to_string(), script.to_string()];
        Supervisor::new(SandboxConfig::default().with_worker(worker))
    }

    fn report(ok: bool, stdout: &str, error: Option<&str>) -> WorkerReport {
        WorkerReport {
            ok,
            stdout: stdout.to_string(),
            error: error.map(str::to_string),
            error_kind: None,
        }
    }

    #[test]
    fn classify_covers_every_exit_path() {
        let done = classify(
            WorkerEvidence::Exited {
                status: None,
                report: Some(report(true, "hi\n", None)),
            },
            5,
        );
        assert!(done.succeeded());
        assert_eq!(done.captured_output(), "hi\n");

        let fault = classify(
            WorkerEvidence::Exited {
                status: None,
                report: Some(report(false, "partial\n", Some("Traceback ..."))),
            },
            5,
        );
        assert_eq!(fault.kind(), OutcomeKind::RuntimeFault);
        assert_eq!(fault.captured_output(), "partial\n");
        assert_eq!(fault.diagnostic(), Some("Traceback ..."));

        let crash = classify(
            WorkerEvidence::Exited {
                status: None,
                report: None,
            },
            5,
        );
        assert_eq!(crash.terminal_state(), TerminalState::Crashed);

        let timeout = classify(
            WorkerEvidence::TimedOut {
                kill: KillReport::default(),
                reaped: true,
            },
            1000,
        );
        assert_eq!(timeout.diagnostic(), Some("Timeout"));
        assert_eq!(timeout.captured_output(), "");
    }

    #[test]
    fn blocked_snippet_spawns_nothing() {
        let supervisor = Supervisor::new(
            SandboxConfig::default().with_worker(WorkerCommand::new("/nonexistent/worker")),
        );
        let outcome = supervisor.execute("import os", 1.0);
        assert_eq!(outcome.kind(), OutcomeKind::Blocked);
        assert!(outcome.diagnostic().unwrap().contains("import"));
        assert_eq!(supervisor.spawn_count(), 0);
    }

    #[test]
    fn invalid_deadline_spawns_nothing() {
        let supervisor = Supervisor::default();
        for secs in [0.0, -2.0, f64::NAN] {
            let outcome = supervisor.execute("print(1)", secs);
            assert_eq!(outcome.terminal_state(), TerminalState::Failed);
            assert!(outcome.diagnostic().unwrap().starts_with("invalid deadline: "));
        }
        assert_eq!(supervisor.spawn_count(), 0);
    }

    #[test]
    fn missing_worker_is_a_launch_failure() {
        let supervisor = Supervisor::new(
            SandboxConfig::default().with_worker(WorkerCommand::new("/nonexistent/worker")),
        );
        let outcome = supervisor.execute("print(1)", 1.0);
        assert_eq!(outcome.kind(), OutcomeKind::LaunchFailure);
        assert!(outcome
            .diagnostic()
            .unwrap()
            .starts_with("failed to spawn sandboxed process: "));
        assert_eq!(supervisor.spawn_count(), 0);
    }

    #[test]
    fn silent_exit_is_a_crash() {
        let supervisor = shell_worker("exit 0");
        let outcome = supervisor.execute("print(1)", 2.0);
        assert_eq!(outcome.kind(), OutcomeKind::CrashNoResult);
        assert_eq!(outcome.diagnostic(), Some("no result from sandboxed process"));
        assert_eq!(supervisor.spawn_count(), 1);
    }

    #[test]
    fn garbage_on_stdout_is_a_crash() {
        let supervisor = shell_worker("echo 'Segmentation fault'");
        let outcome = supervisor.execute("print(1)", 2.0);
        assert_eq!(outcome.kind(), OutcomeKind::CrashNoResult);
    }

    #[test]
    fn report_frame_is_taken_from_stdout() {
        let supervisor = shell_worker(
            r#"cat >/dev/null; printf '{"ok":true,"stdout":"hi\\n","error":null,"error_kind":null}'"#,
        );
        let outcome = supervisor.execute("print('hi')", 2.0);
        assert!(outcome.succeeded());
        assert_eq!(outcome.captured_output(), "hi\n");
    }

    #[test]
    fn hung_worker_is_killed_at_the_deadline() {
        let supervisor = shell_worker("sleep 30 & wait");
        let started = Instant::now();
        let outcome = supervisor.execute("print(1)", 0.3);
        assert_eq!(outcome.kind(), OutcomeKind::Timeout);
        assert_eq!(outcome.diagnostic(), Some("Timeout"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    /// Reaped, or left as a zombie for init to collect.
    fn is_gone(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
        }
    }

    #[test]
    fn timed_out_worker_is_terminated_with_its_children() {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let dir = tempfile::tempdir().unwrap();
        let pids = dir.path().join("pids");
        let supervisor = shell_worker(&format!(
            "sleep 30 & echo \"$$ $!\" > '{}'; wait",
            pids.display()
        ));
        let outcome = supervisor.execute("print(1)", 0.5);
        assert_eq!(outcome.kind(), OutcomeKind::Timeout);
        assert_eq!(outcome.terminal_state(), TerminalState::TimedOut);

        let recorded = std::fs::read_to_string(&pids).unwrap();
        let recorded: Vec<i32> = recorded
            .split_whitespace()
            .map(|pid| pid.parse().unwrap())
            .collect();
        assert_eq!(recorded.len(), 2);

        let worker = Pid::from_raw(recorded[0]);
        assert_eq!(kill(worker, None), Err(Errno::ESRCH));

        let child = recorded[1];
        let deadline = Instant::now() + Duration::from_secs(2);
        while !is_gone(child) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(is_gone(child), "background child {child} outlived the worker");
    }

    #[test]
    fn custom_filter_replaces_the_table() {
        use crate::filter::{DenyCategory, DenyList, DenyPattern};

        let deny = DenyList::new(vec![
            DenyPattern::new(DenyCategory::DynamicEval, r"\bforbidden\b").unwrap(),
        ]);
        let supervisor = Supervisor::new(
            SandboxConfig::default().with_worker(WorkerCommand::new("/nonexistent/worker")),
        )
        .with_filter(StaticFilter::new(deny));
        let outcome = supervisor.execute("forbidden = 1", 1.0);
        assert_eq!(outcome.kind(), OutcomeKind::Blocked);
        assert_eq!(
            outcome.diagnostic(),
            Some(r"Forbidden pattern: \bforbidden\b")
        );
    }
}
