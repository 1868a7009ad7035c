/// Audit events for sandboxed executions.
///
/// Every execution gets a correlation record (request id, run id, worker pid)
/// and a SHA-256 digest of the snippet; snippet text itself never reaches the
/// audit trail. Events are emitted through `log` on the `snipbox::audit`
/// target and, once [`init_audit_log`] has been called, appended as JSON lines
/// to an audit file.
use crate::config::types::{OutcomeKind, Result, SandboxError};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::SystemTime;
use uuid::Uuid;

/// Log target for audit events.
pub const AUDIT_TARGET: &str = "snipbox::audit";

/// Audit event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditSeverity {
    High,
    Medium,
    Low,
}

/// Types of audit events we track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    // Lifecycle events
    ExecutionStart,
    ExecutionEnd,
    WorkerSpawned,

    // Rejections and faults
    SnippetBlocked,
    SpawnFailure,
    RuntimeFault,
    WorkerCrashed,

    // Limit violation events
    WallTimeLimitViolation,
    OutputLimitViolation,

    // Termination
    ForcedKill,
}

impl AuditEventType {
    /// Get the default severity for this event type
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            AuditEventType::ExecutionStart
            | AuditEventType::ExecutionEnd
            | AuditEventType::WorkerSpawned
            | AuditEventType::RuntimeFault => AuditSeverity::Low,

            AuditEventType::SnippetBlocked | AuditEventType::OutputLimitViolation => {
                AuditSeverity::Medium
            }

            AuditEventType::SpawnFailure
            | AuditEventType::WorkerCrashed
            | AuditEventType::WallTimeLimitViolation
            | AuditEventType::ForcedKill => AuditSeverity::High,
        }
    }
}

/// Correlation identifiers for one execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationIds {
    /// Caller-level identifier; shared by a timeout retry and its first attempt
    pub request_id: String,
    /// Identifier of this execution attempt
    pub run_id: String,
    /// Worker PID once spawned
    pub worker_pid: Option<u32>,
}

impl CorrelationIds {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            run_id: Uuid::new_v4().to_string(),
            worker_pid: None,
        }
    }

    /// New attempt under an existing request.
    pub fn for_request(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            run_id: Uuid::new_v4().to_string(),
            worker_pid: None,
        }
    }

    pub fn with_worker_pid(mut self, pid: u32) -> Self {
        self.worker_pid = Some(pid);
        self
    }
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Hex SHA-256 of the snippet text.
pub fn snippet_digest(snippet: &str) -> String {
    let digest = Sha256::digest(snippet.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

/// Individual audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub timestamp: SystemTime,
    pub details: String,
    pub correlation: Option<CorrelationIds>,
    pub snippet_sha256: Option<String>,
    pub outcome: Option<OutcomeKind>,
    pub wall_time_ms: Option<u64>,
}

impl AuditEvent {
    /// Create a new event with default severity
    pub fn new(event_type: AuditEventType, details: String) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            timestamp: SystemTime::now(),
            details,
            correlation: None,
            snippet_sha256: None,
            outcome: None,
            wall_time_ms: None,
        }
    }

    pub fn with_correlation(mut self, correlation: &CorrelationIds) -> Self {
        self.correlation = Some(correlation.clone());
        self
    }

    pub fn with_digest(mut self, digest: &str) -> Self {
        self.snippet_sha256 = Some(digest.to_string());
        self
    }

    pub fn with_outcome(mut self, outcome: OutcomeKind, wall_time_ms: u64) -> Self {
        self.outcome = Some(outcome);
        self.wall_time_ms = Some(wall_time_ms);
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// JSON line written to the audit file.
    pub fn to_json(&self) -> serde_json::Value {
        let mut entry = serde_json::json!({
            "timestamp": self.timestamp
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            "event_type": self.event_type,
            "severity": self.severity,
            "details": self.details,
            "process_id": std::process::id(),
        });
        if let Some(correlation) = &self.correlation {
            entry["correlation"] = serde_json::json!({
                "request_id": correlation.request_id,
                "run_id": correlation.run_id,
                "worker_pid": correlation.worker_pid,
            });
        }
        if let Some(digest) = &self.snippet_sha256 {
            entry["snippet_sha256"] = serde_json::json!(digest);
        }
        if let Some(outcome) = self.outcome {
            entry["outcome"] = serde_json::json!(outcome);
        }
        if let Some(ms) = self.wall_time_ms {
            entry["wall_time_ms"] = serde_json::json!(ms);
        }
        entry
    }
}

/// Append-only JSON-lines audit file
pub struct AuditLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl AuditLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SandboxError::Config(format!("Failed to create audit log directory: {}", e))
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SandboxError::Config(format!("Failed to open audit log: {}", e)))?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn append(&self, event: &AuditEvent) {
        let Ok(mut file) = self.file.lock() else {
            error!(target: AUDIT_TARGET, "Failed to acquire lock on audit file");
            return;
        };
        if let Err(e) = writeln!(file, "{}", event.to_json()) {
            error!(target: AUDIT_TARGET, "Failed to write to audit log: {}", e);
        }
        if let Err(e) = file.flush() {
            error!(target: AUDIT_TARGET, "Failed to flush audit log: {}", e);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

static AUDIT_LOG: OnceLock<AuditLog> = OnceLock::new();

/// Route audit events to `path` in addition to the logger.
pub fn init_audit_log(path: &Path) -> Result<()> {
    let log = AuditLog::open(path)?;
    if AUDIT_LOG.set(log).is_err() {
        warn!(target: AUDIT_TARGET, "Audit log already initialized");
    } else {
        info!(target: AUDIT_TARGET, "Audit log initialized at {}", path.display());
    }
    Ok(())
}

/// Emit one event.
pub fn record(event: AuditEvent) {
    let run_id = event
        .correlation
        .as_ref()
        .map(|c| c.run_id.as_str())
        .unwrap_or("-");
    match event.severity {
        AuditSeverity::High => {
            warn!(target: AUDIT_TARGET, "{:?} run={} {}", event.event_type, run_id, event.details)
        }
        AuditSeverity::Medium => {
            info!(target: AUDIT_TARGET, "{:?} run={} {}", event.event_type, run_id, event.details)
        }
        AuditSeverity::Low => {
            log::debug!(target: AUDIT_TARGET, "{:?} run={} {}", event.event_type, run_id, event.details)
        }
    }
    if let Some(log) = AUDIT_LOG.get() {
        log.append(&event);
    }
}

pub fn execution_start(correlation: &CorrelationIds, digest: &str, deadline_ms: u64) {
    record(
        AuditEvent::new(
            AuditEventType::ExecutionStart,
            format!("Execution started: deadline={} ms", deadline_ms),
        )
        .with_correlation(correlation)
        .with_digest(digest),
    );
}

pub fn snippet_blocked(correlation: &CorrelationIds, digest: &str, pattern: &str) {
    record(
        AuditEvent::new(
            AuditEventType::SnippetBlocked,
            format!("Snippet blocked by pattern {}", pattern),
        )
        .with_correlation(correlation)
        .with_digest(digest),
    );
}

pub fn worker_spawned(correlation: &CorrelationIds) {
    record(
        AuditEvent::new(
            AuditEventType::WorkerSpawned,
            format!("Worker spawned: pid={:?}", correlation.worker_pid),
        )
        .with_correlation(correlation),
    );
}

pub fn spawn_failure(correlation: &CorrelationIds, detail: &str) {
    record(
        AuditEvent::new(
            AuditEventType::SpawnFailure,
            format!("Worker spawn failed: {}", detail),
        )
        .with_correlation(correlation),
    );
}

pub fn wall_time_limit_violation(correlation: &CorrelationIds, used_ms: u64, limit_ms: u64) {
    record(
        AuditEvent::new(
            AuditEventType::WallTimeLimitViolation,
            format!(
                "Wall time limit violated: used={} ms, limit={} ms",
                used_ms, limit_ms
            ),
        )
        .with_correlation(correlation),
    );
}

pub fn forced_kill(correlation: &CorrelationIds, group: bool, reaped: bool) {
    record(
        AuditEvent::new(
            AuditEventType::ForcedKill,
            format!("SIGKILL sent: process_group={}, reaped={}", group, reaped),
        )
        .with_correlation(correlation),
    );
}

pub fn worker_crashed(correlation: &CorrelationIds, status: &str) {
    record(
        AuditEvent::new(
            AuditEventType::WorkerCrashed,
            format!("Worker exited without a report: {}", status),
        )
        .with_correlation(correlation),
    );
}

pub fn runtime_fault(correlation: &CorrelationIds, kind: &str) {
    record(
        AuditEvent::new(AuditEventType::RuntimeFault, format!("Snippet raised {}", kind))
            .with_correlation(correlation),
    );
}

pub fn output_limit_violation(correlation: &CorrelationIds, limit: usize) {
    record(
        AuditEvent::new(
            AuditEventType::OutputLimitViolation,
            format!("Output limit violated: limit={} bytes", limit),
        )
        .with_correlation(correlation),
    );
}

pub fn execution_end(correlation: &CorrelationIds, outcome: OutcomeKind, wall_time_ms: u64) {
    record(
        AuditEvent::new(
            AuditEventType::ExecutionEnd,
            format!("Execution ended: outcome={}", outcome),
        )
        .with_correlation(correlation)
        .with_outcome(outcome, wall_time_ms),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_ids_creation() {
        let correlation = CorrelationIds::new();
        assert!(correlation.worker_pid.is_none());
        assert!(!correlation.request_id.is_empty());
        assert_ne!(correlation.request_id, correlation.run_id);
    }

    #[test]
    fn test_retry_keeps_request_id() {
        let first = CorrelationIds::new();
        let retry = CorrelationIds::for_request(&first.request_id).with_worker_pid(77);
        assert_eq!(retry.request_id, first.request_id);
        assert_ne!(retry.run_id, first.run_id);
        assert_eq!(retry.worker_pid, Some(77));
    }

    #[test]
    fn test_snippet_digest() {
        assert_eq!(
            snippet_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(snippet_digest("print(1)").len(), 64);
    }

    #[test]
    fn test_event_json_has_no_snippet_text() {
        let correlation = CorrelationIds::new().with_worker_pid(42);
        let event = AuditEvent::new(AuditEventType::ExecutionEnd, "done".to_string())
            .with_correlation(&correlation)
            .with_digest(&snippet_digest("secret = 1"))
            .with_outcome(OutcomeKind::Timeout, 1003);
        let json = event.to_json();
        assert_eq!(json["event_type"], "ExecutionEnd");
        assert_eq!(json["outcome"], "TLE");
        assert_eq!(json["wall_time_ms"], 1003);
        assert_eq!(json["correlation"]["worker_pid"], 42);
        assert!(!json.to_string().contains("secret"));
    }

    #[test]
    fn test_event_type_severity() {
        assert_eq!(
            AuditEventType::ExecutionStart.default_severity(),
            AuditSeverity::Low
        );
        assert_eq!(
            AuditEventType::ForcedKill.default_severity(),
            AuditSeverity::High
        );
    }

    #[test]
    fn test_audit_log_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.log");
        let log = AuditLog::open(&path).unwrap();
        log.append(&AuditEvent::new(AuditEventType::WorkerSpawned, "a".to_string()));
        log.append(&AuditEvent::new(AuditEventType::ExecutionEnd, "b".to_string()));
        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["details"], "b");
    }
}
