//! Supervisor <-> worker frames.
//!
//! The supervisor writes exactly one [`WorkerRequest`] to the worker's stdin
//! and closes it. The worker answers with at most one [`WorkerReport`] on its
//! stdout. Both frames are single JSON documents.

use crate::config::types::{Result, SandboxConfig, SandboxError};
use crate::restricted::error::ErrorKind;
use crate::restricted::{Limits, RunReport};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::time::Duration;

/// Upper bound on a request frame the worker is willing to read.
pub const MAX_REQUEST_BYTES: u64 = 4 * 1024 * 1024;

/// JSON string escaping can expand one output byte to six (`\u00XX`).
const REPORT_ESCAPE_FACTOR: u64 = 6;

/// Room for the fault trace and frame keys around the captured output.
const REPORT_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Host->worker launch contract.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkerRequest {
    /// Correlation id of the run, echoed in worker logs
    pub run_id: String,
    pub snippet: String,
    pub limits: Limits,
    pub memory_limit_bytes: Option<u64>,
    pub deadline_ms: u64,
}

impl WorkerRequest {
    pub fn new(run_id: &str, snippet: &str, deadline: Duration, config: &SandboxConfig) -> Self {
        Self {
            run_id: run_id.to_string(),
            snippet: snippet.to_string(),
            limits: Limits {
                max_output_bytes: config.max_output_bytes,
                recursion_limit: config.recursion_limit,
            },
            memory_limit_bytes: config.memory_limit_bytes,
            deadline_ms: deadline.as_millis().min(u128::from(u64::MAX)) as u64,
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Worker->host result frame.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkerReport {
    pub ok: bool,
    pub stdout: String,
    /// Full fault trace when `ok` is false
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl From<RunReport> for WorkerReport {
    fn from(report: RunReport) -> Self {
        Self {
            ok: report.ok,
            stdout: report.stdout,
            error: report.error,
            error_kind: report.error_kind,
        }
    }
}

/// Largest report frame the supervisor accepts for a given output bound.
pub fn report_frame_limit(max_output_bytes: usize) -> u64 {
    (max_output_bytes as u64)
        .saturating_mul(REPORT_ESCAPE_FACTOR)
        .saturating_add(REPORT_OVERHEAD_BYTES)
}

/// Serialize `value` as one frame and flush it.
pub fn write_frame<W: Write, T: Serialize>(mut writer: W, value: &T) -> Result<()> {
    let payload = serde_json::to_vec(value)
        .map_err(|e| SandboxError::Protocol(format!("failed to encode frame: {e}")))?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Decode the first frame from `reader`, reading at most `limit` bytes.
///
/// Returns `Ok(None)` when the stream ends before any frame starts. Trailing
/// bytes after the first frame are never read.
pub fn read_first_frame<R: Read, T: DeserializeOwned>(reader: R, limit: u64) -> Result<Option<T>> {
    let mut frames = serde_json::Deserializer::from_reader(reader.take(limit)).into_iter::<T>();
    match frames.next() {
        None => Ok(None),
        Some(Ok(frame)) => Ok(Some(frame)),
        Some(Err(e)) if e.is_eof() => Err(SandboxError::Protocol(format!(
            "truncated frame after {} bytes",
            frames.byte_offset()
        ))),
        Some(Err(e)) => Err(SandboxError::Protocol(format!("failed to decode frame: {e}"))),
    }
}

/// Read the request frame the supervisor sent on stdin.
pub fn read_request<R: Read>(reader: R) -> Result<WorkerRequest> {
    read_first_frame(reader, MAX_REQUEST_BYTES)?
        .ok_or_else(|| SandboxError::Protocol("empty request frame".to_string()))
}

/// Drain `reader` into memory, keeping at most `limit` bytes.
pub fn read_bounded<R: Read>(mut reader: R, limit: usize) -> (Vec<u8>, bool) {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    let mut truncated = false;
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if out.len() + n > limit {
                    let remaining = limit.saturating_sub(out.len());
                    out.extend_from_slice(&buf[..remaining]);
                    truncated = true;
                    // Keep draining so the writer never blocks on a full pipe.
                    continue;
                }
                out.extend_from_slice(&buf[..n]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    (out, truncated)
}
