use crate::config::types::{Result, SandboxError};
use std::time::{Duration, Instant};

/// What happened while tearing down a worker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KillReport {
    pub kill_sent: bool,
    pub group_kill: bool,
    pub waited_ms: u64,
    pub notes: Vec<String>,
}

/// SIGKILL the worker's whole process group, falling back to the leader alone.
///
/// The worker is spawned as its own group leader, so `-pid` addresses it and
/// anything it may have left behind.
pub fn kill_process_group(pid: u32) -> KillReport {
    let mut report = KillReport::default();
    let start = Instant::now();
    let raw = pid as libc::pid_t;

    if raw <= 0 {
        report.notes.push(format!("refusing to signal pid {raw}"));
        return report;
    }

    // SAFETY: kill(2) has no memory-safety preconditions; raw > 0 so -raw
    // names a single process group and never "every process".
    let kill_rc = unsafe { libc::kill(-raw, libc::SIGKILL) };
    if kill_rc == 0 {
        report.kill_sent = true;
        report.group_kill = true;
    } else {
        report.notes.push(format!(
            "group SIGKILL fallback used: {}",
            std::io::Error::last_os_error()
        ));
        // SAFETY: as above.
        let rc = unsafe { libc::kill(raw, libc::SIGKILL) };
        report.kill_sent = rc == 0;
    }

    report.waited_ms = start.elapsed().as_millis() as u64;
    report
}

/// Ask the kernel to SIGKILL this process when its parent dies.
pub fn setup_parent_death_signal() -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        use nix::sys::prctl;
        use nix::sys::signal::Signal;

        prctl::set_pdeathsig(Signal::SIGKILL).map_err(|e| {
            SandboxError::Process(format!("Failed to set parent death signal: {}", e))
        })?;
        log::debug!("Parent death signal (SIGKILL) configured");
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    {
        log::warn!("Parent death signal not supported on this platform");
        Ok(())
    }
}

/// Poll `try_wait` until the child is reaped or `grace` elapses.
pub fn reap_within(child: &mut std::process::Child, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(None) => return false,
            Err(e) => {
                log::warn!("wait after kill failed: {}", e);
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};

    #[test]
    fn killing_a_group_reaps_the_leader() {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()
            .unwrap();
        let report = kill_process_group(child.id());
        assert!(report.kill_sent);
        assert!(report.group_kill);
        assert!(reap_within(&mut child, Duration::from_secs(2)));
    }

    #[test]
    fn nonpositive_pid_is_refused() {
        let report = kill_process_group(0);
        assert!(!report.kill_sent);
        assert_eq!(report.notes.len(), 1);
    }
}
