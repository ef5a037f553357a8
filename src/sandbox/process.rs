// Process signaling (spec §4.1 `terminate`): SIGTERM, wait out the grace
// period, SIGKILL. Grounded on the teacher's `daemon/lifecycle.rs`
// `stop_daemon`/`process_exists`, generalized from "the daemon's own PID"
// to an arbitrary cyber process PID.

use std::time::Duration;

use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::time::sleep;

/// Check whether a process with the given PID still exists, the same way
/// the teacher's daemon lifecycle probes its own PID file: `kill(pid, 0)`
/// without actually sending a signal.
pub fn process_exists(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    kill(Pid::from_raw(pid as i32), signal)
        .with_context(|| format!("failed to send {signal:?} to pid {pid}"))
}

/// Graceful-then-forceful termination: SIGTERM, poll for exit up to
/// `grace_period`, SIGKILL if still alive. Returns once the process is
/// confirmed gone or the kill signal itself fails to send.
pub async fn terminate_with_grace(pid: u32, grace_period: Duration) -> Result<()> {
    if !process_exists(pid) {
        return Ok(());
    }

    send_signal(pid, Signal::SIGTERM)?;

    let poll_interval = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while waited < grace_period {
        if !process_exists(pid) {
            return Ok(());
        }
        sleep(poll_interval).await;
        waited += poll_interval;
    }

    if process_exists(pid) {
        send_signal(pid, Signal::SIGKILL)?;
        sleep(Duration::from_millis(200)).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_exists() {
        assert!(process_exists(std::process::id()));
    }

    #[test]
    fn very_high_pid_does_not_exist() {
        assert!(!process_exists(999_999_999));
    }

    #[tokio::test]
    async fn terminate_on_dead_pid_is_a_no_op() {
        terminate_with_grace(999_999_999, Duration::from_millis(10))
            .await
            .unwrap();
    }
}
