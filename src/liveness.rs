//! Parent-process liveness probe.
//!
//! The agent is a co-located sidecar; it has no business outliving the
//! process that spawned it. On Linux, a reparented process (`PPid` becomes
//! 1, or changes from the pid first observed at startup) means the original
//! launcher exited without telling us, so we treat that as a shutdown
//! signal. Restart policy itself is out of scope — this probe only detects
//! the condition and cancels the agent's own tasks.

use std::time::Duration;

use crate::cancel::CancellationToken;

/// Runs until `cancel` fires or a reparenting is observed, in which case it
/// cancels `cancel` itself and returns.
pub async fn run(interval: Duration, cancel: CancellationToken) {
    let Some(initial_ppid) = parent_pid() else {
        tracing::debug!("parent liveness probe unavailable on this platform, skipping");
        cancel.cancelled().await;
        return;
    };

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => return,
        }

        match parent_pid() {
            Some(current) if current != initial_ppid => {
                tracing::warn!(
                    initial_ppid,
                    current_ppid = current,
                    "parent process appears to have exited, shutting down"
                );
                cancel.cancel();
                return;
            }
            _ => {}
        }
    }
}

#[cfg(target_os = "linux")]
fn parent_pid() -> Option<u32> {
    let status = std::fs::read_to_string("/proc/self/stat").ok()?;
    // Format: pid (comm) state ppid ...  — comm may itself contain spaces or
    // parens, so split on the closing paren of comm first.
    let after_comm = status.rsplit_once(')')?.1;
    after_comm.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(not(target_os = "linux"))]
fn parent_pid() -> Option<u32> {
    None
}

#[cfg(test)]
#[cfg(target_os = "linux")]
mod tests {
    use super::*;

    #[test]
    fn reads_a_plausible_parent_pid() {
        assert!(parent_pid().unwrap() > 0);
    }

    #[tokio::test]
    async fn unchanged_parent_never_cancels() {
        let cancel = CancellationToken::new();
        let probe_cancel = cancel.clone();
        let handle = tokio::spawn(run(Duration::from_millis(10), probe_cancel));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!cancel.is_cancelled());
        cancel.cancel();
        handle.await.unwrap();
    }
}
