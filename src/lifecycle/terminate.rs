use crate::directory::{resolve, Snapshot};
use crate::error::{ProcError, Result};
use crate::handle::ProcessHandle;
use crate::types::{Access, Pid, ProcessQuery};
use serde::Serialize;
use std::collections::HashSet;

/// Exit code given to every process killed by a tree sweep
pub const TREE_EXIT_CODE: u32 = 1;

/// Extra snapshots taken to catch descendants started mid-sweep
const MAX_SWEEPS: usize = 3;

/// Terminates one process
pub fn terminate(pid: Pid, exit_code: u32) -> Result<()> {
    if pid == 0 {
        return Err(ProcError::InvalidArgument("pid 0".to_string()));
    }
    let handle = ProcessHandle::open(pid, Access::Terminate)?;
    handle.terminate(exit_code).map_err(|e| {
        tracing::warn!("Failed to terminate process {}: {}", pid, e);
        e
    })?;
    tracing::info!("Terminated process {} (exit code {})", pid, exit_code);
    Ok(())
}

/// Resolves `query` and terminates the match
pub fn terminate_by_query(query: &ProcessQuery, exit_code: u32) -> Result<Pid> {
    let pid = resolve(query)?.ok_or_else(|| ProcError::NotFound(query.to_string()))?;
    terminate(pid, exit_code)?;
    Ok(pid)
}

/// Outcome of a tree sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct TreeSweep {
    pub root: Pid,
    /// Descendants killed, in kill order (the root is not listed)
    pub terminated: Vec<Pid>,
    /// Processes that exited on their own before they could be killed
    pub already_gone: Vec<Pid>,
    /// Processes that could not be killed (typically access denied)
    pub failed: Vec<Pid>,
    pub root_terminated: bool,
}

impl TreeSweep {
    fn record(&mut self, pid: Pid, result: Result<()>) {
        match result {
            Ok(()) => self.terminated.push(pid),
            Err(e) if e.is_not_found() => self.already_gone.push(pid),
            Err(e) => {
                tracing::debug!("Could not terminate descendant {}: {}", pid, e);
                self.failed.push(pid);
            }
        }
    }
}

/// Terminates `root` and all of its descendants, children first.
///
/// Each sweep takes one snapshot, builds the parent -> children index and
/// kills bottom-up; sweeps repeat while new descendants keep showing up.
/// The calling process is never terminated. Descendants that already
/// exited are not an error.
///
/// Identifiers can be recycled during a sweep, so a dead descendant's pid
/// may in rare cases belong to an unrelated process by the time it is killed.
pub fn terminate_tree(root: Pid) -> Result<TreeSweep> {
    if root == 0 {
        return Err(ProcError::InvalidArgument("pid 0".to_string()));
    }
    let current_pid = std::process::id();
    if root == current_pid {
        return Err(ProcError::InvalidArgument(
            "refusing to terminate the calling process".to_string(),
        ));
    }

    let mut snapshot = Snapshot::take()?;
    if snapshot.get(root).is_none() {
        return Err(ProcError::NotFound(format!("pid {}", root)));
    }

    let mut sweep = TreeSweep {
        root,
        ..TreeSweep::default()
    };
    let mut handled: HashSet<Pid> = HashSet::from([root, current_pid]);

    for round in 0..MAX_SWEEPS {
        let pending: Vec<Pid> = snapshot
            .descendants(root)
            .into_iter()
            .filter(|pid| handled.insert(*pid))
            .collect();
        if pending.is_empty() {
            break;
        }

        tracing::debug!("Sweep {} of tree {}: {} process(es)", round + 1, root, pending.len());
        for pid in pending {
            sweep.record(pid, terminate(pid, TREE_EXIT_CODE));
        }

        snapshot = Snapshot::take()?;
    }

    match terminate(root, TREE_EXIT_CODE) {
        Ok(()) => sweep.root_terminated = true,
        Err(e) if e.is_not_found() => {}
        Err(e) => {
            tracing::warn!("Failed to terminate tree root {}: {}", root, e);
            return Err(e);
        }
    }

    tracing::info!(
        "Terminated tree {}: {} killed, {} already gone, {} failed",
        root,
        sweep.terminated.len(),
        sweep.already_gone.len(),
        sweep.failed.len()
    );
    Ok(sweep)
}

pub fn terminate_tree_by_query(query: &ProcessQuery) -> Result<TreeSweep> {
    let pid = resolve(query)?.ok_or_else(|| ProcError::NotFound(query.to_string()))?;
    terminate_tree(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::create::create;
    use crate::lifecycle::wait::{wait_for_exit, wait_for_handle_exit, WaitContext};
    use crate::testutil;
    use crate::types::CreateOptions;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_terminate_invalid_pid() {
        assert!(matches!(terminate(0, 1), Err(ProcError::InvalidArgument(_))));
    }

    #[test]
    fn test_terminate_missing() {
        assert!(terminate(u32::MAX - 1, 1).is_err());
        assert!(matches!(
            terminate_by_query(&ProcessQuery::Pid(u32::MAX - 1), 1),
            Err(ProcError::NotFound(_))
        ));
        assert!(matches!(
            terminate_by_query(&ProcessQuery::name("no-such-process.exe"), 1),
            Err(ProcError::NotFound(_))
        ));
    }

    #[test]
    fn test_tree_refuses_self() {
        assert!(matches!(
            terminate_tree(std::process::id()),
            Err(ProcError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_tree_missing_root() {
        assert!(matches!(terminate_tree(u32::MAX - 1), Err(ProcError::NotFound(_))));
    }

    #[test]
    fn test_terminate_by_pid_query() {
        let mut spawned = create(testutil::long_running_command(), &CreateOptions::new())
            .expect("Failed to create process");

        let killed = terminate_by_query(&ProcessQuery::Pid(spawned.pid), 1).unwrap();
        assert_eq!(killed, spawned.pid);

        let mut ctx = WaitContext::new();
        assert!(wait_for_handle_exit(&mut spawned.handle, Some(Duration::from_secs(10)), &mut ctx).unwrap());
    }

    #[test]
    fn test_terminate_exited_process_with_handle_held() {
        let mut spawned = create(testutil::short_lived_command(), &CreateOptions::new())
            .expect("Failed to create process");
        let mut ctx = WaitContext::new();
        assert!(wait_for_handle_exit(&mut spawned.handle, Some(Duration::from_secs(10)), &mut ctx).unwrap());

        assert!(matches!(terminate(spawned.pid, 1), Err(ProcError::NotFound(_))));
        assert!(matches!(spawned.handle.terminate(1), Err(ProcError::NotFound(_))));
        assert!(matches!(terminate_tree(spawned.pid), Err(ProcError::NotFound(_))));
    }

    #[test]
    fn test_terminate_tree() {
        let mut spawned = create(testutil::tree_command(), &CreateOptions::new())
            .expect("Failed to create process tree");

        // 子プロセスが起動するまで待つ
        let start = Instant::now();
        let mut children = Vec::new();
        while start.elapsed() < Duration::from_secs(10) {
            children = Snapshot::take().unwrap().descendants(spawned.pid);
            if !children.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        assert!(!children.is_empty(), "tree never started");

        let sweep = terminate_tree(spawned.pid).unwrap();
        assert_eq!(sweep.root, spawned.pid);
        assert!(sweep.failed.is_empty());
        // The shell may exit by itself once its children are gone
        for pid in &children {
            assert!(sweep.terminated.contains(pid) || sweep.already_gone.contains(pid));
        }

        let mut ctx = WaitContext::new();
        assert!(wait_for_handle_exit(&mut spawned.handle, Some(Duration::from_secs(10)), &mut ctx).unwrap());
        for pid in children {
            let query = ProcessQuery::Pid(pid);
            assert!(wait_for_exit(&query, Some(Duration::from_secs(10)), &mut ctx).unwrap());
        }
    }
}
