/// procfs backend
///
/// Mirrors the Win32 backend on top of `/proc`, signals and `setpriority`.
/// Zombies are left out of snapshots: a process that has exited but was not
/// yet reaped counts as gone, the same way an exited process disappears
/// from a ToolHelp snapshot even while handles to it remain open.

use crate::error::{ProcError, Result};
use crate::platform::argv;
use crate::types::{Access, CreateOptions, Pid, Priority, ProcessSnapshotEntry};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid as NixPid;
use std::fs;
use std::io;
use std::path::Path;
use std::process::{Child, Command};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// Poll tick used while waiting on a process without an exit signal
const EXIT_POLL: Duration = Duration::from_millis(10);

/// `comm` is truncated to this many bytes by the kernel
const COMM_LEN: usize = 15;

/// Upper bound on waiting for a new child to finish exec
const SPAWN_SETTLE: Duration = Duration::from_millis(500);

/// Children released while still running; reaped on later calls
static RELEASED_CHILDREN: Mutex<Vec<Pid>> = Mutex::new(Vec::new());

/// A process instance pinned by pid and start time
pub struct OwnedProcess {
    pid: Pid,
    start_time: u64,
    child: Option<Child>,
}

impl Drop for OwnedProcess {
    fn drop(&mut self) {
        // 終了済みの子プロセスは回収しておく
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                release_child(child.id());
            }
        }
    }
}

fn release_child(pid: Pid) {
    if let Ok(mut released) = RELEASED_CHILDREN.lock() {
        released.push(pid);
    }
}

/// Reaps released children that have exited since they were dropped
fn reap_released_children() {
    let Ok(mut released) = RELEASED_CHILDREN.lock() else {
        return;
    };
    released.retain(|&pid| {
        match waitpid(NixPid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => true,
            Ok(_) => false,
            // ECHILD: already reaped elsewhere
            Err(_) => false,
        }
    });
}

// ============================================
// /proc/<pid>/stat
// ============================================

#[derive(Debug, PartialEq, Eq)]
struct StatFields {
    comm: String,
    state: char,
    ppid: Pid,
    session: u32,
    num_threads: u32,
    start_time: u64,
}

fn parse_stat(content: &str) -> Option<StatFields> {
    // comm may contain spaces and parentheses; it spans to the last ')'
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    let comm = content.get(open + 1..close)?.to_string();
    let rest: Vec<&str> = content.get(close + 1..)?.split_whitespace().collect();

    // rest[0] is field 3 (state)
    Some(StatFields {
        comm,
        state: rest.first()?.chars().next()?,
        ppid: rest.get(1)?.parse().ok()?,
        session: rest.get(3)?.parse().ok()?,
        num_threads: rest.get(17)?.parse().ok()?,
        start_time: rest.get(19)?.parse().ok()?,
    })
}

fn read_stat(pid: Pid) -> Option<StatFields> {
    let content = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_stat(&content)
}

fn is_gone(state: char) -> bool {
    matches!(state, 'Z' | 'X' | 'x')
}

fn read_cmdline(pid: Pid) -> Option<Vec<String>> {
    let raw = fs::read(format!("/proc/{}/cmdline", pid)).ok()?;
    let args: Vec<String> = raw
        .split(|&b| b == 0)
        .filter(|arg| !arg.is_empty())
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect();
    (!args.is_empty()).then_some(args)
}

/// Executable base name; falls back to argv[0] when `comm` was truncated
fn process_name(pid: Pid, comm: &str) -> String {
    if comm.len() >= COMM_LEN {
        let arg0 = read_cmdline(pid).and_then(|args| args.into_iter().next());
        if let Some(base) = arg0.as_deref().and_then(|a| Path::new(a).file_name()) {
            let base = base.to_string_lossy();
            if base.starts_with(comm) {
                return base.into_owned();
            }
        }
    }
    comm.to_string()
}

fn errno_error(errno: Errno, context: &str) -> ProcError {
    match errno {
        Errno::ESRCH | Errno::ENOENT => ProcError::NotFound(context.to_string()),
        Errno::EPERM | Errno::EACCES => ProcError::AccessDenied(context.to_string()),
        other => ProcError::os(other as i32 as u32, context),
    }
}

fn io_error(err: io::Error, context: &str) -> ProcError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => ProcError::AccessDenied(context.to_string()),
        _ => match err.raw_os_error() {
            Some(code) => ProcError::os(code as u32, context),
            None => ProcError::Io(err),
        },
    }
}

// ============================================
// プロセス列挙
// ============================================

/// Takes a system-wide process snapshot
pub fn snapshot() -> Result<Vec<ProcessSnapshotEntry>> {
    reap_released_children();

    let dir = fs::read_dir("/proc").map_err(|e| {
        ProcError::DirectoryUnavailable(e.raw_os_error().unwrap_or(0) as u32)
    })?;

    let mut entries = Vec::new();
    for entry in dir.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<Pid>().ok()) else {
            continue;
        };
        // 列挙中に終了したプロセスは読み飛ばす
        let Some(stat) = read_stat(pid) else {
            continue;
        };
        if is_gone(stat.state) {
            continue;
        }

        entries.push(ProcessSnapshotEntry {
            pid,
            parent_pid: stat.ppid,
            name: process_name(pid, &stat.comm),
            thread_count: stat.num_threads,
        });
    }

    Ok(entries)
}

/// Opens an existing process. Access is checked lazily by each operation.
pub fn open(pid: Pid, _access: Access) -> Result<OwnedProcess> {
    match read_stat(pid) {
        Some(stat) if !is_gone(stat.state) => Ok(OwnedProcess {
            pid,
            start_time: stat.start_time,
            child: None,
        }),
        _ => Err(ProcError::NotFound(format!("pid {}", pid))),
    }
}

fn is_alive(process: &OwnedProcess) -> bool {
    match read_stat(process.pid) {
        Some(stat) => !is_gone(stat.state) && stat.start_time == process.start_time,
        None => false,
    }
}

fn has_exited(process: &mut OwnedProcess) -> Result<bool> {
    if let Some(child) = process.child.as_mut() {
        return Ok(child.try_wait()?.is_some());
    }
    Ok(!is_alive(process))
}

// ============================================
// プロセス制御
// ============================================

/// Sends SIGKILL. The exit code cannot be chosen on this platform.
pub fn terminate(process: &OwnedProcess, _exit_code: u32) -> Result<()> {
    if !is_alive(process) {
        return Err(ProcError::NotFound(format!("pid {}", process.pid)));
    }
    kill(NixPid::from_raw(process.pid as i32), Signal::SIGKILL)
        .map_err(|e| errno_error(e, "kill"))
}

pub fn set_priority(process: &OwnedProcess, priority: Priority) -> Result<()> {
    let rc = unsafe {
        libc::setpriority(
            libc::PRIO_PROCESS,
            process.pid as libc::id_t,
            priority.nice_value(),
        )
    };
    if rc == -1 {
        return Err(errno_error(Errno::last(), "setpriority"));
    }
    Ok(())
}

/// Waits at most `slice` for the process to exit
pub fn wait(process: &mut OwnedProcess, slice: Duration) -> Result<bool> {
    let deadline = Instant::now() + slice;
    loop {
        if has_exited(process)? {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        thread::sleep((deadline - now).min(EXIT_POLL));
    }
}

// ============================================
// プロセス情報
// ============================================

pub fn full_image_path(process: &OwnedProcess) -> Option<String> {
    let target = fs::read_link(format!("/proc/{}/exe", process.pid)).ok()?;
    let path = target.to_string_lossy();
    Some(path.strip_suffix(" (deleted)").unwrap_or(&path).to_string())
}

/// No device namespace on this platform
pub fn native_image_path(_process: &OwnedProcess) -> Option<String> {
    None
}

pub fn logical_drive_devices() -> Vec<(String, String)> {
    Vec::new()
}

pub fn memory_usage(process: &OwnedProcess) -> Option<u64> {
    let statm = fs::read_to_string(format!("/proc/{}/statm", process.pid)).ok()?;
    let resident: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(resident * page_size as u64)
}

pub fn session_id(pid: Pid) -> Option<u32> {
    read_stat(pid).map(|stat| stat.session)
}

/// Re-joined argument vector, truncated to `capacity` characters
pub fn command_line(process: &OwnedProcess, capacity: usize) -> Option<String> {
    let args = read_cmdline(process.pid)?;
    let line = argv::join_command_line(&args);
    Some(line.chars().take(capacity).collect())
}

// ============================================
// プロセス作成
// ============================================

pub fn spawn(command: &str, options: &CreateOptions) -> Result<(Pid, OwnedProcess)> {
    let args = argv::split_command_line(command);
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| ProcError::InvalidArgument("command line is empty".to_string()))?;

    let mut cmd = Command::new(program);
    cmd.args(rest);
    if let Some(dir) = &options.working_dir {
        cmd.current_dir(dir);
    }
    if options.desktop.is_some() {
        tracing::debug!("Desktop selection is not supported here; ignoring");
    }

    reap_released_children();

    let mut child = cmd.spawn().map_err(|e| io_error(e, "spawn"))?;
    let pid = child.id();
    let start_time = settle_after_spawn(&mut child).map_err(|e| {
        release_child(pid);
        e
    })?;

    Ok((
        pid,
        OwnedProcess {
            pid,
            start_time,
            child: Some(child),
        },
    ))
}

/// Waits until the new program's argument vector is published and returns
/// its start time.
///
/// `spawn` can return while the argument range in `/proc/<pid>/cmdline` is
/// still empty.
fn settle_after_spawn(child: &mut Child) -> Result<u64> {
    let pid = child.id();
    let deadline = Instant::now() + SPAWN_SETTLE;
    loop {
        let stat = read_stat(pid);
        if let Some(stat) = &stat {
            if read_cmdline(pid).is_some() {
                return Ok(stat.start_time);
            }
        }

        // 即終了したプロセスは引数を読めない
        let exited = child.try_wait()?.is_some();
        if exited || Instant::now() >= deadline {
            tracing::debug!("Process {} did not publish its command line", pid);
            return match stat {
                Some(stat) => Ok(stat.start_time),
                None if exited => Ok(0),
                None => Err(ProcError::NotFound(format!("pid {}", pid))),
            };
        }
        thread::sleep(Duration::from_millis(1));
    }
}

pub fn spawn_in_active_session(
    _command: &str,
    _options: &CreateOptions,
) -> Result<(Pid, OwnedProcess)> {
    tracing::warn!("Launching into the active console session requires Windows");
    Err(ProcError::Unsupported(
        "launching into the active console session",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat() {
        let line = "1234 (my (odd) proc) S 1 1234 1234 0 -1 4194560 100 0 0 0 \
                    5 3 0 0 20 0 7 0 98765 10000 200 18446744073709551615";
        let stat = parse_stat(line).unwrap();
        assert_eq!(stat.comm, "my (odd) proc");
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.ppid, 1);
        assert_eq!(stat.session, 1234);
        assert_eq!(stat.num_threads, 7);
        assert_eq!(stat.start_time, 98765);
    }

    #[test]
    fn test_parse_stat_truncated() {
        assert!(parse_stat("1234 (sleep) S 1").is_none());
        assert!(parse_stat("garbage").is_none());
    }

    #[test]
    fn test_snapshot_contains_self() {
        let entries = snapshot().expect("Failed to list processes");
        let current_pid = std::process::id();
        assert!(entries.iter().any(|e| e.pid == current_pid));
    }

    fn stat_state(pid: Pid) -> Option<char> {
        read_stat(pid).map(|stat| stat.state)
    }

    #[test]
    fn test_spawn_publishes_command_line() {
        let (pid, process) = spawn("sleep 30", &CreateOptions::new()).expect("Failed to spawn");
        assert_eq!(read_cmdline(pid), Some(vec!["sleep".to_string(), "30".to_string()]));
        assert_ne!(process.start_time, 0);
        assert!(is_alive(&process));
        terminate(&process, 1).unwrap();
    }

    #[test]
    fn test_released_child_is_reaped() {
        let (pid, process) =
            spawn("sh -c \"exit 0\"", &CreateOptions::new()).expect("Failed to spawn");
        drop(process);

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            snapshot().unwrap();
            match stat_state(pid) {
                Some('Z') if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(20))
                }
                state => {
                    assert_ne!(state, Some('Z'), "released child left as a zombie");
                    break;
                }
            }
        }
    }

    #[test]
    fn test_released_running_child_is_reaped_after_kill() {
        let (pid, process) = spawn("sleep 30", &CreateOptions::new()).expect("Failed to spawn");
        drop(process);

        kill(NixPid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while stat_state(pid).is_some() {
            assert!(Instant::now() < deadline, "killed child never reaped");
            snapshot().unwrap();
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_open_missing() {
        assert!(matches!(open(u32::MAX - 1, Access::Query), Err(ProcError::NotFound(_))));
    }
}
