/// Remote introspection - metadata read out of another running process

use crate::directory::Snapshot;
use crate::error::{ProcError, Result};
use crate::handle::ProcessHandle;
use crate::platform;
use crate::types::{Access, Pid, ProcessInfo};

/// Command line capacity used by [`get_info`] (UTF-16 units on Windows)
pub const COMMAND_LINE_CAPACITY: usize = 2048;

fn check_pid(pid: Pid) -> Result<()> {
    if pid == 0 {
        return Err(ProcError::InvalidArgument("pid 0".to_string()));
    }
    Ok(())
}

/// Rewrites a device-namespace path to a drive-letter path.
///
/// The first drive whose device is a prefix of `raw` (followed by a path
/// separator) wins; unknown devices are returned unchanged.
pub fn rewrite_device_path(raw: &str, drives: &[(String, String)]) -> String {
    for (drive, device) in drives {
        if let Some(rest) = raw.strip_prefix(device.as_str()) {
            if rest.starts_with('\\') {
                return format!("{}{}", drive, rest);
            }
        }
    }
    raw.to_string()
}

fn path_of(handle: &ProcessHandle) -> String {
    if let Some(path) = platform::full_image_path(handle.inner()) {
        return path;
    }
    match platform::native_image_path(handle.inner()) {
        Some(raw) => rewrite_device_path(&raw, &platform::logical_drive_devices()),
        None => String::new(),
    }
}

/// Executable path of a process.
///
/// Fails only when the process cannot be opened; an unresolvable path is
/// returned as an empty string.
pub fn get_path(pid: Pid) -> Result<String> {
    check_pid(pid)?;
    let handle = ProcessHandle::open(pid, Access::QueryLimited)?;
    Ok(path_of(&handle))
}

/// Command line of a process, truncated to `capacity` characters.
///
/// Best-effort: protected processes, bitness mismatches and denied reads
/// all produce an empty string.
pub fn get_command_line(pid: Pid, capacity: usize) -> Result<String> {
    check_pid(pid)?;
    if capacity == 0 {
        return Err(ProcError::InvalidArgument("capacity 0".to_string()));
    }

    let handle = match ProcessHandle::open(pid, Access::Read) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::debug!("Command line of {} unavailable: {}", pid, e);
            return Ok(String::new());
        }
    };

    Ok(platform::command_line(handle.inner(), capacity).unwrap_or_default())
}

/// Collects all metadata of a process.
///
/// Fails wholesale only when the process cannot be opened or is missing
/// from the snapshot; other fields degrade to empty values.
pub fn get_info(pid: Pid) -> Result<ProcessInfo> {
    check_pid(pid)?;
    let handle = ProcessHandle::open(pid, Access::QueryLimited)?;

    let snapshot = Snapshot::take()?;
    let entry = snapshot
        .get(pid)
        .ok_or_else(|| ProcError::NotFound(format!("pid {}", pid)))?;

    let info = ProcessInfo {
        pid,
        parent_pid: entry.parent_pid,
        session_id: platform::session_id(pid),
        exe_path: path_of(&handle),
        command_line: get_command_line(pid, COMMAND_LINE_CAPACITY).unwrap_or_default(),
        memory_usage_bytes: platform::memory_usage(handle.inner()).unwrap_or(0),
        thread_count: entry.thread_count,
    };

    if info.is_partial() {
        tracing::debug!("Partial info for process {}", pid);
    }
    Ok(info)
}
