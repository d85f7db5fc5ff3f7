use super::Pid;
use serde::{Deserialize, Serialize};

/// One row of a process directory snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSnapshotEntry {
    pub pid: Pid,
    pub parent_pid: Pid,
    /// Executable base name (e.g. `notepad.exe`)
    pub name: String,
    pub thread_count: u32,
}

/// Metadata of a live process, filled best-effort.
///
/// Fields that could not be resolved are left empty (`String::new()`, `0`,
/// `None`) instead of failing the whole query.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub parent_pid: Pid,
    pub session_id: Option<u32>,
    pub exe_path: String,
    pub command_line: String,
    /// Resident set / working set size
    pub memory_usage_bytes: u64,
    pub thread_count: u32,
}

impl ProcessInfo {
    /// True when at least one optional field could not be resolved
    pub fn is_partial(&self) -> bool {
        self.session_id.is_none()
            || self.exe_path.is_empty()
            || self.command_line.is_empty()
            || self.memory_usage_bytes == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_partial() {
        let mut info = ProcessInfo {
            pid: 42,
            parent_pid: 1,
            session_id: Some(1),
            exe_path: "C:\\Windows\\notepad.exe".to_string(),
            command_line: "notepad.exe".to_string(),
            memory_usage_bytes: 4096,
            thread_count: 3,
        };
        assert!(!info.is_partial());

        info.command_line.clear();
        assert!(info.is_partial());
    }

    #[test]
    fn test_info_json() {
        let info = ProcessInfo {
            pid: 7,
            ..Default::default()
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"pid\":7"));
        assert!(json.contains("\"session_id\":null"));
    }
}
