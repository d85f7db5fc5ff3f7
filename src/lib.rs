// proctl - Process inspection and lifecycle control
//
// This library enumerates running processes, reads metadata out of them,
// and creates, terminates, reprioritizes and waits on them. Windows is the
// primary target; Linux is served by a procfs backend.

pub mod directory;
pub mod error;
pub mod handle;
pub mod introspect;
pub mod lifecycle;
pub mod platform;
pub mod types;

#[cfg(test)]
mod testutil;

pub use directory::{exists, parent_of, resolve, resolve_all, snapshot, Snapshot};
pub use error::{ProcError, Result};
pub use handle::ProcessHandle;
pub use introspect::{get_command_line, get_info, get_path, COMMAND_LINE_CAPACITY};
pub use lifecycle::{
    create, create_in_active_session, launch_fire_and_forget, open_by_name, open_by_pid,
    set_priority, terminate, terminate_by_query, terminate_tree, terminate_tree_by_query,
    timeout_from_millis, wait_for_appearance, wait_for_exit, wait_for_handle_exit, CancelToken,
    ProcessCreationResult, SpawnedProcess, TreeSweep, WaitContext,
};
pub use types::{
    Access, CreateOptions, Pid, Priority, ProcessInfo, ProcessQuery, ProcessSnapshotEntry,
    ShowMode,
};
