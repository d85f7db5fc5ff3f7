/// Lifecycle controller - create, terminate, reprioritize and wait on processes

pub mod create;
pub mod priority;
pub mod terminate;
pub mod wait;

pub use create::{
    create, create_in_active_session, launch_fire_and_forget, ProcessCreationResult,
    SpawnedProcess,
};
pub use priority::{set_priority, set_priority_class};
pub use terminate::{terminate, terminate_by_query, terminate_tree, terminate_tree_by_query, TreeSweep};
pub use wait::{
    timeout_from_millis, wait_for_appearance, wait_for_exit, wait_for_handle_exit, CancelToken,
    WaitContext, DEFAULT_POLL_INTERVAL,
};

use crate::directory::resolve;
use crate::error::{ProcError, Result};
use crate::handle::ProcessHandle;
use crate::types::{Access, Pid, ProcessQuery};

/// Opens a process by identifier
pub fn open_by_pid(pid: Pid, access: Access) -> Result<ProcessHandle> {
    ProcessHandle::open(pid, access)
}

/// Opens the first process running `name`
pub fn open_by_name(name: &str, access: Access) -> Result<ProcessHandle> {
    if name.is_empty() {
        return Err(ProcError::InvalidArgument(
            "process name must not be empty".to_string(),
        ));
    }
    let query = ProcessQuery::name(name);
    let pid = resolve(&query)?.ok_or_else(|| ProcError::NotFound(name.to_string()))?;
    ProcessHandle::open(pid, access)
}
