use crate::directory::resolve;
use crate::error::{ProcError, Result};
use crate::handle::ProcessHandle;
use crate::types::{Access, Pid, Priority, ProcessQuery};

/// Sets the priority class of an already-resolved process
pub fn set_priority_class(pid: Pid, priority: Priority) -> Result<()> {
    let handle = ProcessHandle::open(pid, Access::SetInformation)?;
    handle.set_priority(priority).map_err(|e| {
        tracing::warn!("Failed to set priority of {} to {}: {}", pid, priority, e);
        e
    })?;
    tracing::info!("Set priority of {} to {}", pid, priority);
    Ok(())
}

/// Resolves `query` and applies the priority named by `code`
/// (`L`, `B`, `N`, `A`, `H` or `R`, case-insensitive).
pub fn set_priority(query: &ProcessQuery, code: char) -> Result<Pid> {
    let priority = Priority::from_code(code)?;
    let pid = resolve(query)?.ok_or_else(|| ProcError::NotFound(query.to_string()))?;
    set_priority_class(pid, priority)?;
    Ok(pid)
}
