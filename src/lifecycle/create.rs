use crate::error::{ProcError, Result};
use crate::handle::ProcessHandle;
use crate::platform;
use crate::types::{CreateOptions, Pid};

/// A freshly created process. The caller owns `handle`.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub pid: Pid,
    pub handle: ProcessHandle,
}

pub type ProcessCreationResult = Result<SpawnedProcess>;

fn check_command(command: &str) -> Result<()> {
    if command.trim().is_empty() {
        return Err(ProcError::InvalidArgument(
            "command line must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Starts `command` in the caller's session.
///
/// The first token of the command line names the program; the rest is
/// passed to it unchanged.
pub fn create(command: &str, options: &CreateOptions) -> ProcessCreationResult {
    check_command(command)?;

    match platform::spawn(command, options) {
        Ok((pid, inner)) => {
            tracing::info!("Created process {}: {}", pid, command);
            Ok(SpawnedProcess {
                pid,
                handle: ProcessHandle::from_owned(pid, inner),
            })
        }
        Err(e) => {
            tracing::warn!("Failed to create '{}': {}", command, e);
            Err(e)
        }
    }
}

/// Starts `command` as the user logged on to the active console session.
///
/// Requires a caller running as a service (or with the TCB privilege).
pub fn create_in_active_session(command: &str, options: &CreateOptions) -> ProcessCreationResult {
    check_command(command)?;

    let (pid, inner) = platform::spawn_in_active_session(command, options)?;
    tracing::info!("Created process {} in the active session: {}", pid, command);
    Ok(SpawnedProcess {
        pid,
        handle: ProcessHandle::from_owned(pid, inner),
    })
}

/// Starts `command` and releases the handle immediately
pub fn launch_fire_and_forget(command: &str, options: &CreateOptions) -> Result<Pid> {
    let SpawnedProcess { pid, handle } = create(command, options)?;
    drop(handle);
    Ok(pid)
}
