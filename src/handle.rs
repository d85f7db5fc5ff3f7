use crate::error::{ProcError, Result};
use crate::platform::{self, OwnedProcess};
use crate::types::{Access, Pid, Priority};
use std::fmt;
use std::time::Duration;

/// Owned reference to one specific process instance.
///
/// The underlying OS handle is released exactly once, when the value is
/// dropped. Returning a `ProcessHandle` from a function moves the release
/// obligation to the caller; nothing inside the crate keeps a copy.
pub struct ProcessHandle {
    pid: Pid,
    inner: OwnedProcess,
}

impl ProcessHandle {
    pub(crate) fn from_owned(pid: Pid, inner: OwnedProcess) -> Self {
        Self { pid, inner }
    }

    /// Opens an existing process by identifier
    pub fn open(pid: Pid, access: Access) -> Result<Self> {
        if pid == 0 {
            return Err(ProcError::InvalidArgument("pid 0".to_string()));
        }
        let inner = platform::open(pid, access).map_err(|e| {
            tracing::debug!("Failed to open process {} ({:?}): {}", pid, access, e);
            e
        })?;
        Ok(Self { pid, inner })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub(crate) fn inner(&self) -> &OwnedProcess {
        &self.inner
    }

    pub fn terminate(&self, exit_code: u32) -> Result<()> {
        platform::terminate(&self.inner, exit_code)
    }

    pub fn set_priority(&self, priority: Priority) -> Result<()> {
        platform::set_priority(&self.inner, priority)
    }

    /// Waits at most `timeout` on the exit signal. Returns true once exited.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<bool> {
        platform::wait(&mut self.inner, timeout)
    }

    /// Checks for exit without blocking
    pub fn has_exited(&mut self) -> Result<bool> {
        self.wait_timeout(Duration::ZERO)
    }
}

#[cfg(windows)]
impl ProcessHandle {
    /// Borrows the raw handle; it stays owned by `self`
    pub fn as_raw_handle(&self) -> windows::Win32::Foundation::HANDLE {
        self.inner.raw()
    }

    /// Hands the raw handle to the caller, who must close it
    pub fn into_raw_handle(self) -> windows::Win32::Foundation::HANDLE {
        self.inner.into_raw()
    }

    /// Takes ownership of a raw process handle.
    ///
    /// # Safety
    /// `handle` must be a valid process handle for `pid` that no one else closes.
    pub unsafe fn from_raw_handle(pid: Pid, handle: windows::Win32::Foundation::HANDLE) -> Self {
        Self {
            pid,
            inner: platform::OwnedHandle::new(handle),
        }
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle").field("pid", &self.pid).finish()
    }
}
