use crate::error::Result;

#[cfg(windows)]
use crate::error::ProcError;
#[cfg(windows)]
use crate::platform::windows::{os_error, OwnedHandle};
#[cfg(windows)]
use windows::core::PCWSTR;
#[cfg(windows)]
use windows::Win32::Foundation::{GetLastError, ERROR_NOT_ALL_ASSIGNED, HANDLE, LUID};
#[cfg(windows)]
use windows::Win32::Security::{
    AdjustTokenPrivileges, GetTokenInformation, LookupPrivilegeValueW, TokenElevation,
    LUID_AND_ATTRIBUTES, SE_PRIVILEGE_ENABLED, TOKEN_ADJUST_PRIVILEGES, TOKEN_ELEVATION,
    TOKEN_PRIVILEGES, TOKEN_QUERY,
};
#[cfg(windows)]
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

/// Checks if the current process is running with elevated privileges (administrator)
#[cfg(windows)]
pub fn is_elevated() -> Result<bool> {
    unsafe {
        let mut token = HANDLE::default();

        // Get current process token
        OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token)
            .map_err(|e| os_error(e, "OpenProcessToken"))?;
        let token = OwnedHandle::new(token);

        // Query elevation status
        let mut elevation = TOKEN_ELEVATION { TokenIsElevated: 0 };
        let mut return_length = 0u32;

        GetTokenInformation(
            token.raw(),
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut _),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut return_length,
        )
        .map_err(|e| os_error(e, "GetTokenInformation"))?;

        Ok(elevation.TokenIsElevated != 0)
    }
}

/// Checks if the current process runs as root
#[cfg(unix)]
pub fn is_elevated() -> Result<bool> {
    Ok(nix::unistd::geteuid().is_root())
}

/// Enables a named privilege (e.g. `SeTcbPrivilege`) on the current process token
#[cfg(windows)]
pub fn enable_privilege(name: &str) -> Result<()> {
    let name_wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();

    unsafe {
        let mut token = HANDLE::default();
        OpenProcessToken(
            GetCurrentProcess(),
            TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
            &mut token,
        )
        .map_err(|e| os_error(e, "OpenProcessToken"))?;
        let token = OwnedHandle::new(token);

        let mut luid = LUID::default();
        LookupPrivilegeValueW(PCWSTR::null(), PCWSTR(name_wide.as_ptr()), &mut luid)
            .map_err(|e| os_error(e, "LookupPrivilegeValueW"))?;

        let privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: luid,
                Attributes: SE_PRIVILEGE_ENABLED,
            }],
        };
        AdjustTokenPrivileges(token.raw(), false, Some(&privileges), 0, None, None)
            .map_err(|e| os_error(e, "AdjustTokenPrivileges"))?;

        // 成功しても特権を保持していない場合がある
        if GetLastError() == ERROR_NOT_ALL_ASSIGNED {
            return Err(ProcError::AccessDenied(format!("{} not held", name)));
        }
    }

    Ok(())
}
