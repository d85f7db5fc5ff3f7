use crate::error::{ProcError, Result, CODE_ACCESS_DENIED, CODE_INVALID_PARAMETER};
use crate::platform::elevation;
use crate::types::{Access, CreateOptions, Pid, Priority, ProcessSnapshotEntry};
use std::ffi::c_void;
use std::mem;
use std::ptr;
use std::time::Duration;
use windows::core::{s, w, PCWSTR, PWSTR};
use windows::Win32::Foundation::{
    CloseHandle, GetLastError, HANDLE, INVALID_HANDLE_VALUE, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows::Win32::Security::{
    DuplicateTokenEx, SecurityIdentification, TokenPrimary, TOKEN_ACCESS_MASK,
};
use windows::Win32::Storage::FileSystem::{GetLogicalDrives, QueryDosDeviceW};
use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};
use windows::Win32::System::Environment::{CreateEnvironmentBlock, DestroyEnvironmentBlock};
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows::Win32::System::ProcessStatus::{
    GetProcessImageFileNameW, GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS,
};
use windows::Win32::System::RemoteDesktop::{
    ProcessIdToSessionId, WTSGetActiveConsoleSessionId, WTSQueryUserToken,
};
use windows::Win32::System::Threading::{
    CreateProcessAsUserW, CreateProcessW, OpenProcess, QueryFullProcessImageNameW,
    SetPriorityClass, TerminateProcess, WaitForSingleObject, ABOVE_NORMAL_PRIORITY_CLASS,
    BELOW_NORMAL_PRIORITY_CLASS, CREATE_UNICODE_ENVIRONMENT, HIGH_PRIORITY_CLASS,
    IDLE_PRIORITY_CLASS, NORMAL_PRIORITY_CLASS, PROCESS_ACCESS_RIGHTS, PROCESS_CREATION_FLAGS,
    PROCESS_INFORMATION, PROCESS_NAME_WIN32, PROCESS_QUERY_INFORMATION,
    PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SET_INFORMATION, PROCESS_SYNCHRONIZE,
    PROCESS_TERMINATE, PROCESS_VM_READ, REALTIME_PRIORITY_CLASS, STARTF_USESHOWWINDOW,
    STARTUPINFOW,
};

const ERROR_GEN_FAILURE: u32 = 31;
const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
const ERROR_NO_TOKEN: u32 = 1008;
const MAXIMUM_ALLOWED: u32 = 0x0200_0000;
const INTERACTIVE_DESKTOP: &str = "winsta0\\default";

/// Initial and maximum path buffer sizes, in UTF-16 units
const PATH_BUFFER_INITIAL: usize = 1024;
const PATH_BUFFER_MAX: usize = 32 * 1024;

// ============================================
// ハンドル管理
// ============================================

/// A kernel handle closed exactly once when dropped
pub struct OwnedHandle(HANDLE);

// Kernel handles are process-wide and may be used from any thread
unsafe impl Send for OwnedHandle {}

impl OwnedHandle {
    pub fn new(handle: HANDLE) -> Self {
        Self(handle)
    }

    pub fn raw(&self) -> HANDLE {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        !self.0.is_invalid() && self.0 != INVALID_HANDLE_VALUE
    }

    /// Gives up ownership without closing
    pub fn into_raw(self) -> HANDLE {
        let handle = self.0;
        mem::forget(self);
        handle
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if self.is_valid() {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

pub type OwnedProcess = OwnedHandle;

/// Environment block built for a user token
struct EnvironmentBlock(*mut c_void);

impl Drop for EnvironmentBlock {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe {
                let _ = DestroyEnvironmentBlock(self.0);
            }
        }
    }
}

// ============================================
// エラー変換
// ============================================

/// Extracts the Win32 error code from an HRESULT-wrapped error
pub(crate) fn win32_code(err: &windows::core::Error) -> u32 {
    let hr = err.code().0 as u32;
    if hr & 0xFFFF_0000 == 0x8007_0000 {
        hr & 0xFFFF
    } else {
        hr
    }
}

pub(crate) fn os_error(err: windows::core::Error, context: &str) -> ProcError {
    match win32_code(&err) {
        CODE_ACCESS_DENIED => ProcError::AccessDenied(context.to_string()),
        code => ProcError::os(code, context),
    }
}

fn last_error_or(fallback: u32) -> u32 {
    let code = unsafe { GetLastError() }.0;
    if code == 0 {
        fallback
    } else {
        code
    }
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn wide_to_string(buffer: &[u16]) -> String {
    let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..len])
}

fn millis(duration: Duration) -> u32 {
    // INFINITE (u32::MAX) は使わない
    duration.as_millis().min((u32::MAX - 1) as u128) as u32
}

// ============================================
// プロセス列挙
// ============================================

/// Takes a system-wide process snapshot
pub fn snapshot() -> Result<Vec<ProcessSnapshotEntry>> {
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }
        .map_err(|e| ProcError::DirectoryUnavailable(win32_code(&e)))?;
    let snapshot = OwnedHandle::new(snapshot);
    if !snapshot.is_valid() {
        return Err(ProcError::DirectoryUnavailable(last_error_or(ERROR_GEN_FAILURE)));
    }

    let mut entries = Vec::new();
    unsafe {
        let mut entry: PROCESSENTRY32W = mem::zeroed();
        entry.dwSize = mem::size_of::<PROCESSENTRY32W>() as u32;

        if Process32FirstW(snapshot.raw(), &mut entry).is_ok() {
            loop {
                entries.push(ProcessSnapshotEntry {
                    pid: entry.th32ProcessID,
                    parent_pid: entry.th32ParentProcessID,
                    name: wide_to_string(&entry.szExeFile),
                    thread_count: entry.cntThreads,
                });

                if Process32NextW(snapshot.raw(), &mut entry).is_err() {
                    break;
                }
            }
        }
    }

    Ok(entries)
}

fn access_rights(access: Access) -> PROCESS_ACCESS_RIGHTS {
    match access {
        Access::QueryLimited => PROCESS_QUERY_LIMITED_INFORMATION,
        Access::Query => PROCESS_QUERY_INFORMATION,
        Access::Read => PROCESS_QUERY_INFORMATION | PROCESS_VM_READ,
        // SYNCHRONIZE lets terminate tell an exited process from a denied one
        Access::Terminate => PROCESS_TERMINATE | PROCESS_SYNCHRONIZE,
        Access::SetInformation => PROCESS_SET_INFORMATION,
        Access::Synchronize => PROCESS_SYNCHRONIZE,
    }
}

/// Opens an existing process
pub fn open(pid: Pid, access: Access) -> Result<OwnedHandle> {
    let handle = unsafe { OpenProcess(access_rights(access), false, pid) }.map_err(|e| {
        match win32_code(&e) {
            // OpenProcess reports a dead or unknown pid as an invalid parameter
            CODE_INVALID_PARAMETER => ProcError::NotFound(format!("pid {}", pid)),
            CODE_ACCESS_DENIED => ProcError::AccessDenied(format!("pid {}", pid)),
            code => ProcError::os(code, "OpenProcess"),
        }
    })?;

    let handle = OwnedHandle::new(handle);
    if !handle.is_valid() {
        return Err(ProcError::NotFound(format!("pid {}", pid)));
    }
    Ok(handle)
}

// ============================================
// プロセス制御
// ============================================

pub fn terminate(process: &OwnedHandle, exit_code: u32) -> Result<()> {
    unsafe { TerminateProcess(process.raw(), exit_code) }.map_err(|e| {
        // 既に終了したプロセスも ACCESS_DENIED になる
        if unsafe { WaitForSingleObject(process.raw(), 0) } == WAIT_OBJECT_0 {
            return ProcError::NotFound("process already exited".to_string());
        }
        os_error(e, "TerminateProcess")
    })
}

pub fn set_priority(process: &OwnedHandle, priority: Priority) -> Result<()> {
    let class = match priority {
        Priority::Idle => IDLE_PRIORITY_CLASS,
        Priority::BelowNormal => BELOW_NORMAL_PRIORITY_CLASS,
        Priority::Normal => NORMAL_PRIORITY_CLASS,
        Priority::AboveNormal => ABOVE_NORMAL_PRIORITY_CLASS,
        Priority::High => HIGH_PRIORITY_CLASS,
        Priority::Realtime => REALTIME_PRIORITY_CLASS,
    };
    unsafe { SetPriorityClass(process.raw(), class) }.map_err(|e| os_error(e, "SetPriorityClass"))
}

/// Blocks on the process exit signal for at most `slice`
pub fn wait(process: &mut OwnedHandle, slice: Duration) -> Result<bool> {
    let result = unsafe { WaitForSingleObject(process.raw(), millis(slice)) };
    if result == WAIT_OBJECT_0 {
        Ok(true)
    } else if result == WAIT_TIMEOUT {
        Ok(false)
    } else {
        Err(ProcError::os(last_error_or(ERROR_GEN_FAILURE), "WaitForSingleObject"))
    }
}

// ============================================
// プロセス情報
// ============================================

enum PathRead {
    Done(usize),
    TooSmall,
    Failed,
}

/// Runs `read` with a buffer that doubles on `TooSmall`, up to `max` units
fn read_with_growing_buffer(
    initial: usize,
    max: usize,
    mut read: impl FnMut(&mut [u16]) -> PathRead,
) -> Option<String> {
    let mut size = initial;
    loop {
        let mut buffer = vec![0u16; size];
        match read(&mut buffer) {
            PathRead::Done(len) => {
                return Some(String::from_utf16_lossy(&buffer[..len.min(size)]));
            }
            PathRead::TooSmall if size < max => size = (size * 2).min(max),
            PathRead::TooSmall | PathRead::Failed => return None,
        }
    }
}

/// Canonical Win32 image path
pub fn full_image_path(process: &OwnedHandle) -> Option<String> {
    read_with_growing_buffer(PATH_BUFFER_INITIAL, PATH_BUFFER_MAX, |buffer| {
        let mut len = buffer.len() as u32;
        let result = unsafe {
            QueryFullProcessImageNameW(
                process.raw(),
                PROCESS_NAME_WIN32,
                PWSTR(buffer.as_mut_ptr()),
                &mut len,
            )
        };
        match result {
            Ok(()) => PathRead::Done(len as usize),
            Err(e) if win32_code(&e) == ERROR_INSUFFICIENT_BUFFER => PathRead::TooSmall,
            Err(_) => PathRead::Failed,
        }
    })
}

/// Image name in the device namespace (`\Device\HarddiskVolume3\...`)
pub fn native_image_path(process: &OwnedHandle) -> Option<String> {
    read_with_growing_buffer(PATH_BUFFER_INITIAL, PATH_BUFFER_MAX, |buffer| {
        let len = unsafe { GetProcessImageFileNameW(process.raw(), buffer) } as usize;
        if len == 0 {
            if last_error_or(ERROR_GEN_FAILURE) == ERROR_INSUFFICIENT_BUFFER {
                PathRead::TooSmall
            } else {
                PathRead::Failed
            }
        } else if len >= buffer.len() {
            // 切り詰められた
            PathRead::TooSmall
        } else {
            PathRead::Done(len)
        }
    })
}

/// `(drive, device)` pairs for every mapped logical drive, e.g. `("C:", "\Device\HarddiskVolume3")`
pub fn logical_drive_devices() -> Vec<(String, String)> {
    let mask = unsafe { GetLogicalDrives() };
    let mut devices = Vec::new();

    for i in 0..26u8 {
        if mask & (1 << i) == 0 {
            continue;
        }
        let drive = format!("{}:", (b'A' + i) as char);
        let drive_wide = to_wide(&drive);
        let mut target = [0u16; 260];
        let len = unsafe { QueryDosDeviceW(PCWSTR(drive_wide.as_ptr()), Some(&mut target)) };
        if len > 2 {
            devices.push((drive, wide_to_string(&target)));
        }
    }

    devices
}

pub fn memory_usage(process: &OwnedHandle) -> Option<u64> {
    unsafe {
        let mut counters: PROCESS_MEMORY_COUNTERS = mem::zeroed();
        counters.cb = mem::size_of::<PROCESS_MEMORY_COUNTERS>() as u32;
        GetProcessMemoryInfo(process.raw(), &mut counters, counters.cb).ok()?;
        Some(counters.WorkingSetSize as u64)
    }
}

pub fn session_id(pid: Pid) -> Option<u32> {
    let mut session = 0u32;
    unsafe { ProcessIdToSessionId(pid, &mut session) }.ok()?;
    Some(session)
}

// ============================================
// コマンドライン (PEB 経由)
// ============================================

#[repr(C)]
struct ProcessBasicInformation {
    exit_status: i32,
    peb_base_address: *mut c_void,
    affinity_mask: usize,
    base_priority: i32,
    unique_process_id: usize,
    inherited_from_unique_process_id: usize,
}

type NtQueryInformationProcessFn =
    unsafe extern "system" fn(HANDLE, u32, *mut c_void, u32, *mut u32) -> i32;

const PROCESS_BASIC_INFORMATION_CLASS: u32 = 0;

// PEB.ProcessParameters / RTL_USER_PROCESS_PARAMETERS.CommandLine
#[cfg(target_pointer_width = "64")]
const PEB_PROCESS_PARAMETERS: usize = 0x20;
#[cfg(target_pointer_width = "64")]
const PARAMS_COMMAND_LINE: usize = 0x70;
#[cfg(target_pointer_width = "32")]
const PEB_PROCESS_PARAMETERS: usize = 0x10;
#[cfg(target_pointer_width = "32")]
const PARAMS_COMMAND_LINE: usize = 0x40;

const POINTER_SIZE: usize = mem::size_of::<usize>();

fn nt_query_information_process() -> Option<NtQueryInformationProcessFn> {
    unsafe {
        let ntdll = GetModuleHandleW(w!("ntdll.dll")).ok()?;
        let function = GetProcAddress(ntdll, s!("NtQueryInformationProcess"))?;
        Some(mem::transmute::<_, NtQueryInformationProcessFn>(function))
    }
}

fn read_memory(process: HANDLE, address: usize, size: usize) -> Option<Vec<u8>> {
    let mut buffer = vec![0u8; size];
    let mut bytes_read = 0;
    unsafe {
        ReadProcessMemory(
            process,
            address as *const c_void,
            buffer.as_mut_ptr() as *mut c_void,
            size,
            Some(&mut bytes_read),
        )
    }
    .ok()?;
    (bytes_read == size).then_some(buffer)
}

fn read_pointer(process: HANDLE, address: usize) -> Option<usize> {
    let bytes = read_memory(process, address, POINTER_SIZE)?;
    Some(usize::from_ne_bytes(bytes.try_into().ok()?))
}

/// Reads the command line out of the target's process parameters.
///
/// Needs `PROCESS_QUERY_INFORMATION | PROCESS_VM_READ`. Protected processes and
/// 64-bit targets seen from a 32-bit caller yield `None`.
pub fn command_line(process: &OwnedHandle, capacity: usize) -> Option<String> {
    let query = nt_query_information_process()?;

    let mut basic: ProcessBasicInformation = unsafe { mem::zeroed() };
    let mut return_length = 0u32;
    let status = unsafe {
        query(
            process.raw(),
            PROCESS_BASIC_INFORMATION_CLASS,
            &mut basic as *mut _ as *mut c_void,
            mem::size_of::<ProcessBasicInformation>() as u32,
            &mut return_length,
        )
    };
    if status < 0 || basic.peb_base_address.is_null() {
        return None;
    }

    let peb = basic.peb_base_address as usize;
    let parameters = read_pointer(process.raw(), peb + PEB_PROCESS_PARAMETERS)?;
    if parameters == 0 {
        return None;
    }

    // UNICODE_STRING { Length, MaximumLength, Buffer }
    let unicode = read_memory(process.raw(), parameters + PARAMS_COMMAND_LINE, POINTER_SIZE * 2)?;
    let byte_length = u16::from_ne_bytes([unicode[0], unicode[1]]) as usize;
    let buffer = usize::from_ne_bytes(unicode[POINTER_SIZE..].try_into().ok()?);
    if byte_length == 0 || buffer == 0 {
        return None;
    }

    let units = (byte_length / 2).min(capacity);
    let bytes = read_memory(process.raw(), buffer, units * 2)?;
    let wide: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
        .collect();
    Some(String::from_utf16_lossy(&wide))
}

// ============================================
// プロセス作成
// ============================================

fn startup_info(show_window: u16, desktop: Option<&mut Vec<u16>>) -> STARTUPINFOW {
    let mut startup = STARTUPINFOW {
        cb: mem::size_of::<STARTUPINFOW>() as u32,
        dwFlags: STARTF_USESHOWWINDOW,
        wShowWindow: show_window,
        ..Default::default()
    };
    if let Some(desktop) = desktop {
        startup.lpDesktop = PWSTR(desktop.as_mut_ptr());
    }
    startup
}

fn take_process_information(info: PROCESS_INFORMATION) -> (Pid, OwnedHandle) {
    // スレッドハンドルは不要
    drop(OwnedHandle::new(info.hThread));
    (info.dwProcessId, OwnedHandle::new(info.hProcess))
}

/// Starts a process in the caller's logon context
pub fn spawn(command: &str, options: &CreateOptions) -> Result<(Pid, OwnedHandle)> {
    // CreateProcessW may modify the command line buffer
    let mut command_line = to_wide(command);
    let working_dir = options
        .working_dir
        .as_ref()
        .map(|dir| to_wide(&dir.to_string_lossy()));
    let mut desktop = options
        .desktop
        .as_deref()
        .filter(|d| !d.is_empty())
        .map(to_wide);

    let startup = startup_info(options.show_mode.0, desktop.as_mut());
    let mut info = PROCESS_INFORMATION::default();

    unsafe {
        CreateProcessW(
            PCWSTR::null(),
            PWSTR(command_line.as_mut_ptr()),
            None,
            None,
            false,
            PROCESS_CREATION_FLAGS(0),
            None,
            working_dir
                .as_ref()
                .map(|dir| PCWSTR(dir.as_ptr()))
                .unwrap_or(PCWSTR::null()),
            &startup,
            &mut info,
        )
    }
    .map_err(|e| os_error(e, "CreateProcessW"))?;

    Ok(take_process_information(info))
}

fn session_step_error(step: &'static str, code: u32) -> ProcError {
    tracing::warn!("{} failed (os error {})", step, code);
    if code == CODE_ACCESS_DENIED {
        ProcError::AccessDenied(step.to_string())
    } else {
        ProcError::os(code, step)
    }
}

/// Starts a process as the user of the active console session.
///
/// Every resource acquired before a failing step is released in reverse
/// order through drop order of the guards below.
pub fn spawn_in_active_session(
    command: &str,
    options: &CreateOptions,
) -> Result<(Pid, OwnedHandle)> {
    if let Err(e) = elevation::enable_privilege("SeTcbPrivilege") {
        tracing::debug!("SeTcbPrivilege not enabled: {}", e);
    }

    let session = unsafe { WTSGetActiveConsoleSessionId() };
    if session == u32::MAX {
        return Err(session_step_error(
            "WTSGetActiveConsoleSessionId",
            last_error_or(ERROR_NO_TOKEN),
        ));
    }

    let mut user_token = HANDLE::default();
    unsafe { WTSQueryUserToken(session, &mut user_token) }.map_err(|e| {
        let code = match win32_code(&e) {
            0 => ERROR_NO_TOKEN,
            code => code,
        };
        session_step_error("WTSQueryUserToken", code)
    })?;
    let user_token = OwnedHandle::new(user_token);

    let mut primary_token = HANDLE::default();
    unsafe {
        DuplicateTokenEx(
            user_token.raw(),
            TOKEN_ACCESS_MASK(MAXIMUM_ALLOWED),
            None,
            SecurityIdentification,
            TokenPrimary,
            &mut primary_token,
        )
    }
    .map_err(|e| session_step_error("DuplicateTokenEx", win32_code(&e)))?;
    let primary_token = OwnedHandle::new(primary_token);

    let mut environment: *mut c_void = ptr::null_mut();
    unsafe { CreateEnvironmentBlock(&mut environment, primary_token.raw(), false) }
        .map_err(|e| session_step_error("CreateEnvironmentBlock", win32_code(&e)))?;
    let environment = EnvironmentBlock(environment);

    let mut command_line = to_wide(command);
    let working_dir = options
        .working_dir
        .as_ref()
        .map(|dir| to_wide(&dir.to_string_lossy()));
    let mut desktop = to_wide(
        options
            .desktop
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(INTERACTIVE_DESKTOP),
    );

    let startup = startup_info(options.show_mode.0, Some(&mut desktop));
    let mut info = PROCESS_INFORMATION::default();

    unsafe {
        CreateProcessAsUserW(
            primary_token.raw(),
            PCWSTR::null(),
            PWSTR(command_line.as_mut_ptr()),
            None,
            None,
            false,
            CREATE_UNICODE_ENVIRONMENT,
            Some(environment.0 as *const c_void),
            working_dir
                .as_ref()
                .map(|dir| PCWSTR(dir.as_ptr()))
                .unwrap_or(PCWSTR::null()),
            &startup,
            &mut info,
        )
    }
    .map_err(|e| session_step_error("CreateProcessAsUserW", win32_code(&e)))?;

    Ok(take_process_information(info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_contains_self() {
        let entries = snapshot().expect("Failed to list processes");
        let current_pid = std::process::id();
        assert!(entries.iter().any(|e| e.pid == current_pid));
    }

    #[test]
    fn test_command_line_of_self() {
        let process = open(std::process::id(), Access::Read).expect("Failed to open self");
        let line = command_line(&process, 4096).expect("Failed to read command line");
        assert!(!line.is_empty());
    }

    #[test]
    fn test_growing_buffer_retries_until_large_enough() {
        let needed = 3000;
        let mut calls = 0;
        let path = read_with_growing_buffer(PATH_BUFFER_INITIAL, PATH_BUFFER_MAX, |buffer| {
            calls += 1;
            if buffer.len() < needed {
                return PathRead::TooSmall;
            }
            buffer[..needed].fill(u16::from(b'a'));
            PathRead::Done(needed)
        })
        .unwrap();
        assert_eq!(path.len(), needed);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_growing_buffer_gives_up_at_max() {
        let path = read_with_growing_buffer(16, 64, |_| PathRead::TooSmall);
        assert!(path.is_none());
    }

    #[test]
    fn test_terminate_exited_process_is_not_found() {
        let (pid, mut process) =
            spawn("cmd.exe /c exit 0", &CreateOptions::new()).expect("Failed to spawn");
        assert!(wait(&mut process, Duration::from_secs(10)).unwrap());

        // プロセスオブジェクトはハンドル保持中も残る
        assert!(matches!(terminate(&process, 1), Err(ProcError::NotFound(_))));
        let reopened = open(pid, Access::Terminate).expect("Failed to reopen exited process");
        assert!(matches!(terminate(&reopened, 1), Err(ProcError::NotFound(_))));
    }

    #[test]
    fn test_logical_drives() {
        // システムドライブは常に存在する
        assert!(!logical_drive_devices().is_empty());
    }
}
