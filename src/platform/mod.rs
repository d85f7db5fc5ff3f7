/// OS backends
///
/// Each backend exposes the same free functions over its own `OwnedProcess`
/// type; the rest of the crate only talks to this module.

#[cfg(any(unix, test))]
pub mod argv;
pub mod elevation;

#[cfg(windows)]
pub mod windows;
#[cfg(windows)]
pub use self::windows::*;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::*;

#[cfg(not(any(windows, target_os = "linux")))]
compile_error!("proctl supports Windows and Linux only");
