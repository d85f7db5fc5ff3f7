use crate::error::{ProcError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Scheduling priority class
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Idle,
    BelowNormal,
    Normal,
    AboveNormal,
    High,
    Realtime,
}

impl Priority {
    /// Maps a single-character code (`L,B,N,A,H,R`, case-insensitive)
    pub fn from_code(code: char) -> Result<Self> {
        match code.to_ascii_uppercase() {
            'L' => Ok(Priority::Idle),
            'B' => Ok(Priority::BelowNormal),
            'N' => Ok(Priority::Normal),
            'A' => Ok(Priority::AboveNormal),
            'H' => Ok(Priority::High),
            'R' => Ok(Priority::Realtime),
            other => Err(ProcError::InvalidArgument(format!(
                "unknown priority code '{}'",
                other
            ))),
        }
    }

    pub fn code(&self) -> char {
        match self {
            Priority::Idle => 'L',
            Priority::BelowNormal => 'B',
            Priority::Normal => 'N',
            Priority::AboveNormal => 'A',
            Priority::High => 'H',
            Priority::Realtime => 'R',
        }
    }

    /// Equivalent nice value for Unix schedulers
    pub fn nice_value(&self) -> i32 {
        match self {
            Priority::Idle => 19,
            Priority::BelowNormal => 10,
            Priority::Normal => 0,
            Priority::AboveNormal => -5,
            Priority::High => -10,
            Priority::Realtime => -20,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Idle => "Idle",
            Priority::BelowNormal => "BelowNormal",
            Priority::Normal => "Normal",
            Priority::AboveNormal => "AboveNormal",
            Priority::High => "High",
            Priority::Realtime => "Realtime",
        };
        write!(f, "{}", name)
    }
}

/// Window show mode passed to a new process (`SW_*` values)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowMode(pub u16);

impl ShowMode {
    pub const HIDE: ShowMode = ShowMode(0);
    pub const NORMAL: ShowMode = ShowMode(1);
    pub const MINIMIZED: ShowMode = ShowMode(2);
    pub const MAXIMIZED: ShowMode = ShowMode(3);
    pub const NO_ACTIVATE: ShowMode = ShowMode(4);
    pub const SHOW: ShowMode = ShowMode(5);
}

impl Default for ShowMode {
    fn default() -> Self {
        ShowMode::NORMAL
    }
}

/// Access rights requested when opening an existing process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Minimal query access (image name, exit code, memory counters)
    QueryLimited,
    Query,
    /// Query plus reading the address space
    Read,
    Terminate,
    SetInformation,
    /// Waiting on the exit signal
    Synchronize,
}

/// Options for creating a process
#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    pub working_dir: Option<PathBuf>,
    pub show_mode: ShowMode,
    /// Target desktop (`winsta0\default` style); ignored where unsupported
    pub desktop: Option<String>,
}

impl CreateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_show_mode(mut self, show_mode: ShowMode) -> Self {
        self.show_mode = show_mode;
        self
    }

    pub fn with_desktop(mut self, desktop: impl Into<String>) -> Self {
        self.desktop = Some(desktop.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_codes() {
        for code in ['L', 'B', 'N', 'A', 'H', 'R'] {
            let priority = Priority::from_code(code).unwrap();
            assert_eq!(priority.code(), code);
        }
        assert_eq!(Priority::from_code('h').unwrap(), Priority::High);
    }

    #[test]
    fn test_priority_invalid() {
        assert!(matches!(
            Priority::from_code('X'),
            Err(ProcError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_create_options_builder() {
        let options = CreateOptions::new()
            .with_working_dir("/tmp")
            .with_show_mode(ShowMode::HIDE);
        assert_eq!(options.show_mode, ShowMode::HIDE);
        assert_eq!(options.working_dir, Some(PathBuf::from("/tmp")));
        assert!(options.desktop.is_none());
    }
}
