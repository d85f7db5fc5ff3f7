use crate::error::{ProcError, Result};
use std::fmt;
use std::str::FromStr;

/// OS-assigned process identifier. Recycled after the process exits.
pub type Pid = u32;

/// A caller-supplied process selector: a decimal identifier or an executable base name
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProcessQuery {
    Pid(Pid),
    Name(String),
}

impl ProcessQuery {
    /// Parses a query string.
    ///
    /// The whole string must consist of decimal digits to be taken as an
    /// identifier; anything else (including `"12.exe"` or `" 12"`) is a name.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(ProcError::InvalidArgument(
                "process query must not be empty".to_string(),
            ));
        }

        if input.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(pid) = input.parse::<Pid>() {
                return Ok(ProcessQuery::Pid(pid));
            }
        }

        Ok(ProcessQuery::Name(input.to_string()))
    }

    pub fn name(name: impl Into<String>) -> Self {
        ProcessQuery::Name(name.into())
    }
}

impl FromStr for ProcessQuery {
    type Err = ProcError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Pid> for ProcessQuery {
    fn from(pid: Pid) -> Self {
        ProcessQuery::Pid(pid)
    }
}

impl fmt::Display for ProcessQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessQuery::Pid(pid) => write!(f, "{}", pid),
            ProcessQuery::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Case-insensitive comparison of executable base names
pub fn names_match(a: &str, b: &str) -> bool {
    if a.eq_ignore_ascii_case(b) {
        return true;
    }
    // ASCII で一致しない場合のみ Unicode の小文字化で比較
    !a.is_ascii() && a.to_lowercase() == b.to_lowercase()
}
